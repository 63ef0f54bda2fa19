//! Conversions from source media to display-sized frames.
//!
//! Video decoding shells out to the system `ffmpeg`/`ffprobe` binaries and
//! animated stickers go through a configurable external renderer that writes
//! numbered PNG files. Neither needs native development headers.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use image::{imageops::FilterType, DynamicImage};

use crate::{
    config::ConverterConfig,
    frame::{self, Frame},
    LampError, Result,
};

/// Scales `image` to fit inside `width`x`height` keeping its aspect ratio and
/// centres it on black.
pub fn fit_to_display(image: &DynamicImage, width: u32, height: u32) -> Frame {
    let scaled = if image.width() > width || image.height() > height {
        image.resize(width, height, FilterType::Triangle)
    } else {
        image.clone()
    };
    let scaled = scaled.to_rgb8();
    let mut out = frame::blank(width, height);
    let x = (i64::from(width) - i64::from(scaled.width())) / 2;
    let y = (i64::from(height) - i64::from(scaled.height())) / 2;
    frame::paste(&mut out, &scaled, x, y);
    out
}

pub fn load_photo(path: &Path, width: u32, height: u32) -> Result<Frame> {
    if !path.is_file() {
        return Err(LampError::MissingAsset(path.to_path_buf()));
    }
    let image = image::open(path).map_err(|err| LampError::malformed(path, err.to_string()))?;
    Ok(fit_to_display(&image, width, height))
}

/// Playback rate of a video, rounded to whole frames per second.
pub fn probe_fps(path: &Path) -> Result<f32> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        nb_frames: Option<String>,
        duration: Option<String>,
        r_frame_rate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
    }

    let out = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|err| LampError::malformed(path, format!("failed to run ffprobe: {err}")))?;
    if !out.status.success() {
        return Err(LampError::malformed(
            path,
            format!("ffprobe failed: {}", String::from_utf8_lossy(&out.stderr).trim()),
        ));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|err| LampError::malformed(path, format!("ffprobe json parse failed: {err}")))?;
    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| LampError::malformed(path, "no video stream found"))?;

    let counted = match (&stream.nb_frames, &stream.duration) {
        (Some(frames), Some(duration)) => {
            match (frames.parse::<f32>(), duration.parse::<f32>()) {
                (Ok(frames), Ok(duration)) if duration > 0.0 => Some(frames / duration),
                _ => None,
            }
        }
        _ => None,
    };
    let fps = counted
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_ratio))
        .ok_or_else(|| LampError::malformed(path, "cannot determine frame rate"))?;

    Ok(fps.round().max(1.0))
}

fn parse_ratio(value: &str) -> Option<f32> {
    let (num, den) = value.split_once('/')?;
    let num: f32 = num.trim().parse().ok()?;
    let den: f32 = den.trim().parse().ok()?;
    (den > 0.0).then(|| num / den)
}

/// Decodes every frame of a video, letterboxed to the display.
pub fn decode_video(path: &Path, width: u32, height: u32) -> Result<Vec<Frame>> {
    let filter = format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:-1:-1:color=black"
    );
    let out = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-vf", &filter, "-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
        .stdin(Stdio::null())
        .output()
        .map_err(|err| {
            LampError::malformed(path, format!("failed to run ffmpeg for video decode: {err}"))
        })?;
    if !out.status.success() {
        return Err(LampError::malformed(
            path,
            format!("ffmpeg decode failed: {}", String::from_utf8_lossy(&out.stderr).trim()),
        ));
    }

    let frame_len = width as usize * height as usize * 3;
    if out.stdout.is_empty() || out.stdout.len() % frame_len != 0 {
        return Err(LampError::malformed(
            path,
            format!(
                "decoded video has {} bytes, expected a multiple of {frame_len}",
                out.stdout.len()
            ),
        ));
    }
    let count = out.stdout.len() / frame_len;
    frame::frames_from_raw(&out.stdout, [count, height as usize, width as usize, 3])
}

/// Runs the external sticker renderer into a scratch directory next to
/// `scratch_parent` and collects the PNG files it produced, in name order.
pub fn render_sticker(
    converter: &ConverterConfig,
    input: &Path,
    scratch_parent: &Path,
    width: u32,
    height: u32,
) -> Result<Vec<Frame>> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sticker".to_string());
    let scratch = scratch_parent.join(format!("temp_{stem}"));
    std::fs::create_dir_all(&scratch)?;

    let result = run_renderer(converter, input, &scratch, width, height)
        .and_then(|_| collect_pngs(input, &scratch, width, height));
    if let Err(err) = std::fs::remove_dir_all(&scratch) {
        tracing::warn!(path = %scratch.display(), %err, "failed to remove sticker scratch dir");
    }
    result
}

fn run_renderer(
    converter: &ConverterConfig,
    input: &Path,
    scratch: &Path,
    width: u32,
    height: u32,
) -> Result<()> {
    let args: Vec<String> = converter
        .args
        .iter()
        .map(|arg| {
            arg.replace("{input}", &input.to_string_lossy())
                .replace("{output}", &scratch.to_string_lossy())
                .replace("{width}", &width.to_string())
                .replace("{height}", &height.to_string())
        })
        .collect();

    tracing::info!(program = %converter.program, input = %input.display(), "rendering sticker");
    let out = Command::new(&converter.program)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| {
            LampError::malformed(input, format!("failed to run `{}`: {err}", converter.program))
        })?;
    if !out.status.success() {
        return Err(LampError::malformed(
            input,
            format!(
                "sticker renderer failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        ));
    }
    Ok(())
}

fn collect_pngs(input: &Path, scratch: &Path, width: u32, height: u32) -> Result<Vec<Frame>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(scratch)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(LampError::malformed(input, "sticker renderer produced no frames"));
    }

    files
        .iter()
        .map(|file| {
            let image =
                image::open(file).map_err(|err| LampError::malformed(file, err.to_string()))?;
            Ok(fit_to_display(&image, width, height))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn fits_wide_images_with_letterbox() {
        let wide = DynamicImage::ImageRgb8(RgbImage::from_pixel(128, 32, Rgb([200, 0, 0])));
        let frame = fit_to_display(&wide, 64, 64);

        assert_eq!(frame.dimensions(), (64, 64));
        assert_eq!(frame.get_pixel(32, 0).0, [0, 0, 0]);
        assert_eq!(frame.get_pixel(32, 32).0, [200, 0, 0]);
    }

    #[test]
    fn small_images_are_centred_unscaled() {
        let small = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([9, 9, 9])));
        let frame = fit_to_display(&small, 4, 4);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(frame.get_pixel(1, 1).0, [9, 9, 9]);
        assert_eq!(frame.get_pixel(2, 2).0, [9, 9, 9]);
    }

    #[test]
    fn parses_frame_rate_ratios() {
        assert_eq!(parse_ratio("30000/1001").map(|v| v.round()), Some(30.0));
        assert_eq!(parse_ratio("25/0"), None);
    }

    #[test]
    fn missing_photo_is_a_resolution_error() {
        let err = load_photo(Path::new("/nonexistent/photo.png"), 64, 64).unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn collects_renderer_output_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("frame_0002.png", 2u8), ("frame_0001.png", 1u8)] {
            RgbImage::from_pixel(4, 4, Rgb([value, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }

        let frames = collect_pngs(Path::new("x.tgs"), dir.path(), 4, 4).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get_pixel(0, 0).0, [1, 0, 0]);
        assert_eq!(frames[1].get_pixel(0, 0).0, [2, 0, 0]);
    }
}
