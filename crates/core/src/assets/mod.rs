//! Asset cache turning media references into playable frame sequences.
//!
//! Converted animations live under `<root>/<kind>/<id>.frames`, where the id
//! is the file stem of the referenced media. A frame archive is one JSON
//! header line followed by the raw RGB bytes of every frame.

pub mod media;

use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::{
    command::{CacheKind, FrameShape},
    config::{CacheConfig, ConverterConfig, DisplayConfig},
    descriptor::AnimationDescriptor,
    frame::{self, Frame},
    LampError, Result,
};

const ARCHIVE_EXTENSION: &str = "frames";

/// Header line of a frame archive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub width: u32,
    pub height: u32,
    pub count: usize,
    pub fps: f32,
}

/// Writes `frames` to `path`, replacing any previous archive atomically.
pub fn write_archive(path: &Path, frames: &[Frame], fps: f32) -> Result<()> {
    let first = frames
        .first()
        .ok_or_else(|| LampError::malformed(path, "refusing to cache an empty animation"))?;
    let header = ArchiveHeader {
        width: first.width(),
        height: first.height(),
        count: frames.len(),
        fps,
    };
    if frames.iter().any(|f| f.dimensions() != first.dimensions()) {
        return Err(LampError::malformed(path, "frames differ in size"));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("frames.partial");
    {
        let mut file = std::io::BufWriter::new(File::create(&partial)?);
        serde_json::to_writer(&mut file, &header)?;
        file.write_all(b"\n")?;
        for frame in frames {
            file.write_all(frame.as_raw())?;
        }
        file.flush()?;
    }
    std::fs::rename(&partial, path)?;
    Ok(())
}

pub fn read_archive(path: &Path) -> Result<(Vec<Frame>, f32)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let header: ArchiveHeader = serde_json::from_str(line.trim_end())
        .map_err(|err| LampError::malformed(path, format!("bad archive header: {err}")))?;

    let mut pixels = Vec::new();
    reader.read_to_end(&mut pixels)?;
    let shape: FrameShape = [
        header.count,
        header.height as usize,
        header.width as usize,
        3,
    ];
    let frames = frame::frames_from_raw(&pixels, shape)
        .map_err(|err| LampError::malformed(path, err.to_string()))?;
    Ok((frames, header.fps))
}

/// Resolves cache references and raw uploads for a display of fixed size.
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
    width: u32,
    height: u32,
    sticker_renderer: ConverterConfig,
    sticker_fps: f32,
    photo_fps: f32,
}

impl AssetCache {
    pub fn new(config: &CacheConfig, display: DisplayConfig) -> Self {
        Self {
            root: config.root.clone(),
            width: display.width,
            height: display.height,
            sticker_renderer: config.sticker_renderer.clone(),
            sticker_fps: config.sticker_fps,
            photo_fps: config.photo_fps,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative references are looked up inside the kind's cache directory.
    pub fn source_path(&self, kind: CacheKind, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(kind.dir_name()).join(path)
        }
    }

    pub fn archive_path(&self, kind: CacheKind, path: &Path) -> PathBuf {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.root
            .join(kind.dir_name())
            .join(format!("{id}.{ARCHIVE_EXTENSION}"))
    }

    /// Resolves a cache reference. A cached archive is used as is; otherwise
    /// the referenced media is converted synchronously and cached.
    pub fn load(&self, kind: CacheKind, path: &Path) -> Result<AnimationDescriptor> {
        if path.as_os_str().is_empty() {
            return Err(LampError::InvalidCommand("cache reference without a path".into()));
        }
        let (frames, fps) = self.cached_or_convert(kind, path)?;
        AnimationDescriptor::sequence(frames, fps)
    }

    /// Makes sure the archive for `path` exists and returns where it lives.
    pub fn precompute(&self, kind: CacheKind, path: &Path) -> Result<PathBuf> {
        self.cached_or_convert(kind, path)?;
        Ok(self.archive_path(kind, path))
    }

    fn cached_or_convert(&self, kind: CacheKind, path: &Path) -> Result<(Vec<Frame>, f32)> {
        let archive = self.archive_path(kind, path);
        if archive.is_file() {
            tracing::debug!(path = %archive.display(), "frame cache hit");
            return read_archive(&archive);
        }

        let source = self.source_path(kind, path);
        if source == archive || !source.is_file() {
            return Err(LampError::MissingAsset(source));
        }

        tracing::info!(kind = kind.dir_name(), source = %source.display(), "converting asset");
        let (frames, fps) = match kind {
            CacheKind::Video => {
                let fps = media::probe_fps(&source)?;
                (media::decode_video(&source, self.width, self.height)?, fps)
            }
            CacheKind::Sticker => {
                let scratch = archive.parent().unwrap_or(self.root.as_path()).to_path_buf();
                let frames = media::render_sticker(
                    &self.sticker_renderer,
                    &source,
                    &scratch,
                    self.width,
                    self.height,
                )?;
                (frames, self.sticker_fps)
            }
            CacheKind::Photo => {
                let image = media::load_photo(&source, self.width, self.height)?;
                (vec![image], self.photo_fps)
            }
        };

        write_archive(&archive, &frames, fps)?;
        tracing::info!(path = %archive.display(), frames = frames.len(), fps, "asset cached");
        Ok((frames, fps))
    }

    /// Interprets an uploaded pixel buffer. Frames that do not match the
    /// display are letterboxed onto it.
    pub fn load_raw(
        &self,
        pixels: &[u8],
        shape: FrameShape,
        dtype: &str,
        fps: f32,
    ) -> Result<AnimationDescriptor> {
        if dtype != "uint8" {
            return Err(LampError::InvalidCommand(format!(
                "unsupported pixel type `{dtype}`, expected uint8"
            )));
        }
        let frames = frame::frames_from_raw(pixels, shape)?
            .into_iter()
            .map(|f| {
                if f.dimensions() == (self.width, self.height) {
                    f
                } else {
                    media::fit_to_display(&DynamicImage::ImageRgb8(f), self.width, self.height)
                }
            })
            .collect();
        AnimationDescriptor::sequence(frames, fps)
    }
}
