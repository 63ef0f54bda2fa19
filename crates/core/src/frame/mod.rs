//! RGB frames as they travel to the display.
//!
//! A frame is a plain [`image::RgbImage`]: row-major, three bytes per pixel,
//! which is exactly the byte layout the panel driver expects on the wire.

use std::convert::Infallible;

use embedded_graphics::{
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, OriginDimensions, Pixel, Size},
};
use image::{imageops, Rgb, RgbImage};

use crate::{command::FrameShape, LampError, Result};

pub type Frame = RgbImage;

pub fn blank(width: u32, height: u32) -> Frame {
    RgbImage::new(width, height)
}

pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Frame {
    RgbImage::from_pixel(width, height, Rgb(color))
}

/// Copies a `width`-wide vertical slice of `frame` starting at column `x`.
#[cfg(test)]
pub(crate) fn window(frame: &Frame, x: u32, width: u32) -> Frame {
    imageops::crop_imm(frame, x, 0, width, frame.height()).to_image()
}

/// Pastes `src` into `dst` with its top-left corner at `(x, y)`, clipping at
/// the borders.
pub fn paste(dst: &mut Frame, src: &Frame, x: i64, y: i64) {
    imageops::replace(dst, src, x, y);
}

/// Like [`paste`] but leaves `dst` untouched wherever `src` is black, so
/// glyphs can be laid over a background.
pub fn overlay_lit(dst: &mut Frame, src: &Frame, x: i64, y: i64) {
    for (sx, sy, pixel) in src.enumerate_pixels() {
        if pixel.0 == [0, 0, 0] {
            continue;
        }
        let dx = x + i64::from(sx);
        let dy = y + i64::from(sy);
        if dx < 0 || dy < 0 || dx >= i64::from(dst.width()) || dy >= i64::from(dst.height()) {
            continue;
        }
        dst.put_pixel(dx as u32, dy as u32, *pixel);
    }
}

/// Splits a flat `[count, height, width, 3]` byte buffer into frames,
/// preserving pixel order.
pub fn frames_from_raw(pixels: &[u8], shape: FrameShape) -> Result<Vec<Frame>> {
    let [count, height, width, channels] = shape;
    if channels != 3 {
        return Err(LampError::InvalidCommand(format!(
            "expected 3 colour channels, got {channels}"
        )));
    }
    if count == 0 || height == 0 || width == 0 {
        return Err(LampError::InvalidCommand(format!(
            "frame shape {shape:?} is empty"
        )));
    }
    let (Ok(frame_width), Ok(frame_height)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(LampError::InvalidCommand(format!(
            "frame shape {shape:?} is too large"
        )));
    };
    let frame_len = height.checked_mul(width).and_then(|n| n.checked_mul(channels));
    let total = frame_len.and_then(|len| len.checked_mul(count));
    let (Some(frame_len), Some(total)) = (frame_len, total) else {
        return Err(LampError::InvalidCommand(format!(
            "frame shape {shape:?} is too large"
        )));
    };
    if pixels.len() != total {
        return Err(LampError::InvalidCommand(format!(
            "pixel buffer holds {} bytes, shape {shape:?} needs {total}",
            pixels.len(),
        )));
    }

    pixels
        .chunks_exact(frame_len)
        .map(|chunk| {
            RgbImage::from_raw(frame_width, frame_height, chunk.to_vec())
                .ok_or_else(|| LampError::InvalidCommand("frame buffer size mismatch".into()))
        })
        .collect()
}

/// `embedded-graphics` draw target writing straight into a [`Frame`].
pub struct FrameCanvas<'a> {
    frame: &'a mut Frame,
}

impl<'a> FrameCanvas<'a> {
    pub fn new(frame: &'a mut Frame) -> Self {
        Self { frame }
    }
}

impl OriginDimensions for FrameCanvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.frame.width(), self.frame.height())
    }
}

impl DrawTarget for FrameCanvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> std::result::Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < self.frame.width() && y < self.frame.height() {
                self.frame
                    .put_pixel(x, y, Rgb([color.r(), color.g(), color.b()]));
            }
        }
        Ok(())
    }
}
