//! Rasterisation of text, QR codes and the clock face.

use chrono::{Datelike, Timelike};
use embedded_graphics::{
    mono_font::{iso_8859_1, MonoFont, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::{Point, RgbColor},
    text::{Baseline, Text},
    Drawable,
};
use qrcode::{Color, EcLevel, QrCode, Version};

use crate::{
    frame::{self, Frame, FrameCanvas},
    LampError, Result,
};

/// Font used for scrolling messages.
pub const TEXT_FONT: &MonoFont<'static> = &iso_8859_1::FONT_10X20;
/// Font used for the four clock fields.
pub const CLOCK_FONT: &MonoFont<'static> = &iso_8859_1::FONT_9X15_BOLD;
/// Blank columns between the end of a scrolling message and its repeat.
pub const SCROLL_GAP: u32 = 10;

/// Renders `text` on a single line into a black strip exactly as tall as the
/// font.
pub fn text_strip(text: &str, font: &MonoFont<'_>, color: Rgb888) -> Frame {
    let line: String = text.chars().map(|c| if c.is_control() { ' ' } else { c }).collect();
    let chars = line.chars().count().max(1) as u32;
    let width =
        chars * font.character_size.width + (chars - 1) * font.character_spacing;
    let mut strip = frame::blank(width, font.character_size.height);

    let style = MonoTextStyle::new(font, color);
    let _ = Text::with_baseline(&line, Point::zero(), style, Baseline::Top)
        .draw(&mut FrameCanvas::new(&mut strip));
    strip
}

/// Lays a message out for the scroller. Short messages are centred on a
/// display-sized frame; long ones get a wide frame holding the message, a
/// gap, and the message start again so the scroll wraps seamlessly.
pub fn text_scroller(text: &str, width: u32, height: u32) -> Frame {
    let strip = text_strip(text, TEXT_FONT, Rgb888::WHITE);
    let top = (i64::from(height) - i64::from(strip.height())) / 2;

    if strip.width() > width {
        let repeat_at = strip.width() + SCROLL_GAP;
        let mut wide = frame::blank(repeat_at + width, height);
        frame::paste(&mut wide, &strip, 0, top);
        frame::paste(&mut wide, &strip, i64::from(repeat_at), top);
        wide
    } else {
        let mut out = frame::blank(width, height);
        let left = (i64::from(width) - i64::from(strip.width())) / 2;
        frame::paste(&mut out, &strip, left, top);
        out
    }
}

/// Renders `data` as a version 3 QR code, two pixels per module, dark modules
/// black on a `color` background.
pub fn qr_frame(data: &str, width: u32, height: u32, color: [u8; 3]) -> Result<Frame> {
    let code = QrCode::with_version(data.as_bytes(), Version::Normal(3), EcLevel::L)
        .map_err(|err| LampError::InvalidCommand(format!("cannot encode QR payload: {err}")))?;
    let modules = code.width();
    let mut out = frame::solid(width, height, [255, 255, 255]);

    for (index, module) in code.to_colors().into_iter().enumerate() {
        let value = match module {
            Color::Light => color,
            Color::Dark => [0, 0, 0],
        };
        let row = (index / modules) as u32;
        let col = (index % modules) as u32;
        for dy in 3..5 {
            for dx in 3..5 {
                let (x, y) = (col * 2 + dx, row * 2 + dy);
                if x < width && y < height {
                    out.put_pixel(x, y, image::Rgb(value));
                }
            }
        }
    }
    Ok(out)
}

/// The four numbers shown by the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockFace {
    pub day: u32,
    pub month: u32,
    pub hour: u32,
    pub minute: u32,
}

impl ClockFace {
    pub fn at<T: Datelike + Timelike>(time: &T) -> Self {
        Self {
            day: time.day(),
            month: time.month(),
            hour: time.hour(),
            minute: time.minute(),
        }
    }
}

/// Draws day/month on the top corners and hour/minute on the bottom corners,
/// over `globe` centred on a black frame.
pub fn compose_clock(face: &ClockFace, globe: Option<&Frame>, width: u32, height: u32) -> Frame {
    let mut out = frame::blank(width, height);
    if let Some(globe) = globe {
        let x = (i64::from(width) - i64::from(globe.width())) / 2;
        let y = (i64::from(height) - i64::from(globe.height())) / 2;
        frame::paste(&mut out, globe, x, y);
    }

    let cells = [[face.day, face.month], [face.hour, face.minute]];
    for (row, pair) in cells.iter().enumerate() {
        for (col, value) in pair.iter().enumerate() {
            let glyphs = text_strip(&format!("{value:02}"), CLOCK_FONT, Rgb888::WHITE);
            let x = if col == 0 { 0 } else { i64::from(width) - i64::from(glyphs.width()) };
            let y = if row == 0 { 0 } else { i64::from(height) - i64::from(glyphs.height()) };
            frame::overlay_lit(&mut out, &glyphs, x, y);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit_pixels(frame: &Frame) -> usize {
        frame.pixels().filter(|p| p.0 != [0, 0, 0]).count()
    }

    #[test]
    fn short_text_is_centred_on_the_display() {
        let frame = text_scroller("hi", 64, 64);
        assert_eq!(frame.dimensions(), (64, 64));
        assert!(lit_pixels(&frame) > 0);
        // Nothing drawn in the outer columns for a two letter word.
        assert!((0..64).all(|y| frame.get_pixel(0, y).0 == [0, 0, 0]));
    }

    #[test]
    fn long_text_wraps_with_a_gap() {
        let text = "hello pixel lamp";
        let strip_width = text.chars().count() as u32 * TEXT_FONT.character_size.width;
        let frame = text_scroller(text, 64, 64);

        assert_eq!(frame.width(), strip_width + SCROLL_GAP + 64);
        let head = frame::window(&frame, 0, 64);
        let tail = frame::window(&frame, strip_width + SCROLL_GAP, 64);
        assert_eq!(head, tail);
    }

    #[test]
    fn qr_modules_are_two_pixels_with_margin() {
        let frame = qr_frame("X-HM://0023ISYWYLAMP", 64, 64, [255, 255, 255]).unwrap();
        // The finder pattern's top-left module is dark.
        assert_eq!(frame.get_pixel(3, 3).0, [0, 0, 0]);
        assert_eq!(frame.get_pixel(4, 4).0, [0, 0, 0]);
        // Margin stays background.
        assert_eq!(frame.get_pixel(2, 2).0, [255, 255, 255]);
        assert_eq!(frame.get_pixel(63, 63).0, [255, 255, 255]);
    }

    #[test]
    fn oversized_qr_payload_is_rejected() {
        let data = "x".repeat(200);
        assert!(qr_frame(&data, 64, 64, [255, 255, 255]).is_err());
    }

    #[test]
    fn clock_draws_all_four_fields_over_the_globe() {
        let face = ClockFace {
            day: 17,
            month: 10,
            hour: 21,
            minute: 45,
        };
        let globe = frame::solid(52, 52, [0, 0, 200]);
        let out = compose_clock(&face, Some(&globe), 64, 64);

        let hour = text_strip("21", CLOCK_FONT, Rgb888::WHITE);
        let y0 = 64 - hour.height();
        for (x, y, pixel) in hour.enumerate_pixels() {
            if pixel.0 != [0, 0, 0] {
                assert_eq!(out.get_pixel(x, y0 + y).0, [255, 255, 255]);
            }
        }
        // Globe centre is untouched by the digits.
        assert_eq!(out.get_pixel(32, 32).0, [0, 0, 200]);
    }
}
