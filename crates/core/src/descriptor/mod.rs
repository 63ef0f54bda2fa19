use std::fmt;

use crate::{command::SmartHomeAction, frame::Frame, LampError, Result};

/// Visualisation routines available to the music player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicAlgorithm {
    /// Scrolling spectrogram of the 100 Hz - 2 kHz band.
    Spectral,
}

impl MusicAlgorithm {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "spectral" => Ok(Self::Spectral),
            other => Err(LampError::UnknownAlgorithm(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Spectral => "spectral",
        }
    }
}

/// A resolved, ready-to-play payload. Built once per command and never
/// mutated afterwards.
#[derive(Clone, PartialEq)]
pub enum AnimationDescriptor {
    /// Frames played in order, looping.
    Sequence { frames: Vec<Frame>, fps: f32 },
    /// A frame wider than the display, shown through a moving window.
    Scroller { wide_frame: Frame, fps: f32 },
    ClockOverlay,
    MusicReactive { algorithm: MusicAlgorithm, fps: f32 },
    GpuEffect,
    SmartHome { action: SmartHomeAction },
}

impl AnimationDescriptor {
    /// Builds a [`AnimationDescriptor::Sequence`], rejecting empty input.
    pub fn sequence(frames: Vec<Frame>, fps: f32) -> Result<Self> {
        if frames.is_empty() {
            return Err(LampError::InvalidCommand("animation has no frames".into()));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(LampError::InvalidCommand(format!("invalid frame rate {fps}")));
        }
        Ok(Self::Sequence { frames, fps })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequence { .. } => "sequence",
            Self::Scroller { .. } => "scroller",
            Self::ClockOverlay => "clock",
            Self::MusicReactive { .. } => "music",
            Self::GpuEffect => "gpu",
            Self::SmartHome { .. } => "smart_home",
        }
    }
}

impl fmt::Debug for AnimationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence { frames, fps } => f
                .debug_struct("Sequence")
                .field("frames", &frames.len())
                .field("fps", fps)
                .finish(),
            Self::Scroller { wide_frame, fps } => f
                .debug_struct("Scroller")
                .field("width", &wide_frame.width())
                .field("fps", fps)
                .finish(),
            Self::ClockOverlay => f.write_str("ClockOverlay"),
            Self::MusicReactive { algorithm, fps } => f
                .debug_struct("MusicReactive")
                .field("algorithm", algorithm)
                .field("fps", fps)
                .finish(),
            Self::GpuEffect => f.write_str("GpuEffect"),
            Self::SmartHome { action } => {
                f.debug_struct("SmartHome").field("action", action).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;

    #[test]
    fn resolves_known_algorithms_only() {
        assert_eq!(MusicAlgorithm::from_name("spectral").unwrap(), MusicAlgorithm::Spectral);
        let err = MusicAlgorithm::from_name("disco").unwrap_err();
        assert!(matches!(err, LampError::UnknownAlgorithm(name) if name == "disco"));
    }

    #[test]
    fn sequences_need_frames() {
        assert!(AnimationDescriptor::sequence(Vec::new(), 30.0).is_err());
        assert!(AnimationDescriptor::sequence(vec![frame::blank(2, 2)], 0.0).is_err());
        let ok = AnimationDescriptor::sequence(vec![frame::blank(2, 2)], 30.0).unwrap();
        assert_eq!(ok.kind(), "sequence");
        assert!(format!("{ok:?}").contains("frames: 1"));
    }
}
