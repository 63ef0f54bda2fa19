use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Which kind of cached media a [`Command::CacheRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Video,
    Sticker,
    Photo,
}

impl CacheKind {
    /// Sub-directory of the cache root holding this kind of asset.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Sticker => "animated_sticker",
            Self::Photo => "photo",
        }
    }
}

/// What the smart-home bridge should do when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartHomeAction {
    /// Show the pairing code instead of acting as a light.
    Setup,
    Start,
}

/// `[count, height, width, channels]` of a raw frame upload.
pub type FrameShape = [usize; 4];

/// A request to change what the display shows. Exactly one kind per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    CacheRef {
        file_type: CacheKind,
        path: PathBuf,
    },
    RawFrames {
        pixels: Vec<u8>,
        shape: FrameShape,
        #[serde(default = "default_dtype")]
        dtype: String,
        fps: f32,
    },
    Music {
        name: String,
    },
    Gpu,
    SmartHome {
        action: SmartHomeAction,
    },
    Clock,
    Text {
        text: String,
    },
    Qr {
        data: String,
    },
}

fn default_dtype() -> String {
    "uint8".to_string()
}

impl Command {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CacheRef { .. } => "cache_ref",
            Self::RawFrames { .. } => "raw_frames",
            Self::Music { .. } => "music",
            Self::Gpu => "gpu",
            Self::SmartHome { .. } => "smart_home",
            Self::Clock => "clock",
            Self::Text { .. } => "text",
            Self::Qr { .. } => "qr",
        }
    }
}

/// Reply sent back for every successfully handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    pub fn received() -> Self {
        Self {
            status: "received".to_string(),
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let cmd: Command = serde_json::from_str(
            r#"{ "kind": "cache_ref", "file_type": "sticker", "path": "cache/X.cache" }"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::CacheRef {
                file_type: CacheKind::Sticker,
                path: PathBuf::from("cache/X.cache"),
            }
        );

        let cmd: Command = serde_json::from_str(r#"{ "kind": "music", "name": "spectral" }"#).unwrap();
        assert_eq!(cmd.label(), "music");
    }

    #[test]
    fn raw_frames_default_to_bytes() {
        let cmd: Command = serde_json::from_str(
            r#"{ "kind": "raw_frames", "pixels": [1, 2, 3], "shape": [1, 1, 1, 3], "fps": 5.0 }"#,
        )
        .unwrap();
        match cmd {
            Command::RawFrames { dtype, .. } => assert_eq!(dtype, "uint8"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
