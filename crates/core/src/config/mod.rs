use std::{net::SocketAddr, path::{Path, PathBuf}, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{bus::MAX_DATAGRAM, Command, LampError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub display: DisplayConfig,
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub audio: AudioConfig,
    pub clock: ClockConfig,
    pub particles: ParticleConfig,
    pub smart_home: SmartHomeConfig,
    pub intake: IntakeConfig,
    /// Command replayed once when the engine boots.
    pub startup: Option<Command>,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(LampError::msg("display dimensions must be non-zero"));
        }
        let datagram = self.bus.channel.len() as u64
            + u64::from(self.display.width) * u64::from(self.display.height) * 3;
        if datagram > MAX_DATAGRAM as u64 {
            return Err(LampError::msg(format!(
                "a {}x{} frame needs a {datagram}-byte datagram, the bus carries at most {MAX_DATAGRAM}",
                self.display.width, self.display.height
            )));
        }
        if self.clock.fps <= 0.0 || self.clock.rotations_per_minute <= 0.0 {
            return Err(LampError::msg("clock fps and rotation speed must be positive"));
        }
        if self.audio.fps <= 0.0 {
            return Err(LampError::msg("music fps must be positive"));
        }
        Ok(())
    }
}

/// Geometry of the LED matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
        }
    }
}

/// Where finished frames are sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub address: SocketAddr,
    /// Tag written in front of every frame; the panel driver filters on it.
    pub channel: String,
    pub fps: f32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 5555)),
            channel: "A".to_string(),
            fps: 30.0,
        }
    }
}

/// On-disk frame cache and the external converters that fill it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
    /// Program that rasterises an animated sticker into numbered PNG files.
    pub sticker_renderer: ConverterConfig,
    /// Playback rate used for converted stickers.
    pub sticker_fps: f32,
    /// Playback rate used for raw frame uploads that do not carry one.
    pub photo_fps: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cache"),
            sticker_renderer: ConverterConfig::default(),
            sticker_fps: 60.0,
            photo_fps: 5.0,
        }
    }
}

/// External command line used for sticker conversion. `{input}`, `{output}`,
/// `{width}` and `{height}` are substituted in the arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: [
                "tools/tgs/cli.js",
                "--width",
                "{width}",
                "--height",
                "{height}",
                "--out_path",
                "{output}/frame_%04d.png",
                "{input}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; the host default is used when absent.
    pub device: Option<String>,
    pub fps: f32,
    pub gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            fps: 60.0,
            gain: 50.0,
        }
    }
}

/// Clock face and background globe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub fps: f32,
    pub rotations_per_minute: f32,
    pub globe_size: u32,
    pub preview_frames: usize,
    pub full_frames: usize,
    pub refresh_secs: u64,
    pub backoff_secs: u64,
    pub restart_backoff_secs: u64,
}

impl ClockConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            rotations_per_minute: 5.0,
            globe_size: 52,
            preview_frames: 36,
            full_frames: 600,
            refresh_secs: 30,
            backoff_secs: 5,
            restart_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub capacity: usize,
    pub spawn_probability: f64,
    pub fps: f32,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            spawn_probability: 0.05,
            fps: 120.0,
        }
    }
}

/// Accessory bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartHomeConfig {
    pub bind: SocketAddr,
    pub name: String,
    /// Pairing code in `XXX-XX-XXX` form.
    pub pincode: String,
    pub setup_id: String,
}

impl Default for SmartHomeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 51826)),
            name: "Pixel Lamp".to_string(),
            pincode: "031-45-154".to_string(),
            setup_id: "LAMP".to_string(),
        }
    }
}

/// HTTP command intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub bind: SocketAddr,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 2222)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "clock": { "rotations_per_minute": 10.0 } }"#).unwrap();
        assert_eq!(config.clock.rotations_per_minute, 10.0);
        assert_eq!(config.clock.fps, 30.0);
        assert_eq!(config.display, DisplayConfig::default());
        assert!(config.startup.is_none());
    }

    #[test]
    fn loads_startup_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lamp.json");
        std::fs::write(&path, r#"{ "startup": { "kind": "clock" } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert!(matches!(config.startup, Some(Command::Clock)));
    }

    #[test]
    fn rejects_empty_display() {
        let mut config = AppConfig::default();
        config.display.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_displays_too_large_for_one_datagram() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.display = DisplayConfig {
            width: 147,
            height: 147,
        };
        assert!(config.validate().is_ok());

        config.display = DisplayConfig {
            width: 148,
            height: 148,
        };
        assert!(config.validate().is_err());
    }
}
