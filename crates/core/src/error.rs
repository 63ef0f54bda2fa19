use std::path::PathBuf;

/// Result alias that carries the custom [`LampError`] type.
pub type Result<T> = std::result::Result<T, LampError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LampError {
    /// A command referenced an asset that is neither cached nor convertible.
    #[error("asset `{}` not found", .0.display())]
    MissingAsset(PathBuf),
    /// A cached or uploaded asset could not be interpreted as frames.
    #[error("malformed asset `{}`: {reason}", path.display())]
    MalformedAsset { path: PathBuf, reason: String },
    /// A music mode asked for a visualisation routine that does not exist.
    #[error("unknown music algorithm `{0}`")]
    UnknownAlgorithm(String),
    /// The command itself is inconsistent (bad shape, bad element type, ...).
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// An exclusive resource needed by a player could not be acquired.
    #[error("player failed to start: {0}")]
    PlayerStart(String),
    /// A frame could not be handed to the display.
    #[error("display bus publish failed: {0}")]
    BusPublish(String),
    /// Free-form failure with a readable message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Fft(#[from] realfft::FftError),
}

impl LampError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedAsset {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn player_start(reason: impl std::fmt::Display) -> Self {
        Self::PlayerStart(reason.to_string())
    }

    /// True for failures that happen while turning a command into a
    /// descriptor. These never affect the running player.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::MissingAsset(_)
                | Self::MalformedAsset { .. }
                | Self::UnknownAlgorithm(_)
                | Self::InvalidCommand(_)
                | Self::Image(_)
        )
    }
}

impl From<&str> for LampError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LampError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_resolution_errors() {
        assert!(LampError::MissingAsset("x.frames".into()).is_resolution());
        assert!(LampError::UnknownAlgorithm("disco".into()).is_resolution());
        assert!(!LampError::player_start("audio busy").is_resolution());
        assert!(!LampError::BusPublish("closed".into()).is_resolution());
    }

    #[test]
    fn missing_asset_mentions_path() {
        let err = LampError::MissingAsset("stickers/X.cache".into());
        assert!(err.to_string().contains("X.cache"));
    }
}
