//! Error types for talkback.
//!
//! Device errors are fatal and end the session. Service and timeout errors
//! are recoverable: they end the current turn only. Cancellation is never an
//! error (see [`crate::tts::PlaybackOutcome::Cancelled`]).

use std::fmt;
use thiserror::Error;

/// Pipeline stage that talks to an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recognition,
    Generation,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Recognition => write!(f, "recognition"),
            Stage::Generation => write!(f, "generation"),
            Stage::Synthesis => write!(f, "synthesis"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors (fatal)
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device failed: {message}")]
    Device { message: String },

    // Service errors (recoverable, end the current turn)
    #[error("{stage} service failed: {message}")]
    Service { stage: Stage, message: String },

    #[error("{stage} timed out after {waited_ms}ms")]
    Timeout { stage: Stage, waited_ms: u64 },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TalkbackError {
    /// Shorthand for a service failure at `stage`.
    pub fn service(stage: Stage, message: impl Into<String>) -> Self {
        TalkbackError::Service {
            stage,
            message: message.into(),
        }
    }

    /// Shorthand for a device failure.
    pub fn device(message: impl Into<String>) -> Self {
        TalkbackError::Device {
            message: message.into(),
        }
    }

    /// Returns true for errors that must stop the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TalkbackError::Device { .. } | TalkbackError::AudioDeviceNotFound { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TalkbackError>;
