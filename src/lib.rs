//! talkback - Turn-taking voice conversations
//!
//! Listens on a microphone, detects where the user stops speaking, sends the
//! utterance through speech recognition, streams a reply from a language model
//! and speaks it phrase by phrase. Talking over the assistant interrupts it.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod llm;
pub mod pipeline;
#[cfg(feature = "remote")]
pub mod remote;
pub mod stt;
pub mod tts;

// Service and device seams
pub use audio::playback::AudioSink;
pub use audio::recorder::{AudioSource, CaptureDevice};
pub use audio::vad::FrameClassifier;
pub use llm::generator::ReplyGenerator;
pub use stt::recognizer::Recognizer;
pub use tts::synthesizer::SpeechSynthesizer;

// Session
pub use conversation::{Conversation, Role, Turn};
pub use pipeline::events::{SessionEvent, TurnState};
pub use pipeline::orchestrator::{Session, SessionConfig, SessionHandle, SessionParts, SessionReport};

// Error handling
pub use error::{Result, Stage, TalkbackError};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_only_when_built_from_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
