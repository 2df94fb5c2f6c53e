//! Speech recognition.

#[cfg(feature = "remote")]
pub mod deepgram;
pub mod recognizer;

#[cfg(feature = "remote")]
pub use deepgram::{DeepgramConfig, DeepgramRecognizer};
pub use recognizer::{MockRecognizer, MockReply, Recognizer, Transcript, TranscriptEvent};
