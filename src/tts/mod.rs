//! Speech synthesis and ordered playback.

#[cfg(feature = "remote")]
pub mod elevenlabs;
pub mod player;
pub mod session;
pub mod synthesizer;

#[cfg(feature = "remote")]
pub use elevenlabs::ElevenLabsSynthesizer;
pub use player::{PlaybackReport, Player, PlayerConfig};
pub use session::{PlaybackOutcome, PlaybackSession, SessionState};
pub use synthesizer::{AudioStream, MockSynthesizer, SpeechSynthesizer, VoiceParams};
