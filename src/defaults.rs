//! Default configuration constants for talkback.
//!
//! Shared by the TOML configuration layer and the runtime session config so
//! both agree on the same values.

/// Default audio sample rate in Hz.
///
/// 16kHz linear PCM is what the recognition service is asked to accept.
pub const SAMPLE_RATE: u32 = 16000;

/// Default frame duration in milliseconds.
pub const FRAME_MS: u32 = 30;

/// Frame durations the voice activity gate can classify.
pub const SUPPORTED_FRAME_MS: &[u32] = &[10, 20, 30];

/// Sample rates the voice activity gate can classify.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8000, 16000, 32000, 48000];

/// Default VAD aggressiveness (0 = most speech-tolerant, 3 = strictest).
pub const VAD_AGGRESSIVENESS: u8 = 2;

/// Highest accepted VAD aggressiveness.
pub const MAX_VAD_AGGRESSIVENESS: u8 = 3;

/// RMS energy threshold per aggressiveness level.
///
/// Index is the aggressiveness. Level 2 matches the 0.02 threshold that works
/// for typical microphone input.
pub const VAD_THRESHOLDS: [f32; 4] = [0.010, 0.015, 0.020, 0.030];

/// Accumulated silence that ends an utterance.
pub const SILENCE_TIMEOUT_MS: u32 = 1200;

/// Capacity of the capture → gate queue, in frames.
pub const CAPTURE_QUEUE_FRAMES: usize = 256;

/// Device audio kept while the capture queue is full; older audio is dropped.
pub const MAX_CAPTURE_BACKLOG_SECS: usize = 30;

/// Phrase buffering threshold in characters.
pub const PHRASE_THRESHOLD: usize = 50;

/// Number of recent non-system turns sent to the generator.
pub const HISTORY_TURNS: usize = 10;

/// Bounded wait for a stalled service before the turn is failed.
pub const TURN_TIMEOUT_MS: u64 = 15_000;

/// Number of phrases that may be synthesized concurrently.
pub const SYNTHESIS_WORKERS: usize = 2;

/// Largest slice of audio written to the output device between cancellation checks.
pub const MAX_PLAYBACK_SLICE_MS: u32 = 100;

/// Consecutive capture read failures tolerated before the device is declared dead.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Poll interval for capture reads and shutdown checks.
pub const POLL_INTERVAL_MS: u64 = 16;

/// Default system prompt.
pub const SYSTEM_PROMPT: &str = "You are a friendly assistant. Respond naturally and keep your answers short, crisp and conversational.";

/// Default recognition model.
pub const RECOGNITION_MODEL: &str = "nova-3";

/// Default recognition language.
pub const RECOGNITION_LANGUAGE: &str = "en-US";

/// Default OpenAI-compatible chat completions endpoint.
pub const GENERATION_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Default language model.
pub const GENERATION_MODEL: &str = "gemini-2.5-flash-lite";

/// Default sampling temperature.
pub const GENERATION_TEMPERATURE: f32 = 0.7;

/// Default completion token limit.
pub const GENERATION_MAX_TOKENS: u32 = 1000;

/// Default synthesis voice.
pub const SYNTHESIS_VOICE_ID: &str = "cgSgspJ2msm6clMCkdW9";

/// Default synthesis model.
pub const SYNTHESIS_MODEL: &str = "eleven_flash_v2_5";

/// Number of samples in one frame of `frame_ms` at `sample_rate`.
pub fn samples_per_ms(sample_rate: u32, ms: u32) -> usize {
    (sample_rate as u64 * ms as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_per_ms_matches_frame_sizes() {
        assert_eq!(samples_per_ms(16000, 30), 480);
        assert_eq!(samples_per_ms(8000, 10), 80);
        assert_eq!(samples_per_ms(48000, 20), 960);
    }

    #[test]
    fn default_aggressiveness_is_supported() {
        assert!(VAD_AGGRESSIVENESS <= MAX_VAD_AGGRESSIVENESS);
        assert_eq!(VAD_THRESHOLDS.len(), MAX_VAD_AGGRESSIVENESS as usize + 1);
        assert!(SUPPORTED_FRAME_MS.contains(&FRAME_MS));
        assert!(SUPPORTED_SAMPLE_RATES.contains(&SAMPLE_RATE));
    }

    #[test]
    fn thresholds_increase_with_aggressiveness() {
        for pair in VAD_THRESHOLDS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
