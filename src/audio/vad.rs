//! Voice Activity Detection (VAD) module.
//!
//! Classifies single frames as speech or silence using RMS energy, and derives
//! end-of-utterance markers from accumulated silence.

use crate::defaults;
use crate::error::{Result, TalkbackError};

/// Fixed framing of the capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Duration of one frame in milliseconds.
    pub frame_ms: u32,
}

impl FrameFormat {
    /// Creates a frame format, rejecting durations and rates the gate cannot classify.
    pub fn new(sample_rate: u32, frame_ms: u32) -> Result<Self> {
        if !defaults::SUPPORTED_FRAME_MS.contains(&frame_ms) {
            return Err(TalkbackError::ConfigInvalidValue {
                key: "audio.frame_ms".to_string(),
                message: format!(
                    "{}ms is not supported, use one of {:?}",
                    frame_ms,
                    defaults::SUPPORTED_FRAME_MS
                ),
            });
        }
        if !defaults::SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(TalkbackError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: format!(
                    "{}Hz is not supported, use one of {:?}",
                    sample_rate,
                    defaults::SUPPORTED_SAMPLE_RATES
                ),
            });
        }
        Ok(Self {
            sample_rate,
            frame_ms,
        })
    }

    /// Number of samples in one frame.
    pub fn samples_per_frame(&self) -> usize {
        defaults::samples_per_ms(self.sample_rate, self.frame_ms)
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
        }
    }
}

/// Single-frame speech/silence classifier.
pub trait FrameClassifier: Send + Sync {
    /// Returns true if the frame contains speech.
    fn is_speech(&self, samples: &[i16]) -> bool;
}

/// Energy-based classifier with an aggressiveness-selected threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// Creates a classifier for aggressiveness 0 (tolerant) ..= 3 (strict).
    pub fn new(aggressiveness: u8) -> Result<Self> {
        let threshold = defaults::VAD_THRESHOLDS
            .get(aggressiveness as usize)
            .copied()
            .ok_or_else(|| TalkbackError::ConfigInvalidValue {
                key: "audio.vad_aggressiveness".to_string(),
                message: format!(
                    "{} is out of range 0..={}",
                    aggressiveness,
                    defaults::MAX_VAD_AGGRESSIVENESS
                ),
            })?;
        Ok(Self { threshold })
    }

    /// Creates a classifier with an explicit RMS threshold.
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    /// RMS threshold above which a frame counts as speech.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&self, samples: &[i16]) -> bool {
        calculate_rms(samples) > self.threshold
    }
}

/// Silence-duration accumulator that decides where utterances end.
///
/// Silence is counted in frame durations, so the marker position depends only
/// on the frame sequence and never on wall-clock jitter.
#[derive(Debug, Clone)]
pub struct Endpointer {
    frame_ms: u32,
    silence_timeout_ms: u32,
    silence_ms: u32,
}

impl Endpointer {
    pub fn new(frame_ms: u32, silence_timeout_ms: u32) -> Self {
        Self {
            frame_ms,
            silence_timeout_ms,
            silence_ms: 0,
        }
    }

    /// Feeds one classified frame. Returns true when an end-of-utterance
    /// marker must be emitted after this frame.
    pub fn observe(&mut self, is_speech: bool) -> bool {
        if is_speech {
            self.silence_ms = 0;
            return false;
        }

        self.silence_ms += self.frame_ms;
        if self.silence_ms >= self.silence_timeout_ms {
            self.silence_ms = 0;
            true
        } else {
            false
        }
    }

    /// Silence accumulated since the last speech frame or marker.
    pub fn silence_ms(&self) -> u32 {
        self.silence_ms
    }

    /// Clears the accumulator.
    pub fn reset(&mut self) {
        self.silence_ms = 0;
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
