//! Data types carried between pipeline stations.

use std::time::{Duration, Instant};

/// A fixed-size block of mono PCM samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sequence number, monotonically increasing per capture stream.
    pub sequence: u64,
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Timestamp when this frame was captured.
    pub captured_at: Instant,
    /// Whether the gate classified this frame as speech.
    pub is_speech: bool,
}

impl AudioFrame {
    /// Creates a new, unclassified audio frame.
    pub fn new(samples: Vec<i16>, captured_at: Instant, sequence: u64) -> Self {
        Self {
            sequence,
            samples,
            captured_at,
            is_speech: false,
        }
    }

    /// Returns this frame tagged with a classification.
    pub fn classified(self, is_speech: bool) -> Self {
        Self { is_speech, ..self }
    }
}

/// Capture → gate queue item.
#[derive(Debug, Clone)]
pub enum Captured {
    Frame(AudioFrame),
    EndOfStream,
}

/// Gate → assembler queue item.
#[derive(Debug, Clone)]
pub enum Gated {
    /// A classified frame; `end_of_utterance` is set on the frame at which
    /// accumulated silence reached the timeout.
    Frame {
        frame: AudioFrame,
        end_of_utterance: bool,
    },
    EndOfStream,
}

/// Assembler → orchestrator queue item.
#[derive(Debug, Clone)]
pub enum Segment {
    /// First speech frame of a new utterance was seen.
    SpeechStarted,
    Utterance(Utterance),
    EndOfStream,
}

/// Frames collected between two silence boundaries.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub frames: Vec<AudioFrame>,
    pub started_at: Instant,
    pub ended_at: Instant,
    pub sample_rate: u32,
}

impl Utterance {
    /// Builds an utterance from a non-empty frame buffer.
    ///
    /// Returns `None` for an empty buffer; an utterance always has frames.
    pub fn from_frames(frames: Vec<AudioFrame>, sample_rate: u32) -> Option<Self> {
        let started_at = frames.first()?.captured_at;
        let ended_at = frames.last()?.captured_at;
        Some(Self {
            frames,
            started_at,
            ended_at,
            sample_rate,
        })
    }

    /// Concatenated PCM of all frames.
    pub fn samples(&self) -> Vec<i16> {
        let total = self.frames.iter().map(|f| f.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in &self.frames {
            samples.extend_from_slice(&frame.samples);
        }
        samples
    }

    /// Audio duration derived from the sample count.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let total: usize = self.frames.iter().map(|f| f.samples.len()).sum();
        Duration::from_secs_f64(total as f64 / self.sample_rate as f64)
    }

    /// Number of frames classified as speech.
    pub fn speech_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_speech).count()
    }

    /// Sequence numbers of the first and last frame.
    pub fn sequence_range(&self) -> (u64, u64) {
        let first = self.frames.first().map(|f| f.sequence).unwrap_or(0);
        let last = self.frames.last().map(|f| f.sequence).unwrap_or(0);
        (first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64, value: i16, is_speech: bool) -> AudioFrame {
        AudioFrame::new(vec![value; 160], Instant::now(), sequence).classified(is_speech)
    }

    #[test]
    fn test_new_frame_is_unclassified() {
        let frame = AudioFrame::new(vec![1, 2, 3], Instant::now(), 7);
        assert_eq!(frame.sequence, 7);
        assert!(!frame.is_speech);
        assert!(frame.classified(true).is_speech);
    }

    #[test]
    fn test_utterance_rejects_empty_buffer() {
        assert!(Utterance::from_frames(Vec::new(), 16000).is_none());
    }

    #[test]
    fn test_utterance_concatenates_samples_in_order() {
        let utterance =
            Utterance::from_frames(vec![frame(0, 1, true), frame(1, 2, false)], 16000).unwrap();
        let samples = utterance.samples();
        assert_eq!(samples.len(), 320);
        assert_eq!(samples[0], 1);
        assert_eq!(samples[319], 2);
        assert_eq!(utterance.sequence_range(), (0, 1));
        assert_eq!(utterance.speech_frames(), 1);
    }

    #[test]
    fn test_utterance_duration() {
        let frames = (0..100).map(|i| frame(i, 0, false)).collect();
        let utterance = Utterance::from_frames(frames, 16000).unwrap();
        assert_eq!(utterance.duration(), Duration::from_secs(1));
    }
}
