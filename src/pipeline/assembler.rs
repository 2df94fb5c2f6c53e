//! Utterance assembler station.
//!
//! Buffers gated frames until an end-of-utterance marker and emits the buffer
//! as one [`Utterance`]. A buffer without any speech frame is dropped at the
//! marker instead of being emitted.

use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{AudioFrame, Gated, Segment, Utterance};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct MuteWindow {
    from: Instant,
    until: Option<Instant>,
}

impl MuteWindow {
    fn covers(&self, at: Instant) -> bool {
        self.from <= at && self.until.is_none_or(|until| at < until)
    }
}

/// Shared switch the orchestrator uses to ignore the microphone while the
/// assistant is speaking.
///
/// Mutes are recorded as time windows and frames are judged by when they
/// were captured, so a frame that waited in a queue through the whole reply
/// is still ignored after `unmute`.
#[derive(Debug, Clone, Default)]
pub struct ListenGate {
    windows: Arc<Mutex<VecDeque<MuteWindow>>>,
}

impl ListenGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mute(&self) {
        self.mute_at(Instant::now());
    }

    /// Open a mute window at `at`. No-op while already muted.
    pub fn mute_at(&self, at: Instant) {
        if let Ok(mut windows) = self.windows.lock()
            && !windows.back().is_some_and(|w| w.until.is_none())
        {
            windows.push_back(MuteWindow {
                from: at,
                until: None,
            });
        }
    }

    pub fn unmute(&self) {
        self.unmute_at(Instant::now());
    }

    /// Close the open mute window at `at`.
    pub fn unmute_at(&self, at: Instant) {
        if let Ok(mut windows) = self.windows.lock()
            && let Some(open) = windows.back_mut()
            && open.until.is_none()
        {
            open.until = Some(at.max(open.from));
        }
    }

    pub fn is_muted(&self) -> bool {
        self.windows
            .lock()
            .map(|w| w.back().is_some_and(|w| w.until.is_none()))
            .unwrap_or(false)
    }

    /// Whether audio captured at `captured_at` falls inside a mute window.
    ///
    /// Frames are checked in capture order, so windows that closed before
    /// `captured_at` are forgotten.
    pub fn covers(&self, captured_at: Instant) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            return false;
        };
        while windows
            .front()
            .is_some_and(|w| w.until.is_some_and(|until| until <= captured_at))
        {
            windows.pop_front();
        }
        windows.iter().any(|w| w.covers(captured_at))
    }
}

pub struct AssemblerStation {
    sample_rate: u32,
    gate: ListenGate,
    buffer: Vec<AudioFrame>,
    has_speech: bool,
    utterances: u64,
    dropped_while_muted: u64,
}

impl AssemblerStation {
    pub fn new(sample_rate: u32, gate: ListenGate) -> Self {
        Self {
            sample_rate,
            gate,
            buffer: Vec::new(),
            has_speech: false,
            utterances: 0,
            dropped_while_muted: 0,
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.has_speech = false;
    }
}

impl Station for AssemblerStation {
    type Input = Gated;
    type Output = Segment;

    fn process(&mut self, input: Gated) -> Result<Option<Segment>, StationError> {
        let (frame, end_of_utterance) = match input {
            Gated::Frame {
                frame,
                end_of_utterance,
            } => (frame, end_of_utterance),
            Gated::EndOfStream => {
                if self.has_speech {
                    tracing::debug!(
                        "assembler: discarding open utterance of {} frames at end of stream",
                        self.buffer.len()
                    );
                }
                self.clear();
                return Ok(Some(Segment::EndOfStream));
            }
        };

        if self.gate.covers(frame.captured_at) {
            self.dropped_while_muted += 1;
            self.clear();
            return Ok(None);
        }

        let first_speech = frame.is_speech && !self.has_speech;
        self.has_speech |= frame.is_speech;
        self.buffer.push(frame);

        if end_of_utterance {
            if !self.has_speech {
                self.clear();
                return Ok(None);
            }
            let frames = std::mem::take(&mut self.buffer);
            self.has_speech = false;
            return match Utterance::from_frames(frames, self.sample_rate) {
                Some(utterance) => {
                    self.utterances += 1;
                    Ok(Some(Segment::Utterance(utterance)))
                }
                None => Ok(None),
            };
        }

        if first_speech {
            return Ok(Some(Segment::SpeechStarted));
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "assembler"
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            "assembler: {} utterances, {} frames ignored while muted",
            self.utterances,
            self.dropped_while_muted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gated(sequence: u64, is_speech: bool, end_of_utterance: bool) -> Gated {
        Gated::Frame {
            frame: AudioFrame::new(vec![sequence as i16; 4], Instant::now(), sequence)
                .classified(is_speech),
            end_of_utterance,
        }
    }

    fn gated_at(captured_at: Instant, sequence: u64, is_speech: bool, eou: bool) -> Gated {
        Gated::Frame {
            frame: AudioFrame::new(vec![1; 4], captured_at, sequence).classified(is_speech),
            end_of_utterance: eou,
        }
    }

    fn feed(station: &mut AssemblerStation, items: Vec<Gated>) -> Vec<Segment> {
        items
            .into_iter()
            .filter_map(|item| station.process(item).unwrap())
            .collect()
    }

    #[test]
    fn emits_one_utterance_with_all_frames_since_start() {
        let mut station = AssemblerStation::new(16000, ListenGate::new());
        let out = feed(
            &mut station,
            vec![
                gated(0, false, false),
                gated(1, true, false),
                gated(2, true, false),
                gated(3, false, false),
                gated(4, false, true),
            ],
        );

        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Segment::SpeechStarted));
        let Segment::Utterance(ref utterance) = out[1] else {
            panic!("expected utterance");
        };
        assert_eq!(utterance.sequence_range(), (0, 4));
        assert_eq!(utterance.frames.len(), 5);
        assert_eq!(utterance.speech_frames(), 2);
    }

    #[test]
    fn marker_over_silence_emits_nothing() {
        let mut station = AssemblerStation::new(16000, ListenGate::new());
        let out = feed(
            &mut station,
            vec![
                gated(0, false, false),
                gated(1, false, true),
                gated(2, false, true),
            ],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn next_utterance_starts_after_marker() {
        let mut station = AssemblerStation::new(16000, ListenGate::new());
        let out = feed(
            &mut station,
            vec![
                gated(0, true, false),
                gated(1, false, true),
                gated(2, true, false),
                gated(3, false, true),
            ],
        );
        let ranges: Vec<(u64, u64)> = out
            .iter()
            .filter_map(|s| match s {
                Segment::Utterance(u) => Some(u.sequence_range()),
                _ => None,
            })
            .collect();
        assert_eq!(ranges, vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn muted_gate_drops_frames_and_clears_buffer() {
        let gate = ListenGate::new();
        let mut station = AssemblerStation::new(16000, gate.clone());

        feed(&mut station, vec![gated(0, true, false)]);
        gate.mute();
        let out = feed(&mut station, vec![gated(1, true, false), gated(2, false, true)]);
        assert!(out.is_empty());

        gate.unmute();
        let out = feed(&mut station, vec![gated(3, false, true)]);
        assert!(out.is_empty(), "speech heard before muting must not leak");
    }

    #[test]
    fn frames_captured_while_muted_are_dropped_after_unmute() {
        let gate = ListenGate::new();
        let mut station = AssemblerStation::new(16000, gate.clone());
        let t0 = Instant::now();
        let ms = Duration::from_millis;

        gate.mute_at(t0 + ms(100));
        gate.unmute_at(t0 + ms(500));
        assert!(!gate.is_muted());

        // Queued through the reply and only processed now.
        let out = feed(
            &mut station,
            vec![
                gated_at(t0 + ms(200), 0, true, false),
                gated_at(t0 + ms(300), 1, false, true),
            ],
        );
        assert!(out.is_empty());

        let out = feed(
            &mut station,
            vec![
                gated_at(t0 + ms(600), 2, true, false),
                gated_at(t0 + ms(700), 3, false, true),
            ],
        );
        let ranges: Vec<(u64, u64)> = out
            .iter()
            .filter_map(|s| match s {
                Segment::Utterance(u) => Some(u.sequence_range()),
                _ => None,
            })
            .collect();
        assert_eq!(ranges, vec![(2, 3)]);
    }

    #[test]
    fn gate_windows_cover_only_their_span() {
        let gate = ListenGate::new();
        let t0 = Instant::now();
        let ms = Duration::from_millis;

        gate.mute_at(t0 + ms(10));
        gate.mute_at(t0 + ms(20));
        assert!(gate.is_muted());
        gate.unmute_at(t0 + ms(30));
        gate.mute_at(t0 + ms(50));

        assert!(!gate.covers(t0));
        assert!(gate.covers(t0 + ms(10)));
        assert!(gate.covers(t0 + ms(25)));
        assert!(!gate.covers(t0 + ms(40)));
        assert!(gate.covers(t0 + ms(60)));
        assert!(gate.covers(t0 + ms(10_000)));
    }

    #[test]
    fn end_of_stream_discards_open_buffer() {
        let mut station = AssemblerStation::new(16000, ListenGate::new());
        let out = feed(&mut station, vec![gated(0, true, false), Gated::EndOfStream]);
        assert!(matches!(out.last(), Some(Segment::EndOfStream)));
        assert!(!out.iter().any(|s| matches!(s, Segment::Utterance(_))));
    }
}
