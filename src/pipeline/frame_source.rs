//! Capture loop: reads an [`AudioSource`] and feeds fixed-size frames into the
//! capture queue.

use crate::audio::recorder::AudioSource;
use crate::audio::vad::FrameFormat;
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::pipeline::types::{AudioFrame, Captured};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Re-cuts arbitrary device reads into frames of exactly `frame_len` samples.
#[derive(Debug)]
pub struct FrameSlicer {
    frame_len: usize,
    sample_rate: Option<u32>,
    pending: Vec<i16>,
    next_sequence: u64,
}

impl FrameSlicer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            sample_rate: None,
            pending: Vec::with_capacity(frame_len * 2),
            next_sequence: 0,
        }
    }

    /// Back-date each frame by the audio that follows it in the same read.
    ///
    /// A large read drains a device backlog; its early frames were heard
    /// well before the read returned.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate.max(1));
        self
    }

    /// Append a read that returned at `read_at` and return every complete
    /// frame it finishes.
    pub fn push(&mut self, samples: &[i16], read_at: Instant) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let total = self.pending.len();
        let complete = total / self.frame_len;
        let mut frames = Vec::with_capacity(complete);
        for (i, chunk) in self.pending.chunks_exact(self.frame_len).enumerate() {
            let samples_after = total - (i + 1) * self.frame_len;
            frames.push(AudioFrame::new(
                chunk.to_vec(),
                self.stamp(read_at, samples_after),
                self.next_sequence,
            ));
            self.next_sequence += 1;
        }
        self.pending.drain(..complete * self.frame_len);
        frames
    }

    fn stamp(&self, read_at: Instant, samples_after: usize) -> Instant {
        match self.sample_rate {
            Some(rate) if samples_after > 0 => {
                let behind =
                    Duration::from_nanos(samples_after as u64 * 1_000_000_000 / u64::from(rate));
                read_at.checked_sub(behind).unwrap_or(read_at)
            }
            _ => read_at,
        }
    }

    /// Samples waiting for a complete frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_produced(&self) -> u64 {
        self.next_sequence
    }
}

/// Owns the capture thread.
pub struct FrameSource;

impl FrameSource {
    /// Start `source` and spawn the capture loop.
    ///
    /// A start failure is returned immediately as a device error. The loop
    /// ends when the source is exhausted (finite sources), when reads keep
    /// failing, or when `shutdown` fires; `Captured::EndOfStream` is sent in
    /// every case.
    pub fn spawn(
        mut source: Box<dyn AudioSource>,
        format: FrameFormat,
        tx: Sender<Captured>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<Result<()>>> {
        source
            .start()
            .map_err(|e| TalkbackError::device(format!("Failed to start capture: {e}")))?;

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let result = capture_loop(source.as_mut(), format, &tx, &shutdown);
                if let Err(e) = source.stop() {
                    tracing::warn!("Failed to stop audio capture: {}", e);
                }
                if !send_blocking(&tx, Captured::EndOfStream, &shutdown) {
                    tracing::debug!("capture: end-of-stream not delivered");
                }
                result
            })?;
        Ok(handle)
    }
}

fn capture_loop(
    source: &mut dyn AudioSource,
    format: FrameFormat,
    tx: &Sender<Captured>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let poll_interval = Duration::from_millis(defaults::POLL_INTERVAL_MS);
    let mut slicer =
        FrameSlicer::new(format.samples_per_frame()).with_sample_rate(format.sample_rate);
    let mut consecutive_errors: u32 = 0;

    while !shutdown.is_cancelled() {
        let samples = match source.read_samples() {
            Ok(samples) => {
                consecutive_errors = 0;
                samples
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!("Audio read failed ({}): {}", consecutive_errors, e);
                if consecutive_errors >= defaults::MAX_CONSECUTIVE_READ_ERRORS {
                    return Err(TalkbackError::device(format!(
                        "audio capture failed {consecutive_errors} times in a row: {e}"
                    )));
                }
                thread::sleep(poll_interval);
                continue;
            }
        };

        // Live sources may turn finite later, so ask on every empty read.
        if samples.is_empty() {
            if source.is_finite() {
                break;
            }
            thread::sleep(poll_interval);
            continue;
        }

        for frame in slicer.push(&samples, Instant::now()) {
            if !send_blocking(tx, Captured::Frame(frame), shutdown) {
                return Ok(());
            }
        }
    }

    if slicer.pending_len() > 0 {
        tracing::debug!(
            "capture: dropping {} trailing samples (partial frame)",
            slicer.pending_len()
        );
    }
    if slicer.frames_produced() == 0 && !source.is_finite() && !shutdown.is_cancelled() {
        tracing::warn!("No audio frames captured; check the input device");
    }
    Ok(())
}

/// Blocking send that gives up once `shutdown` fires or the receiver is gone.
pub(crate) fn send_blocking<T>(tx: &Sender<T>, item: T, shutdown: &CancellationToken) -> bool {
    let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
    let mut item = item;
    loop {
        match tx.send_timeout(item, poll) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => return false,
            Err(SendTimeoutError::Timeout(back)) => {
                if shutdown.is_cancelled() {
                    // Best effort: a sentinel still fits if the queue drained.
                    return tx.try_send(back).is_ok();
                }
                item = back;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::{MockAudioSource, ScriptedAudioSource};
    use crossbeam_channel::bounded;

    fn format() -> FrameFormat {
        FrameFormat::new(16000, 10).unwrap()
    }

    fn collect(rx: crossbeam_channel::Receiver<Captured>) -> (Vec<AudioFrame>, bool) {
        let mut frames = Vec::new();
        let mut ended = false;
        while let Ok(item) = rx.recv() {
            match item {
                Captured::Frame(f) => frames.push(f),
                Captured::EndOfStream => ended = true,
            }
        }
        (frames, ended)
    }

    #[test]
    fn slicer_recuts_reads_and_numbers_frames() {
        let mut slicer = FrameSlicer::new(4);
        let now = Instant::now();
        assert!(slicer.push(&[1, 2, 3], now).is_empty());
        let frames = slicer.push(&[4, 5, 6, 7, 8, 9], now);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![1, 2, 3, 4]);
        assert_eq!(frames[1].samples, vec![5, 6, 7, 8]);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(slicer.pending_len(), 1);
    }

    #[test]
    fn slicer_back_dates_frames_within_a_read() {
        let mut slicer = FrameSlicer::new(160).with_sample_rate(16000);
        let read_at = Instant::now();
        let frames = slicer.push(&[0; 480], read_at);
        assert_eq!(frames.len(), 3);
        assert_eq!(read_at - frames[0].captured_at, Duration::from_millis(20));
        assert_eq!(read_at - frames[1].captured_at, Duration::from_millis(10));
        assert_eq!(frames[2].captured_at, read_at);
    }

    #[test]
    fn finite_source_ends_with_sentinel() {
        let source = ScriptedAudioSource::new().with_frames(3, 160, 100);
        let (tx, rx) = bounded(16);
        let handle =
            FrameSource::spawn(Box::new(source), format(), tx, CancellationToken::new()).unwrap();

        let (frames, ended) = collect(rx);
        handle.join().unwrap().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(ended);
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    /// Live until its reads and idle polls run out, finite afterwards.
    struct LateFiniteSource {
        reads: Vec<Vec<i16>>,
        idle_polls: usize,
    }

    impl AudioSource for LateFiniteSource {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_samples(&mut self) -> Result<Vec<i16>> {
            if !self.reads.is_empty() {
                return Ok(self.reads.remove(0));
            }
            self.idle_polls = self.idle_polls.saturating_sub(1);
            Ok(Vec::new())
        }

        fn is_finite(&self) -> bool {
            self.reads.is_empty() && self.idle_polls == 0
        }
    }

    #[test]
    fn source_that_turns_finite_ends_the_stream() {
        let source = LateFiniteSource {
            reads: vec![vec![100; 160], vec![100; 160]],
            idle_polls: 3,
        };
        assert!(!source.is_finite());
        let (tx, rx) = bounded(16);
        let handle =
            FrameSource::spawn(Box::new(source), format(), tx, CancellationToken::new()).unwrap();

        let (frames, ended) = collect(rx);
        handle.join().unwrap().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(ended);
    }

    #[test]
    fn transient_read_error_drops_only_that_read() {
        let source = ScriptedAudioSource::new()
            .with_frames(1, 160, 100)
            .with_read_error()
            .with_frames(1, 160, 100);
        let (tx, rx) = bounded(16);
        let handle =
            FrameSource::spawn(Box::new(source), format(), tx, CancellationToken::new()).unwrap();

        let (frames, ended) = collect(rx);
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(frames.len(), 2);
        assert!(ended);
    }

    #[test]
    fn repeated_read_errors_are_fatal() {
        let mut source = ScriptedAudioSource::new();
        for _ in 0..defaults::MAX_CONSECUTIVE_READ_ERRORS {
            source = source.with_read_error();
        }
        let (tx, rx) = bounded(16);
        let handle =
            FrameSource::spawn(Box::new(source), format(), tx, CancellationToken::new()).unwrap();

        let (_, ended) = collect(rx);
        let err = handle.join().unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert!(ended);
    }

    #[test]
    fn start_failure_is_a_device_error() {
        let source = MockAudioSource::new().with_start_failure();
        let (tx, _rx) = bounded(16);
        let err = FrameSource::spawn(Box::new(source), format(), tx, CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, TalkbackError::Device { .. }));
    }

    #[test]
    fn shutdown_unblocks_a_full_queue() {
        let source = ScriptedAudioSource::new().with_frames(10, 160, 100).endless();
        let (tx, rx) = bounded(1);
        let shutdown = CancellationToken::new();
        let handle = FrameSource::spawn(Box::new(source), format(), tx, shutdown.clone()).unwrap();

        thread::sleep(Duration::from_millis(50));
        shutdown.cancel();
        handle.join().unwrap().unwrap();
        // Only the frame that fitted before shutdown is queued.
        assert!(matches!(rx.try_recv(), Ok(Captured::Frame(_))));
    }
}
