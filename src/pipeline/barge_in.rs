//! Barge-in monitor: listens on a second capture stream while the assistant is
//! speaking and cancels the reply on the first speech frame.

use crate::audio::recorder::{AudioSource, CaptureDevice};
use crate::audio::vad::{FrameClassifier, FrameFormat};
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::pipeline::frame_source::FrameSlicer;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Running monitor for one reply.
pub struct BargeInMonitor {
    stop: CancellationToken,
    handle: Option<JoinHandle<Result<bool>>>,
}

impl BargeInMonitor {
    /// Open a capture stream on `device` and watch it until `reply` is
    /// cancelled or [`BargeInMonitor::finish`] is called.
    ///
    /// The stream is opened before this returns, so an unavailable device is
    /// reported to the caller as a device error.
    pub fn spawn(
        device: &dyn CaptureDevice,
        classifier: Arc<dyn FrameClassifier>,
        format: FrameFormat,
        reply: CancellationToken,
    ) -> Result<Self> {
        let mut source = device
            .open()
            .map_err(|e| TalkbackError::device(format!("Barge-in capture unavailable: {e}")))?;
        source
            .start()
            .map_err(|e| TalkbackError::device(format!("Barge-in capture failed to start: {e}")))?;

        // Stops with the reply, or earlier when playback ends normally.
        let stop = reply.child_token();
        let monitor_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("barge-in".to_string())
            .spawn(move || {
                let result = watch(
                    source.as_mut(),
                    classifier.as_ref(),
                    format,
                    &reply,
                    &monitor_stop,
                );
                if let Err(e) = source.stop() {
                    tracing::warn!("Failed to stop barge-in capture: {}", e);
                }
                result
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop watching and report whether speech was detected.
    pub fn finish(mut self) -> Result<bool> {
        self.stop.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TalkbackError::Other("barge-in monitor panicked".to_string()))?,
            None => Ok(false),
        }
    }
}

impl Drop for BargeInMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn watch(
    source: &mut dyn AudioSource,
    classifier: &dyn FrameClassifier,
    format: FrameFormat,
    reply: &CancellationToken,
    stop: &CancellationToken,
) -> Result<bool> {
    let poll_interval = Duration::from_millis(defaults::POLL_INTERVAL_MS);
    let mut slicer = FrameSlicer::new(format.samples_per_frame());
    let mut consecutive_errors: u32 = 0;

    while !stop.is_cancelled() {
        let samples = match source.read_samples() {
            Ok(samples) => {
                consecutive_errors = 0;
                samples
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= defaults::MAX_CONSECUTIVE_READ_ERRORS {
                    return Err(TalkbackError::device(format!(
                        "barge-in capture failed {consecutive_errors} times in a row: {e}"
                    )));
                }
                thread::sleep(poll_interval);
                continue;
            }
        };
        if samples.is_empty() {
            if source.is_finite() {
                return Ok(false);
            }
            thread::sleep(poll_interval);
            continue;
        }

        let heard = slicer
            .push(&samples, Instant::now())
            .iter()
            .any(|frame| classifier.is_speech(&frame.samples));
        if heard && !stop.is_cancelled() {
            tracing::info!("Barge-in: user started speaking");
            reply.cancel();
            return Ok(true);
        }
    }
    Ok(false)
}
