use crate::error::{Result, TalkbackError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for audio output devices.
///
/// Pairs with [`crate::audio::recorder::AudioSource`] on the output side.
pub trait AudioSink: Send {
    /// Queue 16-bit PCM samples for output. May block while the device
    /// buffer is full.
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Discard audio that was queued but has not reached the speaker yet.
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    /// Block until all queued audio has been played.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

type WriteHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Sink that records every write, for tests.
///
/// Clones share the recorded writes, so a test keeps one clone and hands the
/// other to the player.
#[derive(Clone, Default)]
pub struct CollectorSink {
    writes: Arc<Mutex<Vec<Vec<i16>>>>,
    clears: Arc<Mutex<usize>>,
    write_delay: Option<Duration>,
    on_write: Option<WriteHook>,
    failing: Arc<AtomicBool>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long on every write, simulating real-time playback.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Run `hook(write_index)` after each write is recorded.
    pub fn with_on_write(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Arc::new(hook));
        self
    }

    /// Make every subsequent write fail with a device error.
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// All recorded writes, in order.
    pub fn writes(&self) -> Vec<Vec<i16>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// All recorded samples concatenated.
    pub fn samples(&self) -> Vec<i16> {
        self.writes().concat()
    }

    /// Number of times `clear` was called.
    pub fn clear_count(&self) -> usize {
        self.clears.lock().map(|c| *c).unwrap_or(0)
    }
}

impl AudioSink for CollectorSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TalkbackError::device("collector sink write failure"));
        }
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        let index = {
            let mut writes = self
                .writes
                .lock()
                .map_err(|e| TalkbackError::device(format!("Failed to lock sink: {}", e)))?;
            writes.push(samples.to_vec());
            writes.len() - 1
        };
        if let Some(ref hook) = self.on_write {
            hook(index);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut clears = self
            .clears
            .lock()
            .map_err(|e| TalkbackError::device(format!("Failed to lock sink: {}", e)))?;
        *clears += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_collector_records_writes_in_order() {
        let sink = CollectorSink::new();
        let mut writer = sink.clone();

        writer.write(&[1, 2]).unwrap();
        writer.write(&[3]).unwrap();

        assert_eq!(sink.writes(), vec![vec![1, 2], vec![3]]);
        assert_eq!(sink.samples(), vec![1, 2, 3]);
    }

    #[test]
    fn test_collector_hook_sees_write_index() {
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let seen_hook = Arc::clone(&seen);
        let mut sink =
            CollectorSink::new().with_on_write(move |i| seen_hook.store(i, Ordering::SeqCst));

        sink.write(&[0]).unwrap();
        sink.write(&[0]).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collector_failure_is_device_error() {
        let sink = CollectorSink::new();
        let mut writer = sink.clone();
        sink.fail_writes();

        let err = writer.write(&[1]).unwrap_err();
        assert!(err.is_fatal());
        assert!(sink.writes().is_empty());
    }

    #[test]
    fn test_collector_counts_clears() {
        let sink = CollectorSink::new();
        let mut writer = sink.clone();
        writer.clear().unwrap();
        writer.clear().unwrap();
        assert_eq!(sink.clear_count(), 2);
    }

    #[test]
    fn test_sink_trait_is_object_safe() {
        let mut sink: Box<dyn AudioSink> = Box::new(CollectorSink::new());
        sink.write(&[1]).unwrap();
        sink.drain().unwrap();
        assert_eq!(sink.name(), "collector");
    }
}
