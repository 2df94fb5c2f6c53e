use crate::error::{Result, TalkbackError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    ///
    /// # Returns
    /// Ok(()) if the source started successfully, or an error
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever 16-bit PCM samples are available since the last read.
    ///
    /// An empty vector means "nothing yet" for live sources and
    /// "exhausted" for finite ones.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Returns true if the source ends on its own (file, pipe, script).
    fn is_finite(&self) -> bool {
        false
    }
}

impl AudioSource for Box<dyn AudioSource> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        (**self).read_samples()
    }

    fn is_finite(&self) -> bool {
        (**self).is_finite()
    }
}

/// Opens independent capture streams on one device.
///
/// The barge-in monitor opens its own stream for every reply, separate from
/// the primary frame source.
pub trait CaptureDevice: Send + Sync {
    /// Open a new, not yet started, capture stream.
    fn open(&self) -> Result<Box<dyn AudioSource>>;
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source that returns one 10ms block of silence per read.
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(TalkbackError::device(self.error_message.clone()))
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            Err(TalkbackError::device(self.error_message.clone()))
        } else {
            Ok(self.samples.clone())
        }
    }
}

/// One step of a [`ScriptedAudioSource`] script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return these samples from one read.
    Samples(Vec<i16>),
    /// Fail one read with a device error.
    ReadError,
}

/// Finite audio source that replays a fixed script, then reports exhaustion.
///
/// Used to drive the whole pipeline deterministically in tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAudioSource {
    steps: VecDeque<ScriptStep>,
    finite: bool,
    reads: Arc<AtomicUsize>,
}

impl ScriptedAudioSource {
    /// Create an empty finite script.
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            finite: true,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append `count` frames of constant amplitude, `frame_len` samples each.
    pub fn with_frames(mut self, count: usize, frame_len: usize, amplitude: i16) -> Self {
        for _ in 0..count {
            self.steps
                .push_back(ScriptStep::Samples(vec![amplitude; frame_len]));
        }
        self
    }

    /// Append one read that fails.
    pub fn with_read_error(mut self) -> Self {
        self.steps.push_back(ScriptStep::ReadError);
        self
    }

    /// Keep returning empty reads after the script instead of ending.
    pub fn endless(mut self) -> Self {
        self.finite = false;
        self
    }

    /// Shared counter of reads performed, for assertions.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl AudioSource for ScriptedAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.steps.pop_front() {
            Some(ScriptStep::Samples(samples)) => Ok(samples),
            Some(ScriptStep::ReadError) => Err(TalkbackError::device("scripted read failure")),
            None => Ok(Vec::new()),
        }
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}

/// Live mock source that returns silence or speech depending on a shared switch.
///
/// Tests flip the switch to simulate the user starting to talk.
#[derive(Debug, Clone)]
pub struct SwitchedAudioSource {
    speaking: Arc<AtomicBool>,
    frame_len: usize,
    amplitude: i16,
}

impl SwitchedAudioSource {
    pub fn new(speaking: Arc<AtomicBool>, frame_len: usize, amplitude: i16) -> Self {
        Self {
            speaking,
            frame_len,
            amplitude,
        }
    }
}

impl AudioSource for SwitchedAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        // Paced roughly like a live device.
        std::thread::sleep(std::time::Duration::from_millis(2));
        let level = if self.speaking.load(Ordering::SeqCst) {
            self.amplitude
        } else {
            0
        };
        Ok(vec![level; self.frame_len])
    }
}

/// Capture device that hands out [`SwitchedAudioSource`] streams sharing one switch.
#[derive(Debug, Clone)]
pub struct MockCaptureDevice {
    speaking: Arc<AtomicBool>,
    frame_len: usize,
    amplitude: i16,
    fail_open: bool,
    opened: Arc<AtomicUsize>,
}

impl MockCaptureDevice {
    pub fn new(frame_len: usize) -> Self {
        Self {
            speaking: Arc::new(AtomicBool::new(false)),
            frame_len,
            amplitude: 3000,
            fail_open: false,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the device to fail every open.
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Switch shared by all streams; set it to simulate speech.
    pub fn speaking_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.speaking)
    }

    /// Number of streams opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn open(&self) -> Result<Box<dyn AudioSource>> {
        if self.fail_open {
            return Err(TalkbackError::device("mock capture device unavailable"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SwitchedAudioSource::new(
            Arc::clone(&self.speaking),
            self.frame_len,
            self.amplitude,
        )))
    }
}
