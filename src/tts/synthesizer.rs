use crate::defaults;
use crate::error::{Result, Stage, TalkbackError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lazy, finite sequence of PCM chunks at the synthesizer's sample rate.
pub type AudioStream<'a> = Box<dyn Iterator<Item = Result<Vec<i16>>> + Send + 'a>;

/// Voice and style parameters passed with every phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub voice_id: String,
    pub model: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub speed: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: defaults::SYNTHESIS_VOICE_ID.to_string(),
            model: defaults::SYNTHESIS_MODEL.to_string(),
            stability: 0.7,
            similarity_boost: 0.8,
            style: 0.5,
            use_speaker_boost: true,
            speed: 0.9,
        }
    }
}

/// Trait for speech synthesis services.
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing `text`. Audio chunks are produced as the stream is
    /// consumed; `cancel` fires when nobody will play the rest.
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        cancel: &CancellationToken,
    ) -> Result<AudioStream<'_>>;

    /// Sample rate of produced audio.
    fn sample_rate(&self) -> u32 {
        defaults::SAMPLE_RATE
    }

    /// Name for logging/debugging.
    fn name(&self) -> &str;
}

impl<T: SpeechSynthesizer> SpeechSynthesizer for Arc<T> {
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        cancel: &CancellationToken,
    ) -> Result<AudioStream<'_>> {
        (**self).synthesize(text, voice, cancel)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock synthesizer for testing.
///
/// Every chunk of a phrase is filled with the phrase's character count, so
/// tests can tell from played samples which phrase they came from.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    chunks: usize,
    chunk_len: usize,
    chunk_delay: Option<Duration>,
    fail_on: Option<String>,
    fail_all: bool,
    stall_on: Option<String>,
    slow_on: Option<(String, Duration)>,
    requests: Arc<Mutex<Vec<String>>>,
    produced: Arc<AtomicUsize>,
}

impl MockSynthesizer {
    /// Three 100ms chunks per phrase at 16kHz.
    pub fn new() -> Self {
        Self {
            chunks: 3,
            chunk_len: 1600,
            chunk_delay: None,
            fail_on: None,
            fail_all: false,
            stall_on: None,
            slow_on: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure chunk count and size per phrase.
    pub fn with_chunks(mut self, chunks: usize, chunk_len: usize) -> Self {
        self.chunks = chunks;
        self.chunk_len = chunk_len;
        self
    }

    /// Sleep before producing each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Fail phrases whose text contains `needle`.
    pub fn with_failure_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Fail every phrase.
    pub fn with_failure(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Phrases containing `needle` produce one chunk and then stall until cancelled.
    pub fn with_stall_on(mut self, needle: &str) -> Self {
        self.stall_on = Some(needle.to_string());
        self
    }

    /// Phrases containing `needle` wait `delay` before their first chunk.
    pub fn with_slow_phrase(mut self, needle: &str, delay: Duration) -> Self {
        self.slow_on = Some((needle.to_string(), delay));
        self
    }

    /// Texts passed to `synthesize`, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Total chunks produced so far.
    pub fn chunks_produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    /// Sample value used for a phrase.
    pub fn marker_for(text: &str) -> i16 {
        text.chars().count().min(i16::MAX as usize) as i16
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceParams,
        cancel: &CancellationToken,
    ) -> Result<AudioStream<'_>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(text.to_string());
        }
        let fails = self.fail_all
            || self
                .fail_on
                .as_deref()
                .is_some_and(|needle| text.contains(needle));
        if fails {
            return Err(TalkbackError::service(
                Stage::Synthesis,
                "mock synthesis failure",
            ));
        }

        let stalls = self
            .stall_on
            .as_deref()
            .is_some_and(|needle| text.contains(needle));
        let initial_delay = self
            .slow_on
            .as_ref()
            .filter(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, delay)| *delay);

        let marker = Self::marker_for(text);
        let chunk_len = self.chunk_len;
        let chunk_delay = self.chunk_delay;
        let produced = Arc::clone(&self.produced);
        let cancel = cancel.clone();
        let total = if stalls { 1 } else { self.chunks };
        let mut index = 0;

        Ok(Box::new(std::iter::from_fn(move || {
            if index == 0
                && let Some(delay) = initial_delay
            {
                std::thread::sleep(delay);
            }
            if index >= total {
                if stalls {
                    while !cancel.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
                return None;
            }
            if let Some(delay) = chunk_delay {
                std::thread::sleep(delay);
            }
            index += 1;
            produced.fetch_add(1, Ordering::SeqCst);
            Some(Ok(vec![marker; chunk_len]))
        })))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
