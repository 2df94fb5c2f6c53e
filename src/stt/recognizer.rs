use crate::error::{Result, Stage, TalkbackError};
use crate::pipeline::types::Utterance;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Transcript text plus a finality flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

/// One event of a streaming recognition: partials, then one final.
pub type TranscriptEvent = Transcript;

impl Transcript {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    /// Only final transcripts with non-blank text advance the conversation.
    pub fn is_meaningful(&self) -> bool {
        self.is_final && !self.text.trim().is_empty()
    }
}

/// Trait for speech recognition services.
///
/// Input is mono 16-bit PCM at [`Recognizer::sample_rate`]. Errors are
/// reported once; retrying is left to the caller.
pub trait Recognizer: Send + Sync {
    /// Recognize one whole utterance.
    fn recognize(&self, utterance: &Utterance) -> Result<Transcript>;

    /// Streaming variant: calls `on_event` for each partial and the final
    /// transcript, and returns the final one.
    ///
    /// Returns `Ok(None)` when `cancel` fires before a final transcript is
    /// available. The default runs [`Recognizer::recognize`] and reports its
    /// result as the only event.
    fn recognize_stream(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&TranscriptEvent),
    ) -> Result<Option<Transcript>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let transcript = self.recognize(utterance)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        on_event(&transcript);
        Ok(Some(transcript))
    }

    /// Sample rate the service expects.
    fn sample_rate(&self) -> u32 {
        crate::defaults::SAMPLE_RATE
    }

    /// Name for logging/debugging.
    fn name(&self) -> &str;
}

impl<T: Recognizer> Recognizer for Arc<T> {
    fn recognize(&self, utterance: &Utterance) -> Result<Transcript> {
        (**self).recognize(utterance)
    }

    fn recognize_stream(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&TranscriptEvent),
    ) -> Result<Option<Transcript>> {
        (**self).recognize_stream(utterance, cancel, on_event)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Scripted behavior for one [`MockRecognizer`] call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Final transcript with this text.
    Text(String),
    /// Service failure.
    Fail,
    /// Never answer; only cancellation ends the call.
    Hang,
}

/// Mock recognizer for testing
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    response: String,
    should_fail: bool,
    delay: Option<Duration>,
    script: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<AtomicUsize>,
}

impl MockRecognizer {
    /// Create a mock that answers every utterance with `response`.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            delay: None,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the default response.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replies for the first calls, in order; later calls use the default.
    pub fn with_script(self, replies: Vec<MockReply>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(replies);
        }
        self
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> MockReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(reply) => reply,
            None if self.should_fail => MockReply::Fail,
            None => MockReply::Text(self.response.clone()),
        }
    }

    fn answer(&self, reply: MockReply, cancel: Option<&CancellationToken>) -> Result<Option<Transcript>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match reply {
            MockReply::Text(text) => Ok(Some(Transcript::final_text(text))),
            MockReply::Fail => Err(TalkbackError::service(
                Stage::Recognition,
                "mock recognition failure",
            )),
            MockReply::Hang => match cancel {
                Some(token) => {
                    while !token.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(None)
                }
                None => Err(TalkbackError::service(
                    Stage::Recognition,
                    "mock recognizer hung without a cancellation token",
                )),
            },
        }
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new("mock transcript")
    }
}

impl Recognizer for MockRecognizer {
    fn recognize(&self, _utterance: &Utterance) -> Result<Transcript> {
        let reply = self.next_reply();
        self.answer(reply, None)?.ok_or_else(|| {
            TalkbackError::service(Stage::Recognition, "mock recognition produced nothing")
        })
    }

    fn recognize_stream(
        &self,
        _utterance: &Utterance,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&TranscriptEvent),
    ) -> Result<Option<Transcript>> {
        let reply = self.next_reply();
        if let MockReply::Text(ref text) = reply
            && let Some(first_word) = text.split_whitespace().next()
        {
            on_event(&Transcript::partial(first_word));
        }
        let transcript = self.answer(reply, Some(cancel))?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(ref t) = transcript {
            on_event(t);
        }
        Ok(transcript)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
