use crate::conversation::Turn;
use crate::error::{Result, Stage, TalkbackError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lazy, finite, non-restartable sequence of reply text fragments.
pub type FragmentStream<'a> = Box<dyn Iterator<Item = Result<String>> + Send + 'a>;

/// Trait for language-model reply generation.
pub trait ReplyGenerator: Send + Sync {
    /// Start a reply to `context` (oldest turn first).
    ///
    /// The stream should end early once `cancel` fires.
    fn generate(&self, context: &[Turn], cancel: &CancellationToken) -> Result<FragmentStream<'_>>;

    /// Name for logging/debugging.
    fn name(&self) -> &str;
}

impl<T: ReplyGenerator> ReplyGenerator for Arc<T> {
    fn generate(&self, context: &[Turn], cancel: &CancellationToken) -> Result<FragmentStream<'_>> {
        (**self).generate(context, cancel)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock generator for testing
#[derive(Debug, Clone)]
pub struct MockGenerator {
    fragments: Vec<String>,
    script: Arc<Mutex<VecDeque<Vec<String>>>>,
    error_after: Option<usize>,
    stall_after: Option<usize>,
    fragment_delay: Option<Duration>,
    should_fail: bool,
    contexts: Arc<Mutex<Vec<Vec<Turn>>>>,
}

impl MockGenerator {
    /// Create a mock that streams `fragments` for every reply.
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            error_after: None,
            stall_after: None,
            fragment_delay: None,
            should_fail: false,
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fragments for the next replies, in order; later replies use the default.
    pub fn with_replies(self, replies: Vec<Vec<&str>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(
                replies
                    .into_iter()
                    .map(|r| r.into_iter().map(str::to_string).collect()),
            );
        }
        self
    }

    /// Yield a service error after `count` fragments.
    pub fn with_error_after(mut self, count: usize) -> Self {
        self.error_after = Some(count);
        self
    }

    /// Stop producing after `count` fragments until cancelled.
    pub fn with_stall_after(mut self, count: usize) -> Self {
        self.stall_after = Some(count);
        self
    }

    /// Sleep before each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Fail `generate` itself.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Every context passed to `generate`, in call order.
    pub fn contexts(&self) -> Vec<Vec<Turn>> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(&["Mock ", "reply."])
    }
}

impl ReplyGenerator for MockGenerator {
    fn generate(&self, context: &[Turn], cancel: &CancellationToken) -> Result<FragmentStream<'_>> {
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context.to_vec());
        }
        if self.should_fail {
            return Err(TalkbackError::service(
                Stage::Generation,
                "mock generation failure",
            ));
        }

        let fragments = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fragments.clone());
        let error_after = self.error_after;
        let stall_after = self.stall_after;
        let delay = self.fragment_delay;
        let cancel = cancel.clone();
        let mut index = 0;
        let mut errored = false;

        Ok(Box::new(std::iter::from_fn(move || {
            if errored || cancel.is_cancelled() {
                return None;
            }
            if error_after == Some(index) {
                errored = true;
                return Some(Err(TalkbackError::service(
                    Stage::Generation,
                    "mock stream interrupted",
                )));
            }
            if stall_after == Some(index) {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                return None;
            }
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            let fragment = fragments.get(index)?.clone();
            index += 1;
            Some(Ok(fragment))
        })))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
