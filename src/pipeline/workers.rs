//! Service worker threads for recognition and generation.
//!
//! Each worker owns one thread and serves one request at a time. Results come
//! back on a per-request channel so the orchestrator can wait on them with a
//! deadline and abandon a stuck request by cancelling its token.

use crate::conversation::Turn;
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::llm::generator::ReplyGenerator;
use crate::pipeline::frame_source::send_blocking;
use crate::pipeline::types::Utterance;
use crate::stt::recognizer::{Recognizer, Transcript};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of waiting on a worker channel.
#[derive(Debug)]
pub enum Wait<T> {
    Item(T),
    TimedOut,
    Closed,
    Stopped,
}

/// Receive from `rx` until `deadline`, giving up early once `shutdown` fires.
pub fn recv_until<T>(rx: &Receiver<T>, deadline: Instant, shutdown: &CancellationToken) -> Wait<T> {
    let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
    loop {
        if shutdown.is_cancelled() {
            return Wait::Stopped;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::TimedOut;
        }
        match rx.recv_timeout(poll.min(deadline - now)) {
            Ok(item) => return Wait::Item(item),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Wait::Closed,
        }
    }
}

/// `Ok(None)` means the request was cancelled before a transcript arrived.
pub type RecognitionResult = Result<Option<Transcript>>;

struct RecognitionRequest {
    utterance: Utterance,
    cancel: CancellationToken,
    reply: Sender<RecognitionResult>,
}

/// Runs the recognizer off the orchestrator thread.
pub struct RecognitionWorker {
    requests: Option<Sender<RecognitionRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl RecognitionWorker {
    pub fn spawn(recognizer: Arc<dyn Recognizer>) -> Result<Self> {
        // One utterance in flight, at most one more queued behind it.
        let (tx, rx) = bounded::<RecognitionRequest>(1);
        let handle = thread::Builder::new()
            .name("recognition".to_string())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    if request.cancel.is_cancelled() {
                        continue;
                    }
                    let mut on_event = |event: &Transcript| {
                        if !event.is_final {
                            tracing::debug!("partial transcript: {}", event.text);
                        }
                    };
                    let result = recognizer.recognize_stream(
                        &request.utterance,
                        &request.cancel,
                        &mut on_event,
                    );
                    if request.reply.send(result).is_err() {
                        tracing::debug!("recognition result abandoned");
                    }
                }
            })?;
        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue an utterance; the transcript arrives on the returned receiver.
    pub fn submit(
        &self,
        utterance: Utterance,
        cancel: CancellationToken,
    ) -> Result<Receiver<RecognitionResult>> {
        let (reply, reply_rx) = bounded(1);
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| TalkbackError::Other("recognition worker stopped".to_string()))?;
        let shutdown = cancel.clone();
        let request = RecognitionRequest {
            utterance,
            cancel,
            reply,
        };
        if !send_blocking(requests, request, &shutdown) {
            return Err(TalkbackError::Other(
                "recognition worker is not accepting requests".to_string(),
            ));
        }
        Ok(reply_rx)
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.requests.take();
        join_worker(self.handle.take(), "recognition")
    }
}

/// Items of one reply stream.
#[derive(Debug)]
pub enum GenerationEvent {
    Fragment(String),
    Failed(TalkbackError),
    Done,
}

struct GenerationRequest {
    context: Vec<Turn>,
    cancel: CancellationToken,
    events: Sender<GenerationEvent>,
}

/// Drives the reply generator's fragment stream off the orchestrator thread.
pub struct GenerationWorker {
    requests: Option<Sender<GenerationRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl GenerationWorker {
    pub fn spawn(generator: Arc<dyn ReplyGenerator>) -> Result<Self> {
        let (tx, rx) = bounded::<GenerationRequest>(1);
        let handle = thread::Builder::new()
            .name("generation".to_string())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    stream_reply(generator.as_ref(), request);
                }
            })?;
        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
        })
    }

    /// Start a reply; fragments arrive on the returned receiver.
    pub fn start(
        &self,
        context: Vec<Turn>,
        cancel: CancellationToken,
    ) -> Result<Receiver<GenerationEvent>> {
        let (events, events_rx) = bounded(16);
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| TalkbackError::Other("generation worker stopped".to_string()))?;
        let shutdown = cancel.clone();
        let request = GenerationRequest {
            context,
            cancel,
            events,
        };
        if !send_blocking(requests, request, &shutdown) {
            return Err(TalkbackError::Other(
                "generation worker is not accepting requests".to_string(),
            ));
        }
        Ok(events_rx)
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.requests.take();
        join_worker(self.handle.take(), "generation")
    }
}

fn stream_reply(generator: &dyn ReplyGenerator, request: GenerationRequest) {
    let GenerationRequest {
        context,
        cancel,
        events,
    } = request;
    if cancel.is_cancelled() {
        return;
    }

    let stream = match generator.generate(&context, &cancel) {
        Ok(stream) => stream,
        Err(e) => {
            send_blocking(&events, GenerationEvent::Failed(e), &cancel);
            return;
        }
    };

    for item in stream {
        let event = match item {
            Ok(fragment) => GenerationEvent::Fragment(fragment),
            Err(e) => {
                send_blocking(&events, GenerationEvent::Failed(e), &cancel);
                return;
            }
        };
        if !send_blocking(&events, event, &cancel) || cancel.is_cancelled() {
            return;
        }
    }
    send_blocking(&events, GenerationEvent::Done, &cancel);
}

fn join_worker(handle: Option<JoinHandle<()>>, name: &str) -> Result<()> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| TalkbackError::Other(format!("{name} worker panicked"))),
        None => Ok(()),
    }
}
