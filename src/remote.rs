//! Shared HTTP client for the remote speech and language services.
//!
//! Pipeline stages run on plain threads; requests run on a tokio runtime and
//! are driven from those threads with `block_on`, racing the stage's
//! cancellation token.

use crate::error::{Result, Stage, TalkbackError};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
enum RuntimeRef {
    Borrowed(Handle),
    Owned(Arc<Runtime>),
}

/// reqwest client plus the runtime that drives it.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    runtime: RuntimeRef,
}

impl RemoteClient {
    /// Uses the current tokio runtime when there is one, otherwise starts a
    /// small dedicated runtime.
    pub fn new() -> Result<Self> {
        let runtime = match Handle::try_current() {
            Ok(handle) => RuntimeRef::Borrowed(handle),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("talkback-http")
                    .enable_all()
                    .build()
                    .map_err(|e| TalkbackError::Other(format!("Failed to start runtime: {e}")))?;
                RuntimeRef::Owned(Arc::new(runtime))
            }
        };
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TalkbackError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, runtime })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn handle(&self) -> &Handle {
        match &self.runtime {
            RuntimeRef::Borrowed(handle) => handle,
            RuntimeRef::Owned(runtime) => runtime.handle(),
        }
    }

    /// Run `future` to completion unless `cancel` fires first.
    ///
    /// Must be called from a pipeline thread, never from inside the runtime.
    pub fn run<F: Future>(&self, future: F, cancel: &CancellationToken) -> Option<F::Output> {
        self.handle().block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => None,
                output = future => Some(output),
            }
        })
    }

    /// Send a request and return the body as a blocking chunk stream.
    pub fn open_stream(
        &self,
        request: reqwest::RequestBuilder,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<Option<ByteStream>> {
        let Some(response) = self.run(request.send(), cancel) else {
            return Ok(None);
        };
        let response = response
            .map_err(|e| TalkbackError::service(stage, format!("Request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = self
                .run(response.text(), cancel)
                .and_then(|r| r.ok())
                .unwrap_or_default();
            return Err(TalkbackError::service(
                stage,
                format!("HTTP {status}: {}", body.trim()),
            ));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(Some(ByteStream {
            client: self.clone(),
            stream,
            stage,
            cancel: cancel.clone(),
        }))
    }
}

/// Response body read chunk by chunk from a pipeline thread.
pub struct ByteStream {
    client: RemoteClient,
    stream: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    stage: Stage,
    cancel: CancellationToken,
}

impl ByteStream {
    /// Next body chunk; `Ok(None)` at the end of the body or on cancellation.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let stage = self.stage;
        let stream = &mut self.stream;
        match self.client.run(stream.next(), &self.cancel) {
            None | Some(None) => Ok(None),
            Some(Some(Ok(bytes))) => Ok(Some(bytes)),
            Some(Some(Err(e))) => Err(TalkbackError::service(
                stage,
                format!("Failed to read response: {e}"),
            )),
        }
    }
}

/// Missing credentials are a configuration problem, reported before any request.
pub fn require_key(key: Option<&str>, config_key: &str, env_var: &str) -> Result<String> {
    match key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => Ok(key.to_string()),
        None => Err(TalkbackError::ConfigInvalidValue {
            key: config_key.to_string(),
            message: format!("missing API key (set {env_var} or {config_key})"),
        }),
    }
}
