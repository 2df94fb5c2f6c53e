//! Streaming chat-completions generator for OpenAI-compatible endpoints.
//!
//! The response is read as server-sent events; each `delta.content` is one
//! fragment.

use crate::conversation::Turn;
use crate::error::{Result, Stage, TalkbackError};
use crate::llm::generator::{FragmentStream, ReplyGenerator};
use crate::remote::{ByteStream, RemoteClient, require_key};
use serde_json::{Value, json};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

/// Generation settings.
#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub struct ChatCompletionsGenerator {
    client: RemoteClient,
    api_key: String,
    config: ChatCompletionsConfig,
}

impl ChatCompletionsGenerator {
    pub fn new(client: RemoteClient, config: ChatCompletionsConfig) -> Result<Self> {
        let api_key = require_key(
            config.api_key.as_deref(),
            "generation.api_key",
            "GEMINI_API_KEY",
        )?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn body(&self, context: &[Turn]) -> Value {
        let messages: Vec<Value> = context
            .iter()
            .map(|t| json!({ "role": t.role.to_string(), "content": t.content }))
            .collect();
        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        })
    }
}

impl ReplyGenerator for ChatCompletionsGenerator {
    fn generate(&self, context: &[Turn], cancel: &CancellationToken) -> Result<FragmentStream<'_>> {
        let body = serde_json::to_vec(&self.body(context))
            .map_err(|e| TalkbackError::service(Stage::Generation, e.to_string()))?;
        let request = self
            .client
            .http()
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(body);

        match self.client.open_stream(request, Stage::Generation, cancel)? {
            Some(stream) => Ok(Box::new(SseFragments::new(stream))),
            None => Ok(Box::new(std::iter::empty())),
        }
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}

/// Iterator over `delta.content` strings of an SSE body.
struct SseFragments {
    body: ByteStream,
    lines: LineSplitter,
    ready: VecDeque<String>,
    done: bool,
}

impl SseFragments {
    fn new(body: ByteStream) -> Self {
        Self {
            body,
            lines: LineSplitter::default(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    fn absorb(&mut self, line: &str) {
        match parse_sse_line(line) {
            SseLine::Content(text) => self.ready.push_back(text),
            SseLine::Done => self.done = true,
            SseLine::Skip => {}
        }
    }
}

impl Iterator for SseFragments {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(fragment) = self.ready.pop_front() {
                return Some(Ok(fragment));
            }
            if self.done {
                return None;
            }
            match self.body.next_chunk() {
                Ok(Some(bytes)) => {
                    for line in self.lines.feed(&bytes) {
                        self.absorb(&line);
                    }
                }
                Ok(None) => {
                    if let Some(line) = self.lines.finish() {
                        self.absorb(&line);
                    }
                    self.done = true;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Splits a byte stream into complete UTF-8 lines.
#[derive(Debug, Default)]
struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).trim_end().to_string();
        self.partial.clear();
        Some(line)
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Content(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        tracing::debug!("skipping unparsable event: {}", data);
        return SseLine::Skip;
    };
    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| SseLine::Content(s.to_string()))
        .unwrap_or(SseLine::Skip)
}
