//! Deepgram recognizer.
//!
//! Streaming recognition opens the live websocket, sends the utterance as raw
//! `linear16` PCM in short chunks and reports interim results as partial
//! transcripts. With `live` off, or through plain [`Recognizer::recognize`],
//! the utterance is posted to the prerecorded endpoint in one request.

use crate::error::{Result, Stage, TalkbackError};
use crate::pipeline::types::Utterance;
use crate::remote::{RemoteClient, require_key};
use crate::stt::recognizer::{Recognizer, Transcript, TranscriptEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_util::sync::CancellationToken;

const LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";
const LIVE_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Asks the live endpoint to flush its final results and close.
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Audio per websocket message.
const LIVE_CHUNK_MS: u32 = 100;

/// Recognition settings.
#[derive(Debug, Clone)]
pub struct DeepgramConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub live: bool,
    pub sample_rate: u32,
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
}

/// One message from the live endpoint; only `Results` carry text.
#[derive(Debug, Deserialize)]
struct LiveMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    channel: Option<ListenChannel>,
}

/// Joins finalized live segments and renders interim results against them.
#[derive(Debug, Default)]
struct LiveTranscript {
    finals: Vec<String>,
}

impl LiveTranscript {
    /// Apply one text message; returns the partial transcript to report.
    fn apply(&mut self, raw: &str) -> Result<Option<Transcript>> {
        let message: LiveMessage = serde_json::from_str(raw).map_err(|e| {
            TalkbackError::service(Stage::Recognition, format!("Unexpected live message: {e}"))
        })?;
        if message.kind != "Results" {
            return Ok(None);
        }
        let text = message
            .channel
            .as_ref()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Ok(None);
        }
        if message.is_final {
            self.finals.push(text);
            return Ok(Some(Transcript::partial(self.finals.join(" "))));
        }
        let mut pending = self.finals.clone();
        pending.push(text);
        Ok(Some(Transcript::partial(pending.join(" "))))
    }

    fn finish(self) -> Transcript {
        Transcript::final_text(self.finals.join(" "))
    }
}

fn live_error(e: impl std::fmt::Display) -> TalkbackError {
    TalkbackError::service(Stage::Recognition, format!("Live recognition failed: {e}"))
}

pub struct DeepgramRecognizer {
    client: RemoteClient,
    api_key: String,
    config: DeepgramConfig,
}

impl DeepgramRecognizer {
    pub fn new(client: RemoteClient, config: DeepgramConfig) -> Result<Self> {
        let api_key = require_key(
            config.api_key.as_deref(),
            "recognition.api_key",
            "DEEPGRAM_API_KEY",
        )?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("model", self.config.model.clone()),
            ("language", self.config.language.clone()),
            ("smart_format", self.config.smart_format.to_string()),
            ("encoding", "linear16".to_string()),
            ("sample_rate", self.config.sample_rate.to_string()),
            ("channels", "1".to_string()),
        ]
    }

    fn live_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut query = self.query();
        query.push(("interim_results", "true".to_string()));
        let url = reqwest::Url::parse_with_params(LIVE_URL, &query)
            .map_err(|e| TalkbackError::Other(format!("Invalid recognition URL: {e}")))?;
        let mut request = url.as_str().into_client_request().map_err(live_error)?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key)).map_err(|e| {
            TalkbackError::ConfigInvalidValue {
                key: "recognition.api_key".to_string(),
                message: e.to_string(),
            }
        })?;
        request.headers_mut().insert(AUTHORIZATION, auth);
        Ok(request)
    }

    fn stream_live(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&TranscriptEvent),
    ) -> Result<Option<Transcript>> {
        let request = self.live_request()?;
        let samples = utterance.samples();
        let chunk_len = (self.config.sample_rate * LIVE_CHUNK_MS / 1000).max(1) as usize;

        let session = async {
            let (mut socket, _) = connect_async(request).await.map_err(live_error)?;
            for chunk in samples.chunks(chunk_len) {
                socket
                    .send(Message::binary(pcm_bytes(chunk)))
                    .await
                    .map_err(live_error)?;
            }
            socket
                .send(Message::text(CLOSE_STREAM.to_string()))
                .await
                .map_err(live_error)?;

            let mut transcript = LiveTranscript::default();
            while let Some(message) = socket.next().await {
                match message.map_err(live_error)? {
                    Message::Text(text) => {
                        if let Some(partial) = transcript.apply(text.as_str())? {
                            tracing::debug!("Partial transcript: {}", partial.text);
                            on_event(&partial);
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Ok::<_, TalkbackError>(transcript.finish())
        };

        match self.client.run(session, cancel) {
            None => Ok(None),
            Some(result) => {
                let transcript = result?;
                on_event(&transcript);
                Ok(Some(transcript))
            }
        }
    }

    fn request(&self, utterance: &Utterance, cancel: &CancellationToken) -> Result<Option<Transcript>> {
        let url = reqwest::Url::parse_with_params(LISTEN_URL, &self.query())
            .map_err(|e| TalkbackError::Other(format!("Invalid recognition URL: {e}")))?;
        let body = pcm_bytes(&utterance.samples());
        let request = self
            .client
            .http()
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "application/octet-stream")
            .body(body);

        let Some(mut stream) = self.client.open_stream(request, Stage::Recognition, cancel)? else {
            return Ok(None);
        };
        let mut raw = Vec::new();
        while let Some(chunk) = stream.next_chunk()? {
            raw.extend_from_slice(&chunk);
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }

        parse_transcript(&raw).map(Some)
    }
}

impl Recognizer for DeepgramRecognizer {
    fn recognize(&self, utterance: &Utterance) -> Result<Transcript> {
        self.request(utterance, &CancellationToken::new())?
            .ok_or_else(|| TalkbackError::service(Stage::Recognition, "request abandoned"))
    }

    fn recognize_stream(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&TranscriptEvent),
    ) -> Result<Option<Transcript>> {
        if self.config.live {
            return self.stream_live(utterance, cancel, on_event);
        }
        let transcript = self.request(utterance, cancel)?;
        if let Some(ref t) = transcript {
            on_event(t);
        }
        Ok(transcript)
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn name(&self) -> &str {
        "deepgram"
    }
}

fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn parse_transcript(raw: &[u8]) -> Result<Transcript> {
    let response: ListenResponse = serde_json::from_slice(raw).map_err(|e| {
        TalkbackError::service(Stage::Recognition, format!("Unexpected response: {e}"))
    })?;
    let text = response
        .results
        .channels
        .first()
        .and_then(|c| c.alternatives.first())
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default();
    Ok(Transcript::final_text(text))
}
