//! ElevenLabs streaming synthesizer producing raw PCM.

use crate::error::{Result, Stage, TalkbackError};
use crate::remote::{ByteStream, RemoteClient, require_key};
use crate::tts::synthesizer::{AudioStream, SpeechSynthesizer, VoiceParams};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Output rates the streaming endpoint offers as `pcm_<rate>`.
const PCM_RATES: &[u32] = &[8000, 16000, 22050, 24000, 44100, 48000];

pub struct ElevenLabsSynthesizer {
    client: RemoteClient,
    api_key: String,
    sample_rate: u32,
}

impl ElevenLabsSynthesizer {
    pub fn new(client: RemoteClient, api_key: Option<&str>, sample_rate: u32) -> Result<Self> {
        let api_key = require_key(api_key, "synthesis.api_key", "ELEVENLABS_API_KEY")?;
        if !PCM_RATES.contains(&sample_rate) {
            return Err(TalkbackError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: format!("{sample_rate}Hz has no matching synthesis output format"),
            });
        }
        Ok(Self {
            client,
            api_key,
            sample_rate,
        })
    }

    fn endpoint(&self, voice: &VoiceParams) -> String {
        format!(
            "{API_BASE}/{}/stream?output_format=pcm_{}",
            voice.voice_id, self.sample_rate
        )
    }
}

impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        cancel: &CancellationToken,
    ) -> Result<AudioStream<'_>> {
        let body = json!({
            "text": text,
            "model_id": voice.model,
            "voice_settings": {
                "stability": voice.stability,
                "similarity_boost": voice.similarity_boost,
                "style": voice.style,
                "use_speaker_boost": voice.use_speaker_boost,
                "speed": voice.speed,
            },
        });
        let body = serde_json::to_vec(&body)
            .map_err(|e| TalkbackError::service(Stage::Synthesis, e.to_string()))?;
        let request = self
            .client
            .http()
            .post(self.endpoint(voice))
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .body(body);

        match self.client.open_stream(request, Stage::Synthesis, cancel)? {
            Some(body) => Ok(Box::new(PcmChunks {
                body,
                decoder: PcmDecoder::default(),
            })),
            None => Ok(Box::new(std::iter::empty())),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

struct PcmChunks {
    body: ByteStream,
    decoder: PcmDecoder,
}

impl Iterator for PcmChunks {
    type Item = Result<Vec<i16>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.body.next_chunk() {
                Ok(Some(bytes)) => {
                    let samples = self.decoder.decode(&bytes);
                    if !samples.is_empty() {
                        return Some(Ok(samples));
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Little-endian i16 decoding across arbitrary chunk boundaries.
#[derive(Debug, Default)]
struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut input = bytes;
        let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
        if let Some(low) = self.carry.take() {
            match input.split_first() {
                Some((&high, rest)) => {
                    samples.push(i16::from_le_bytes([low, high]));
                    input = rest;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }
        let mut pairs = input.chunks_exact(2);
        samples.extend(pairs.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
        self.carry = pairs.remainder().first().copied();
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_carries_odd_byte() {
        let mut decoder = PcmDecoder::default();
        assert_eq!(decoder.decode(&[1, 0, 0xfe]), vec![1]);
        assert_eq!(decoder.decode(&[0xff]), vec![-2]);
        assert_eq!(decoder.decode(&[]), Vec::<i16>::new());
        assert_eq!(decoder.decode(&[2, 0]), vec![2]);
    }

    #[test]
    fn rejects_rate_without_output_format() {
        let result = ElevenLabsSynthesizer::new(RemoteClient::new().unwrap(), Some("k"), 32000);
        assert!(matches!(
            result,
            Err(TalkbackError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn endpoint_uses_voice_and_rate() {
        let synth = ElevenLabsSynthesizer::new(RemoteClient::new().unwrap(), Some("k"), 16000).unwrap();
        let voice = VoiceParams::default();
        assert_eq!(
            synth.endpoint(&voice),
            format!("{API_BASE}/{}/stream?output_format=pcm_16000", voice.voice_id)
        );
    }
}
