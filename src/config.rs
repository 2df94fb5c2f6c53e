use crate::audio::vad::FrameFormat;
use crate::defaults;
use crate::error::{Result, TalkbackError};
#[cfg(feature = "remote")]
use crate::llm::openai::ChatCompletionsConfig;
use crate::pipeline::orchestrator::SessionConfig;
#[cfg(feature = "remote")]
use crate::stt::deepgram::DeepgramConfig;
use crate::tts::synthesizer::VoiceParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub conversation: ConversationConfig,
    pub recognition: RecognitionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
}

/// Audio capture and framing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub vad_aggressiveness: u8,
    pub silence_timeout_ms: u32,
    pub capture_queue_frames: usize,
}

/// Turn-taking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationConfig {
    pub system_prompt: Option<String>,
    /// Spoken once when the session starts.
    pub greeting: Option<String>,
    pub history_turns: usize,
    pub phrase_threshold: usize,
    pub turn_timeout_ms: u64,
    pub barge_in: bool,
}

/// Speech recognition service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    /// Stream each utterance over the live websocket instead of one
    /// prerecorded request.
    pub live: bool,
    pub api_key: Option<String>,
}

/// Reply generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible endpoint root.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: Option<String>,
}

/// Speech synthesis service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub voice_id: String,
    pub model: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub speed: f32,
    pub api_key: Option<String>,
    pub workers: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            vad_aggressiveness: defaults::VAD_AGGRESSIVENESS,
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            capture_queue_frames: defaults::CAPTURE_QUEUE_FRAMES,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(defaults::SYSTEM_PROMPT.to_string()),
            greeting: None,
            history_turns: defaults::HISTORY_TURNS,
            phrase_threshold: defaults::PHRASE_THRESHOLD,
            turn_timeout_ms: defaults::TURN_TIMEOUT_MS,
            barge_in: true,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            model: defaults::RECOGNITION_MODEL.to_string(),
            language: defaults::RECOGNITION_LANGUAGE.to_string(),
            smart_format: true,
            live: true,
            api_key: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::GENERATION_BASE_URL.to_string(),
            model: defaults::GENERATION_MODEL.to_string(),
            temperature: defaults::GENERATION_TEMPERATURE,
            max_tokens: defaults::GENERATION_MAX_TOKENS,
            api_key: None,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        let voice = VoiceParams::default();
        Self {
            voice_id: voice.voice_id,
            model: voice.model,
            stability: voice.stability,
            similarity_boost: voice.similarity_boost,
            style: voice.style,
            use_speaker_boost: voice.use_speaker_boost,
            speed: voice.speed,
            api_key: None,
            workers: defaults::SYNTHESIS_WORKERS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. Values are not validated here; see
    /// [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TalkbackError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                TalkbackError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(TalkbackError::ConfigFileNotFound { .. }) => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DEEPGRAM_API_KEY → recognition.api_key
    /// - GEMINI_API_KEY → generation.api_key
    /// - ELEVENLABS_API_KEY → synthesis.api_key
    /// - TALKBACK_INPUT_DEVICE → audio.input_device
    /// - TALKBACK_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env("DEEPGRAM_API_KEY") {
            self.recognition.api_key = Some(key);
        }
        if let Some(key) = non_empty_env("GEMINI_API_KEY") {
            self.generation.api_key = Some(key);
        }
        if let Some(key) = non_empty_env("ELEVENLABS_API_KEY") {
            self.synthesis.api_key = Some(key);
        }
        if let Some(device) = non_empty_env("TALKBACK_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }
        if let Some(device) = non_empty_env("TALKBACK_OUTPUT_DEVICE") {
            self.audio.output_device = Some(device);
        }
        self
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.session_config().map(|_| ())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/talkback/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            TalkbackError::Other("Could not determine config directory".to_string())
        })?;
        Ok(dir.join("talkback").join("config.toml"))
    }

    /// Runtime settings for a [`crate::Session`], validated.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let format = FrameFormat::new(self.audio.sample_rate, self.audio.frame_ms)?;
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let config = SessionConfig {
            format,
            vad_aggressiveness: self.audio.vad_aggressiveness,
            silence_timeout_ms: self.audio.silence_timeout_ms,
            capture_queue_frames: self.audio.capture_queue_frames,
            system_prompt: non_blank(&self.conversation.system_prompt),
            greeting: non_blank(&self.conversation.greeting),
            history_turns: self.conversation.history_turns,
            phrase_threshold: self.conversation.phrase_threshold,
            turn_timeout: Duration::from_millis(self.conversation.turn_timeout_ms),
            barge_in: self.conversation.barge_in,
            voice: self.voice_params(),
            synthesis_workers: self.synthesis.workers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            voice_id: self.synthesis.voice_id.clone(),
            model: self.synthesis.model.clone(),
            stability: self.synthesis.stability,
            similarity_boost: self.synthesis.similarity_boost,
            style: self.synthesis.style,
            use_speaker_boost: self.synthesis.use_speaker_boost,
            speed: self.synthesis.speed,
        }
    }

    #[cfg(feature = "remote")]
    pub fn deepgram_config(&self) -> DeepgramConfig {
        DeepgramConfig {
            api_key: self.recognition.api_key.clone(),
            model: self.recognition.model.clone(),
            language: self.recognition.language.clone(),
            smart_format: self.recognition.smart_format,
            live: self.recognition.live,
            sample_rate: self.audio.sample_rate,
        }
    }

    #[cfg(feature = "remote")]
    pub fn chat_completions_config(&self) -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            api_key: self.generation.api_key.clone(),
            base_url: self.generation.base_url.clone(),
            model: self.generation.model.clone(),
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}
