//! Configuration management for the dialogue loop
//!
//! Values are layered env > toml > default and built once at startup.

pub mod file;

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};

use crate::pipeline::{OutputMode, SegmenterConfig};
use crate::voice::{SttProvider, Voice};
use crate::{Error, Result};

use self::file::DialogueConfigFile;

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
Always respond in the language of the user's input. \
Keep answers short and conversational, in plain sentences without lists or markup, \
because every reply is spoken aloud.";

/// Default OpenAI-compatible API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Dialogue loop configuration
#[derive(Debug)]
pub struct Config {
    /// API keys
    pub api_keys: ApiKeys,

    /// Chat model settings
    pub llm: LlmConfig,

    /// Speech-to-text settings
    pub stt: SttConfig,

    /// Text-to-speech settings
    pub tts: TtsConfig,

    /// Turn and segmentation behavior
    pub dialogue: DialogueConfig,

    /// Microphone endpointing
    pub audio: AudioConfig,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper, and TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl ApiKeys {
    /// `OpenAI` key, required by every run
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is not set
    pub fn openai(&self) -> Result<SecretString> {
        Self::require(self.openai.as_ref(), "OPENAI_API_KEY")
    }

    /// `Deepgram` key, required when Deepgram is the STT provider
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is not set
    pub fn deepgram(&self) -> Result<SecretString> {
        Self::require(self.deepgram.as_ref(), "DEEPGRAM_API_KEY")
    }

    fn require(key: Option<&SecretString>, var: &str) -> Result<SecretString> {
        key.map(|k| SecretString::from(k.expose_secret().to_owned()))
            .ok_or_else(|| Error::Config(format!("{var} is not set")))
    }
}

/// Chat model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// API base URL
    pub base_url: String,

    /// First message of every conversation
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.2,
            base_url: DEFAULT_BASE_URL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Backend
    pub provider: SttProvider,

    /// Model identifier
    pub model: String,

    /// Language hint for every transcription
    pub language: Option<String>,

    /// Sampling temperature (Whisper only)
    pub temperature: f32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::Whisper,
            model: "whisper-1".to_string(),
            language: None,
            temperature: 0.0,
        }
    }
}

/// Text-to-speech settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Model identifier
    pub model: String,

    /// Voice used for every segment
    pub voice: Voice,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: Voice::default(),
            speed: 1.0,
        }
    }
}

/// Turn and segmentation behavior
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// A segment must be longer than this many characters
    pub min_sentence_chars: usize,

    /// Characters that end a sentence
    pub terminators: Vec<char>,

    /// Keep generating while speaking
    pub pipelined: bool,

    /// Segments buffered ahead of playback when pipelined
    pub segment_queue: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        let segmenter = SegmenterConfig::default();
        Self {
            min_sentence_chars: segmenter.min_chars,
            terminators: segmenter.terminators,
            pipelined: false,
            segment_queue: 4,
        }
    }
}

impl DialogueConfig {
    /// Segmenter settings
    #[must_use]
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            min_chars: self.min_sentence_chars,
            terminators: self.terminators.clone(),
        }
    }

    /// Output mode for the turn controller
    #[must_use]
    pub const fn output_mode(&self) -> OutputMode {
        if self.pipelined {
            OutputMode::Pipelined {
                queue: self.segment_queue,
            }
        } else {
            OutputMode::Serial
        }
    }
}

/// Microphone endpointing
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    /// RMS level above which a chunk counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_ms: u64,

    /// Speech shorter than this is discarded as noise
    pub min_speech_ms: u64,

    /// Utterance length cap
    pub max_utterance_secs: u64,

    /// Ambient noise sampling before the first turn
    pub calibration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            silence_ms: 800,
            min_speech_ms: 300,
            max_utterance_secs: 30,
            calibration_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::from_sources(fc, &|key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown voice, provider, or output mode
    pub fn from_sources(
        fc: DialogueConfigFile,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            model: env("BEACON_DIALOGUE_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(llm_defaults.model),
            temperature: fc.llm.temperature.unwrap_or(llm_defaults.temperature),
            base_url: env("OPENAI_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(llm_defaults.base_url),
            system_prompt: fc.llm.system_prompt.unwrap_or(llm_defaults.system_prompt),
        };

        let stt_defaults = SttConfig::default();
        let provider = fc
            .stt
            .provider
            .as_deref()
            .map(str::parse::<SttProvider>)
            .transpose()?
            .unwrap_or_default();
        let stt = SttConfig {
            provider,
            model: fc.stt.model.unwrap_or_else(|| match provider {
                SttProvider::Whisper => stt_defaults.model,
                SttProvider::Deepgram => "nova-2".to_string(),
            }),
            language: env("BEACON_DIALOGUE_STT_LANGUAGE").or(fc.stt.language),
            temperature: fc.stt.temperature.unwrap_or(stt_defaults.temperature),
        };

        let tts_defaults = TtsConfig::default();
        let tts = TtsConfig {
            model: fc.tts.model.unwrap_or(tts_defaults.model),
            voice: env("BEACON_DIALOGUE_TTS_VOICE")
                .or(fc.tts.voice)
                .map(|v| v.parse::<Voice>())
                .transpose()?
                .unwrap_or(tts_defaults.voice),
            speed: fc.tts.speed.unwrap_or(tts_defaults.speed),
        };

        let dialogue_defaults = DialogueConfig::default();
        let pipelined = env("BEACON_DIALOGUE_OUTPUT_MODE")
            .or(fc.dialogue.output_mode)
            .map(|mode| parse_output_mode(&mode))
            .transpose()?
            .unwrap_or(dialogue_defaults.pipelined);
        let dialogue = DialogueConfig {
            min_sentence_chars: fc
                .dialogue
                .min_sentence_chars
                .unwrap_or(dialogue_defaults.min_sentence_chars),
            terminators: fc
                .dialogue
                .terminators
                .map_or(dialogue_defaults.terminators, |t| t.chars().collect()),
            pipelined,
            segment_queue: fc
                .dialogue
                .segment_queue
                .unwrap_or(dialogue_defaults.segment_queue),
        };

        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            energy_threshold: fc
                .audio
                .energy_threshold
                .unwrap_or(audio_defaults.energy_threshold),
            silence_ms: fc.audio.silence_ms.unwrap_or(audio_defaults.silence_ms),
            min_speech_ms: fc
                .audio
                .min_speech_ms
                .unwrap_or(audio_defaults.min_speech_ms),
            max_utterance_secs: fc
                .audio
                .max_utterance_secs
                .unwrap_or(audio_defaults.max_utterance_secs),
            calibration_ms: fc
                .audio
                .calibration_ms
                .unwrap_or(audio_defaults.calibration_ms),
        };

        Ok(Self {
            api_keys,
            llm,
            stt,
            tts,
            dialogue,
            audio,
        })
    }

    /// Check that the configuration can run a conversation
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        self.api_keys.openai()?;

        if self.stt.provider == SttProvider::Deepgram {
            self.api_keys.deepgram()?;
        }

        url::Url::parse(&self.llm.base_url)
            .map_err(|e| Error::Config(format!("invalid base_url '{}': {e}", self.llm.base_url)))?;

        if self.dialogue.segment_queue == 0 {
            return Err(Error::Config("segment_queue must be at least 1".to_string()));
        }

        if self.dialogue.terminators.is_empty() {
            return Err(Error::Config(
                "at least one sentence terminator is required".to_string(),
            ));
        }

        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(Error::Config(format!(
                "tts speed {} is outside 0.25 to 4.0",
                self.tts.speed
            )));
        }

        if self.audio.energy_threshold <= 0.0 {
            return Err(Error::Config("energy_threshold must be positive".to_string()));
        }

        Ok(())
    }
}

/// Parse an output mode name; returns true for pipelined
fn parse_output_mode(mode: &str) -> Result<bool> {
    match mode.trim().to_lowercase().as_str() {
        "serial" => Ok(false),
        "pipelined" | "pipeline" => Ok(true),
        other => Err(Error::Config(format!(
            "unknown output mode '{other}', expected serial or pipelined"
        ))),
    }
}
