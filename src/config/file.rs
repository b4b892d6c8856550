//! TOML configuration file loading
//!
//! Supports `~/.config/beacon-dialogue/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DialogueConfigFile {
    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Turn and segmentation behavior
    #[serde(default)]
    pub dialogue: DialogueFileConfig,

    /// Microphone endpointing
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Chat model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4")
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// API base URL, for OpenAI-compatible servers
    pub base_url: Option<String>,

    /// System prompt placed at the start of every history
    pub system_prompt: Option<String>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,

    /// Model (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// Language hint passed to the service (e.g. "ru")
    pub language: Option<String>,

    /// Sampling temperature (Whisper only)
    pub temperature: Option<f32>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Model (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice name (e.g. "alloy")
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Turn and segmentation behavior
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// A segment must be longer than this many characters
    pub min_sentence_chars: Option<usize>,

    /// Sentence terminator characters, as one string (e.g. ".!?")
    pub terminators: Option<String>,

    /// "serial" or "pipelined"
    pub output_mode: Option<String>,

    /// Segments buffered ahead of playback in pipelined mode
    pub segment_queue: Option<usize>,
}

/// Microphone endpointing
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub energy_threshold: Option<f32>,
    pub silence_ms: Option<u64>,
    pub min_speech_ms: Option<u64>,
    pub max_utterance_secs: Option<u64>,
    pub calibration_ms: Option<u64>,
}

/// Load the TOML config file
///
/// An explicit path must exist. Without one, the standard path is used and a
/// missing file yields defaults.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_file(explicit: Option<&Path>) -> Result<DialogueConfigFile> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(DialogueConfigFile::default()),
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = parse(&content).inspect_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to parse config file");
    })?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns `Error::Toml` for malformed input
pub fn parse(content: &str) -> Result<DialogueConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/beacon-dialogue/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "omni", "beacon-dialogue")
        .map(|d| d.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = parse("").unwrap();
        assert!(config.llm.model.is_none());
        assert!(config.dialogue.terminators.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = parse(
            r#"
            [stt]
            language = "ru"

            [dialogue]
            output_mode = "pipelined"
            segment_queue = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.stt.language.as_deref(), Some("ru"));
        assert_eq!(config.dialogue.output_mode.as_deref(), Some("pipelined"));
        assert_eq!(config.dialogue.segment_queue, Some(2));
        assert!(config.tts.voice.is_none());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(parse("[llm\nmodel ="), Err(Error::Toml(_))));
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config_file(Some(&missing)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_explicit_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tts]\nvoice = \"nova\"\n").unwrap();

        let config = load_config_file(Some(&path)).unwrap();
        assert_eq!(config.tts.voice.as_deref(), Some("nova"));
    }
}
