//! Speech-to-text (STT) processing

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::pipeline::{Transcriber, Transcript, Utterance};
use crate::{Error, Result};

/// Verbose response from the `OpenAI` transcription API
#[derive(Deserialize)]
struct WhisperVerboseResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Option<serde_json::Value>,
}

/// Response from Deepgram transcription API
#[derive(Deserialize)]
struct DeepgramResponse {
    #[serde(default)]
    metadata: Option<DeepgramMetadata>,
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramMetadata {
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    detected_language: Option<String>,
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    #[default]
    Whisper,
    /// Deepgram
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl fmt::Display for SttProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Whisper => "whisper",
            Self::Deepgram => "deepgram",
        })
    }
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new_whisper(
        api_key: SecretString,
        base_url: &str,
        model: String,
        temperature: f32,
    ) -> Result<Self> {
        Self::build(api_key, base_url, model, temperature, SttProvider::Whisper)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        Self::build(
            api_key,
            "https://api.deepgram.com/v1",
            model,
            0.0,
            SttProvider::Deepgram,
        )
    }

    fn build(
        api_key: SecretString,
        base_url: &str,
        model: String,
        temperature: f32,
        provider: SttProvider,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("{provider} API key required for STT")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            provider,
        })
    }

    /// Backend in use
    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe using `OpenAI` Whisper with a verbose result
    async fn transcribe_whisper(&self, audio: Vec<u8>, language: Option<&str>) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("temperature", self.temperature.to_string())
            .text("response_format", "verbose_json");

        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Transcription(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transcription(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Transcription(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        parse_whisper(&body)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>, language: Option<&str>) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let mut query = vec![("model", self.model.as_str()), ("punctuate", "true")];
        match language {
            Some(language) => query.push(("language", language)),
            None => query.push(("detect_language", "true")),
        }

        let response = self
            .client
            .post(format!("{}/listen", self.base_url))
            .query(&query)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                Error::Transcription(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transcription(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Transcription(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        parse_deepgram(&body)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(
        &self,
        utterance: &Utterance,
        language_hint: Option<&str>,
    ) -> Result<Transcript> {
        let wav = utterance.to_wav()?;

        let transcript = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav, language_hint).await?,
            SttProvider::Deepgram => self.transcribe_deepgram(wav, language_hint).await?,
        };

        tracing::debug!(transcript = %transcript.text, "transcription complete");
        Ok(transcript)
    }
}

fn parse_whisper(body: &str) -> Result<Transcript> {
    let result: WhisperVerboseResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "failed to parse Whisper response");
        Error::Transcription(format!("invalid Whisper response: {e}"))
    })?;

    Ok(Transcript {
        text: result.text,
        language: result.language,
        duration: result.duration,
        segments: result.segments,
    })
}

fn parse_deepgram(body: &str) -> Result<Transcript> {
    let result: DeepgramResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "failed to parse Deepgram response");
        Error::Transcription(format!("invalid Deepgram response: {e}"))
    })?;

    let channel = result.results.channels.first();
    let text = channel
        .and_then(|c| c.alternatives.first())
        .map(|a| a.transcript.clone())
        .unwrap_or_default();

    Ok(Transcript {
        text,
        language: channel.and_then(|c| c.detected_language.clone()),
        duration: result.metadata.and_then(|m| m.duration),
        segments: None,
    })
}
