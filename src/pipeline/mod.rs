//! Streaming dialogue pipeline
//!
//! Boundary types and collaborator traits for one conversational turn:
//! capture → transcription → generation → segmentation → synthesis → playback.
//! Concrete adapters live in [`crate::voice`] and [`crate::llm`]; tests swap
//! in scripted fakes.

mod segmenter;
mod speech;
mod turn;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

pub use segmenter::{SegmenterConfig, SentenceSegmenter};
pub use speech::SpeechOutputPipeline;
pub use turn::{OutputMode, TurnController, TurnOutcome, TurnState};

use crate::Result;
use crate::conversation::ConversationHistory;
use crate::voice::{Voice, samples_to_wav};

/// One span of captured speech, bounded by silence
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Mono f32 samples in [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Utterance {
    /// Create an utterance from mono samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Length of the captured audio
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as 16-bit mono WAV for STT upload
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate)
    }
}

/// Result of transcribing one utterance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    /// Recognized text
    pub text: String,

    /// Detected or hinted language, when the service reports it
    pub language: Option<String>,

    /// Audio duration in seconds, when the service reports it
    pub duration: Option<f64>,

    /// Provider-specific segment detail, kept opaque
    pub segments: Option<serde_json::Value>,
}

impl Transcript {
    /// Transcript with text only
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Whether the text is empty or whitespace only
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A complete sentence ready for synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    index: usize,
    text: String,
}

impl SpeechSegment {
    /// Create a segment with its position in the response
    #[must_use]
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Emission order within the response, starting at 0
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Sentence text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the segment, returning its text
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

impl fmt::Display for SpeechSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Synthesized audio for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono f32 PCM samples
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from mono samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Whether there is anything to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Lazy, ordered stream of response fragments
///
/// `None` is the end-of-response signal. An `Err` item is terminal and means
/// the response broke off before it finished.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Microphone-like source producing one utterance per call
///
/// Not `Send`: device streams are pinned to the thread that opened them.
#[async_trait(?Send)]
pub trait AudioSource {
    /// Block until one utterance has been captured
    async fn listen(&mut self) -> Result<Utterance>;
}

/// Speech-to-text boundary
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance
    async fn transcribe(
        &self,
        utterance: &Utterance,
        language_hint: Option<&str>,
    ) -> Result<Transcript>;
}

/// Language model boundary
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Start generating a reply to the full history
    async fn generate(&self, history: &ConversationHistory) -> Result<FragmentStream>;
}

/// Text-to-speech boundary
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one sentence with the given voice
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<AudioBuffer>;
}

/// Serial audio output
#[async_trait]
pub trait Player: Send {
    /// Play a buffer, resolving once it has finished
    async fn play(&mut self, buffer: AudioBuffer) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_transcripts() {
        assert!(Transcript::from_text("").is_blank());
        assert!(Transcript::from_text(" ").is_blank());
        assert!(Transcript::from_text("\n\t ").is_blank());
        assert!(!Transcript::from_text(" hi ").is_blank());
    }

    #[test]
    fn test_utterance_duration() {
        let utterance = Utterance::new(vec![0.0; 8000], 16000);
        assert_eq!(utterance.duration(), Duration::from_millis(500));

        let silent = Utterance::new(Vec::new(), 0);
        assert_eq!(silent.duration(), Duration::ZERO);
    }

    #[test]
    fn test_utterance_to_wav_has_riff_header() {
        let utterance = Utterance::new(vec![0.1, -0.1, 0.2], 16000);
        let wav = utterance.to_wav().unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
