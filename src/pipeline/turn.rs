//! Turn controller
//!
//! Runs listen → transcribe → generate → speak, one turn at a time, until
//! cancelled. A failed turn is logged and the controller goes back to
//! listening. History is only touched at two points: a user message after a
//! non-blank transcript, and an assistant message after the response stream
//! reached its end.

use std::fmt;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    AudioSource, FragmentStream, ResponseGenerator, SegmenterConfig, SentenceSegmenter,
    SpeechOutputPipeline, SpeechSegment, Transcriber,
};
use crate::conversation::ConversationHistory;
use crate::{Error, Result};

/// Pause after a capture failure before listening again
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where the controller is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Between turns
    Idle,
    /// Waiting for an utterance
    Listening,
    /// Waiting for the transcript
    Transcribing,
    /// Waiting for the first response fragment
    AwaitingResponse,
    /// Consuming fragments and speaking segments
    Speaking,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::AwaitingResponse => "awaiting_response",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// How generation and speech are coupled within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Stop pulling fragments while a segment is being spoken
    #[default]
    Serial,
    /// Keep generating while speaking, up to `queue` segments ahead
    Pipelined {
        /// Bounded queue between segmenter and speech output
        queue: usize,
    },
}

/// How a turn ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank transcript; history untouched
    Skipped,
    /// Response generated, spoken, and recorded
    Completed {
        /// Full response text appended to history
        response: String,
        /// Number of segments spoken
        segments: usize,
    },
}

/// Sequences conversational turns and owns the history
pub struct TurnController {
    source: Box<dyn AudioSource>,
    transcriber: Box<dyn Transcriber>,
    generator: Box<dyn ResponseGenerator>,
    speech: SpeechOutputPipeline,
    history: ConversationHistory,
    segmenter: SegmenterConfig,
    mode: OutputMode,
    language: Option<String>,
    state: TurnState,
    cancel: CancellationToken,
}

impl TurnController {
    /// Create a controller over the given collaborators
    #[must_use]
    pub fn new(
        history: ConversationHistory,
        source: Box<dyn AudioSource>,
        transcriber: Box<dyn Transcriber>,
        generator: Box<dyn ResponseGenerator>,
        speech: SpeechOutputPipeline,
    ) -> Self {
        Self {
            source,
            transcriber,
            generator,
            speech,
            history,
            segmenter: SegmenterConfig::default(),
            mode: OutputMode::default(),
            language: None,
            state: TurnState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the sentence trigger settings
    #[must_use]
    pub fn with_segmenter(mut self, config: SegmenterConfig) -> Self {
        self.segmenter = config;
        self
    }

    /// Choose serial or pipelined speech output
    #[must_use]
    pub const fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Language hint passed to the transcriber
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Stop the loop and in-flight speech when `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.speech = self.speech.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Conversation so far
    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Consume the controller, returning the conversation
    #[must_use]
    pub fn into_history(self) -> ConversationHistory {
        self.history
    }

    /// Current position within the turn
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Run turns until the cancellation token fires
    ///
    /// Failed turns are logged and never end the loop.
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self) {
        let cancel = self.cancel.clone();
        tracing::info!(mode = ?self.mode, "dialogue loop started");

        loop {
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.run_turn() => outcome,
            };

            match outcome {
                Ok(_) => {}
                Err(e) if e.is_shutdown() => break,
                Err(e) => {
                    tracing::warn!(kind = e.kind(), error = %e, "turn aborted");
                    if matches!(e, Error::Capture(_) | Error::Audio(_)) {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(CAPTURE_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }

        self.state = TurnState::Idle;
        tracing::info!(turns = self.history.turns(), "dialogue loop stopped");
    }

    /// Run a single turn
    ///
    /// # Errors
    ///
    /// Returns the first collaborator error; history is left as it was
    /// before the failing step
    #[allow(clippy::future_not_send)]
    pub async fn run_turn(&mut self) -> Result<TurnOutcome> {
        let span = tracing::info_span!("turn", id = %uuid::Uuid::new_v4());
        let result = self.turn().instrument(span).await;
        transition(&mut self.state, TurnState::Idle);
        result
    }

    #[allow(clippy::future_not_send)]
    async fn turn(&mut self) -> Result<TurnOutcome> {
        transition(&mut self.state, TurnState::Listening);
        let start = Instant::now();
        let utterance = self.source.listen().await?;
        tracing::debug!(
            samples = utterance.samples.len(),
            audio_ms = utterance.duration().as_millis(),
            elapsed_ms = start.elapsed().as_millis(),
            "utterance captured"
        );

        transition(&mut self.state, TurnState::Transcribing);
        let start = Instant::now();
        let transcript = self
            .transcriber
            .transcribe(&utterance, self.language.as_deref())
            .await?;
        drop(utterance);

        if transcript.is_blank() {
            tracing::debug!("blank transcript, listening again");
            return Ok(TurnOutcome::Skipped);
        }

        tracing::info!(
            text = %transcript.text,
            language = transcript.language.as_deref().unwrap_or("-"),
            elapsed_ms = start.elapsed().as_millis(),
            "user said"
        );
        self.history.push_user(transcript.text);

        transition(&mut self.state, TurnState::AwaitingResponse);
        let start = Instant::now();
        let stream = self.generator.generate(&self.history).await?;
        let segmenter = SentenceSegmenter::new(self.segmenter.clone());

        let (response, segments) = match self.mode {
            OutputMode::Serial => self.respond_serial(stream, segmenter).await?,
            OutputMode::Pipelined { queue } => {
                self.respond_pipelined(stream, segmenter, queue).await?
            }
        };

        tracing::info!(
            response = %response,
            segments,
            elapsed_ms = start.elapsed().as_millis(),
            "response complete"
        );
        self.history.push_assistant(response.clone());

        Ok(TurnOutcome::Completed { response, segments })
    }

    /// Pull a fragment, speak any finished sentence, repeat
    async fn respond_serial(
        &mut self,
        mut stream: FragmentStream,
        mut segmenter: SentenceSegmenter,
    ) -> Result<(String, usize)> {
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            transition(&mut self.state, TurnState::Speaking);

            if let Some(segment) = segmenter.feed(&fragment) {
                self.speech.speak(segment).await?;
            }
        }

        if let Some(segment) = segmenter.flush() {
            transition(&mut self.state, TurnState::Speaking);
            self.speech.speak(segment).await?;
        }

        let segments = segmenter.emitted();
        Ok((segmenter.into_response(), segments))
    }

    /// Generate into a bounded queue while a consumer speaks from it
    async fn respond_pipelined(
        &mut self,
        mut stream: FragmentStream,
        mut segmenter: SentenceSegmenter,
        queue: usize,
    ) -> Result<(String, usize)> {
        let (tx, rx) = mpsc::channel::<SpeechSegment>(queue.max(1));
        let state = &mut self.state;
        let speech = &mut self.speech;

        let producer = async move {
            while let Some(fragment) = stream.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                transition(state, TurnState::Speaking);

                if let Some(segment) = segmenter.feed(&fragment) {
                    tx.send(segment)
                        .await
                        .map_err(|_| Error::Playback("speech output stopped".to_string()))?;
                }
            }

            if let Some(segment) = segmenter.flush() {
                transition(state, TurnState::Speaking);
                tx.send(segment)
                    .await
                    .map_err(|_| Error::Playback("speech output stopped".to_string()))?;
            }

            let segments = segmenter.emitted();
            Ok::<_, Error>((segmenter.into_response(), segments))
        };

        let consumer = async move {
            let mut queued = ReceiverStream::new(rx);
            while let Some(segment) = queued.next().await {
                speech.speak(segment).await?;
            }
            Ok::<_, Error>(())
        };

        let (reply, ()) = tokio::try_join!(producer, consumer)?;
        Ok(reply)
    }
}

fn transition(state: &mut TurnState, next: TurnState) {
    if *state != next {
        tracing::debug!(from = %state, to = %next, "turn state");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(TurnState::AwaitingResponse.to_string(), "awaiting_response");
        assert_eq!(TurnState::Idle.to_string(), "idle");
    }

    #[test]
    fn test_serial_is_default() {
        assert_eq!(OutputMode::default(), OutputMode::Serial);
    }

    #[test]
    fn test_transition_updates_state() {
        let mut state = TurnState::Idle;
        transition(&mut state, TurnState::Listening);
        assert_eq!(state, TurnState::Listening);
        transition(&mut state, TurnState::Listening);
        assert_eq!(state, TurnState::Listening);
    }
}
