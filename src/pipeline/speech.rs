//! Speech output: synthesize a segment, then play it to completion

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{Player, SpeechSegment, Synthesizer};
use crate::voice::Voice;
use crate::{Error, Result};

/// Drives a synthesizer and a player over segments, one at a time
///
/// `speak` takes `&mut self`, so two segments can never be in flight on
/// the same player.
pub struct SpeechOutputPipeline {
    synthesizer: Box<dyn Synthesizer>,
    player: Box<dyn Player>,
    voice: Voice,
    cancel: CancellationToken,
    spoken: usize,
}

impl SpeechOutputPipeline {
    /// Create a pipeline speaking with `voice`
    #[must_use]
    pub fn new(synthesizer: Box<dyn Synthesizer>, player: Box<dyn Player>, voice: Voice) -> Self {
        Self {
            synthesizer,
            player,
            voice,
            cancel: CancellationToken::new(),
            spoken: 0,
        }
    }

    /// Abort in-flight synthesis or playback when `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Synthesize and play one segment, returning after playback finishes
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` or `Error::Playback` from the collaborators,
    /// or `Error::Cancelled` if shutdown was requested mid-segment
    pub async fn speak(&mut self, segment: SpeechSegment) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::debug!(index = segment.index(), text = segment.text(), "speaking");

        let start = Instant::now();
        let audio = tokio::select! {
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            audio = self.synthesizer.synthesize(segment.text(), self.voice) => audio?,
        };
        let synth_ms = start.elapsed().as_millis();

        let start = Instant::now();
        tokio::select! {
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            played = self.player.play(audio) => played?,
        }

        self.spoken += 1;
        tracing::debug!(
            index = segment.index(),
            synth_ms,
            play_ms = start.elapsed().as_millis(),
            "segment spoken"
        );
        Ok(())
    }

    /// Voice used for synthesis
    #[must_use]
    pub const fn voice(&self) -> Voice {
        self.voice
    }

    /// Total segments spoken by this pipeline
    #[must_use]
    pub const fn spoken(&self) -> usize {
        self.spoken
    }
}
