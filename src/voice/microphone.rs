//! Microphone-backed utterance source

use std::time::Duration;

use async_trait::async_trait;

use super::{AudioCapture, EndpointDetector};
use crate::config::AudioConfig;
use crate::pipeline::{AudioSource, Utterance};
use crate::{Error, Result};

/// How often the capture buffer is drained (100ms at 16kHz)
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Listens on the default microphone and returns one utterance per call
///
/// The input stream only runs while `listen` or `calibrate` is in progress,
/// so synthesized speech is never picked up.
pub struct MicrophoneSource {
    capture: AudioCapture,
    detector: EndpointDetector,
}

impl MicrophoneSource {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let capture = AudioCapture::new()?;
        let detector = EndpointDetector::new(config, capture.sample_rate());
        Ok(Self { capture, detector })
    }

    /// Measure ambient noise and raise the speech threshold to clear it
    ///
    /// Run once before the first turn. Returns the threshold in effect.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the stream fails
    #[allow(clippy::future_not_send)]
    pub async fn calibrate(&mut self, duration: Duration) -> Result<f32> {
        self.capture.start()?;
        self.capture.clear_buffer();
        tokio::time::sleep(duration).await;
        let ambient = self.capture.take_buffer();
        self.capture.stop();

        if self.capture.has_failed() {
            return Err(Error::Capture("stream error during calibration".to_string()));
        }

        Ok(self.detector.calibrate(&ambient))
    }

    /// Speech threshold in effect
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.detector.threshold()
    }

    #[allow(clippy::future_not_send)]
    async fn wait_for_utterance(&mut self) -> Result<Vec<f32>> {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            if self.capture.has_failed() {
                return Err(Error::Capture("input stream failed".to_string()));
            }

            let samples = self.capture.take_buffer();
            if samples.is_empty() {
                continue;
            }

            if self.detector.process(&samples) {
                return Ok(self.detector.take_utterance());
            }
        }
    }
}

#[async_trait(?Send)]
impl AudioSource for MicrophoneSource {
    async fn listen(&mut self) -> Result<Utterance> {
        self.detector.reset();
        self.capture.start()?;
        self.capture.clear_buffer();
        tracing::debug!("listening");

        let result = self.wait_for_utterance().await;
        self.capture.stop();

        let samples = result?;
        Ok(Utterance::new(samples, self.capture.sample_rate()))
    }
}
