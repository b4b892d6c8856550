//! Utterance endpoint detection
//!
//! Energy-based: a chunk whose RMS is above the threshold counts as speech.
//! An utterance ends after enough trailing silence, or when it hits the
//! length cap.

use crate::config::AudioConfig;

/// Ambient RMS is multiplied by this to get the calibrated threshold
const AMBIENT_MARGIN: f32 = 1.5;

/// Where the detector is in the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Waiting for speech
    Waiting,
    /// Speech seen, accumulating until silence
    Speaking,
}

/// Finds the end of a spoken utterance in a stream of sample chunks
#[derive(Debug, Clone)]
pub struct EndpointDetector {
    base_threshold: f32,
    threshold: f32,
    silence_samples: usize,
    min_speech_samples: usize,
    max_samples: usize,
    state: EndpointState,
    buffer: Vec<f32>,
    speech_counter: usize,
    silence_counter: usize,
}

impl EndpointDetector {
    /// Create a detector from audio settings at the given sample rate
    #[must_use]
    pub fn new(config: &AudioConfig, sample_rate: u32) -> Self {
        let per_ms = |ms: u64| {
            usize::try_from(ms.saturating_mul(u64::from(sample_rate)) / 1000).unwrap_or(usize::MAX)
        };

        Self {
            base_threshold: config.energy_threshold,
            threshold: config.energy_threshold,
            silence_samples: per_ms(config.silence_ms),
            min_speech_samples: per_ms(config.min_speech_ms),
            max_samples: per_ms(config.max_utterance_secs.saturating_mul(1000)),
            state: EndpointState::Waiting,
            buffer: Vec::new(),
            speech_counter: 0,
            silence_counter: 0,
        }
    }

    /// Feed a chunk; returns true once an utterance is complete
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let energy = rms(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            EndpointState::Waiting => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.speech_counter = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
                false
            }
            EndpointState::Speaking => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_counter += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance hit length cap");
                    return true;
                }

                if self.silence_counter > self.silence_samples {
                    if self.speech_counter >= self.min_speech_samples {
                        tracing::debug!(
                            samples = self.buffer.len(),
                            speech = self.speech_counter,
                            "utterance complete"
                        );
                        return true;
                    }

                    // A short blip followed by silence is noise
                    tracing::trace!(speech = self.speech_counter, "too short, resetting");
                    self.reset();
                }

                false
            }
        }
    }

    /// Take the completed utterance and go back to waiting
    pub fn take_utterance(&mut self) -> Vec<f32> {
        let samples = std::mem::take(&mut self.buffer);
        self.reset();
        samples
    }

    /// Raise the threshold above measured ambient noise
    ///
    /// Never drops below the configured threshold. Returns the new value.
    pub fn calibrate(&mut self, ambient: &[f32]) -> f32 {
        let ambient_rms = rms(ambient);
        self.threshold = self.base_threshold.max(ambient_rms * AMBIENT_MARGIN);
        tracing::info!(
            ambient = ambient_rms,
            threshold = self.threshold,
            "calibrated for ambient noise"
        );
        self.threshold
    }

    /// Discard the current utterance
    pub fn reset(&mut self) {
        self.state = EndpointState::Waiting;
        self.buffer.clear();
        self.speech_counter = 0;
        self.silence_counter = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// Energy threshold in effect
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// RMS energy of a chunk of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
