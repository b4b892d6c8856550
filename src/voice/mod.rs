//! Voice processing module
//!
//! Microphone capture and endpointing, speaker playback, and the hosted
//! speech-to-text and text-to-speech adapters.

mod capture;
mod endpoint;
mod microphone;
mod playback;
mod stt;
mod tts;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use endpoint::{EndpointDetector, EndpointState, rms};
pub use microphone::MicrophoneSource;
pub use playback::{AudioPlayback, decode_mp3, resample};
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, Voice};
