//! Beacon Dialogue - Streaming voice conversation with a language model
//!
//! This library provides the building blocks for a spoken dialogue loop:
//! - Microphone capture with silence endpointing
//! - Speech-to-text (`OpenAI` Whisper, Deepgram)
//! - Streamed chat completions, cut into sentences as they arrive
//! - Text-to-speech and serial playback of each sentence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  TurnController                      │
//! │   Idle → Listening → Transcribing → Awaiting → Speak │
//! └──────┬──────────────┬───────────────┬───────────────┘
//!        │              │               │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌──────▼────────────────┐
//! │ AudioSource│ │ Transcriber │ │ ResponseGenerator     │
//! │ (cpal mic) │ │ (STT API)   │ │ (chat SSE fragments)  │
//! └────────────┘ └─────────────┘ └──────┬────────────────┘
//!                                       │
//!                          ┌────────────▼────────────┐
//!                          │   SentenceSegmenter     │
//!                          └────────────┬────────────┘
//!                                       │
//!                          ┌────────────▼────────────┐
//!                          │ SpeechOutputPipeline    │
//!                          │ Synthesizer → Player    │
//!                          └─────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationHistory, Message, Role};
pub use error::{Error, Result};
pub use pipeline::{
    OutputMode, SegmenterConfig, SentenceSegmenter, SpeechOutputPipeline, SpeechSegment,
    TurnController, TurnOutcome, TurnState,
};
pub use voice::Voice;
