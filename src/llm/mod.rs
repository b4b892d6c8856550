//! Streaming chat completions
//!
//! Sends the full conversation history and turns the server-sent event body
//! into a [`FragmentStream`] of text deltas.

mod sse;

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

pub use sse::{SseDecoder, SseEvent};

use crate::conversation::{ConversationHistory, Message};
use crate::pipeline::{FragmentStream, ResponseGenerator};
use crate::{Error, Result};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [Message],
    stream: bool,
}

/// `OpenAI`-compatible chat completions client
pub struct ChatCompletions {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
}

impl ChatCompletions {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(
        api_key: SecretString,
        base_url: &str,
        model: String,
        temperature: f32,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
        })
    }

    /// Model identifier sent with each request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletions {
    async fn generate(&self, history: &ConversationHistory) -> Result<FragmentStream> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: history.messages(),
            stream: true,
        };

        tracing::debug!(
            model = %self.model,
            messages = history.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                Error::Generation(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Generation(format!("chat API error {status}: {body}")));
        }

        Ok(fragments(response.bytes_stream()))
    }
}

struct FragmentState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    failed: Option<Error>,
    finished: bool,
}

impl<S> FragmentState<S> {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                break;
            }
            match event {
                SseEvent::Delta(text) => self.ready.push_back(text),
                SseEvent::Done => self.finished = true,
            }
        }
    }
}

/// Decode an event-stream body into text fragments
///
/// Fragments are yielded in arrival order. Transport and decode failures are
/// yielded once as a terminal `Error::Generation` after the fragments already
/// decoded. A body that closes without `[DONE]` counts as a failure.
pub fn fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
{
    let state = FragmentState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        failed: None,
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.ready.pop_front() {
                return Some((Ok(fragment), state));
            }
            if let Some(err) = state.failed.take() {
                state.finished = true;
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => match state.decoder.push(bytes.as_ref()) {
                    Ok(events) => state.absorb(events),
                    Err(e) => state.failed = Some(e),
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "chat stream interrupted");
                    state.failed = Some(Error::Generation(format!("stream interrupted: {e}")));
                }
                None => {
                    match state.decoder.finish() {
                        Ok(events) => state.absorb(events),
                        Err(e) => state.failed = Some(e),
                    }
                    if state.failed.is_none() && !state.decoder.is_done() {
                        state.failed = Some(Error::Generation(
                            "stream closed before [DONE]".to_string(),
                        ));
                    }
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}
