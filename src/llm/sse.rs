//! Server-sent event decoding for streamed chat completions
//!
//! The body arrives in arbitrary byte chunks. Complete lines are decoded as
//! they become available; a partial line (including a split UTF-8 sequence)
//! waits in the buffer for the next chunk.

use serde::Deserialize;

use crate::{Error, Result};

/// One decoded event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Text fragment from `choices[0].delta.content`
    Delta(String),
    /// `data: [DONE]`, the explicit end of the response
    Done,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Incremental line decoder for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body and decode every complete line in it
    ///
    /// # Errors
    ///
    /// Returns `Error::Generation` for a line that is not UTF-8, a data payload
    /// that is not a chunk object, or an `error` object sent by the server
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.decode_line(&line[..newline])? {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Decode whatever is left once the body has ended
    ///
    /// # Errors
    ///
    /// Same as [`SseDecoder::push`]
    pub fn finish(&mut self) -> Result<Vec<SseEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        Ok(self.decode_line(&rest)?.into_iter().collect())
    }

    /// Whether `[DONE]` has been seen
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, raw: &[u8]) -> Result<Option<SseEvent>> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| Error::Generation(format!("stream is not UTF-8: {e}")))?
            .trim_end_matches('\r');

        // Blank lines separate events; ':' lines are keep-alive comments
        if line.trim().is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            // event:, id:, retry: carry nothing for chat streams
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(Some(SseEvent::Done));
        }

        let payload: ChunkPayload = serde_json::from_str(data).map_err(|e| {
            tracing::warn!(error = %e, data = %data, "failed to parse stream chunk");
            Error::Generation(format!("invalid stream chunk: {e}"))
        })?;

        if let Some(error) = payload.error {
            return Err(Error::Generation(format!("server error: {}", error.message)));
        }

        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content);

        Ok(content.map(SseEvent::Delta))
    }
}
