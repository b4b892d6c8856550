//! Sentence segmentation over a streamed response
//!
//! Fragments are appended to a pending buffer. The buffer is emitted as a
//! segment once it is longer than `min_chars` and its last character is a
//! terminator. Only the final character is inspected, so a fragment holding
//! several sentences is spoken as one segment unless it ends on a terminator.

use super::SpeechSegment;

/// Default minimum length a sentence must exceed before it is emitted
pub const DEFAULT_MIN_CHARS: usize = 20;

/// Default sentence terminators
pub const DEFAULT_TERMINATORS: &[char] = &['.'];

/// Segmentation trigger settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// The pending buffer must be longer than this many characters
    pub min_chars: usize,

    /// Characters that end a sentence
    pub terminators: Vec<char>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_MIN_CHARS,
            terminators: DEFAULT_TERMINATORS.to_vec(),
        }
    }
}

/// Splits a fragment stream into speakable sentences
#[derive(Debug, Clone, Default)]
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    pending: String,
    pending_chars: usize,
    response: String,
    emitted: usize,
}

impl SentenceSegmenter {
    /// Create a segmenter with custom trigger settings
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Append a fragment, returning a segment if the trigger fired
    ///
    /// At most one segment is produced per call.
    pub fn feed(&mut self, fragment: &str) -> Option<SpeechSegment> {
        self.response.push_str(fragment);
        self.pending.push_str(fragment);
        self.pending_chars += fragment.chars().count();

        let ends_sentence = self
            .pending
            .chars()
            .next_back()
            .is_some_and(|c| self.config.terminators.contains(&c));

        if ends_sentence && self.pending_chars > self.config.min_chars {
            Some(self.emit())
        } else {
            None
        }
    }

    /// Emit whatever is left at end of stream, regardless of length
    pub fn flush(&mut self) -> Option<SpeechSegment> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    fn emit(&mut self) -> SpeechSegment {
        let text = std::mem::take(&mut self.pending);
        self.pending_chars = 0;
        let segment = SpeechSegment::new(self.emitted, text);
        self.emitted += 1;
        tracing::trace!(index = segment.index(), text = segment.text(), "segment ready");
        segment
    }

    /// Text accumulated since the last emission
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Every fragment fed so far, regardless of segment boundaries
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Number of segments emitted so far
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }

    /// Consume the segmenter, returning the full response text
    #[must_use]
    pub fn into_response(self) -> String {
        self.response
    }
}
