//! Shared test utilities
//!
//! Scripted stand-ins for every collaborator of the turn controller. They all
//! append to one shared event log so tests can check the interleaving of
//! listening, generation, synthesis, and playback.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use beacon_dialogue::pipeline::{
    AudioBuffer, AudioSource, FragmentStream, Player, ResponseGenerator, Synthesizer, Transcriber,
    Transcript, Utterance,
};
use beacon_dialogue::{ConversationHistory, Error, Result, SpeechOutputPipeline, TurnController, Voice};

/// Something a fake collaborator did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Listen,
    Transcribe(Option<String>),
    Generate,
    Fragment(String),
    Synthesize(String),
    PlayStart(usize),
    PlayEnd(usize),
}

/// Shared, ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Texts passed to the synthesizer, in call order
    pub fn synthesized(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Synthesize(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    /// Position of the last event matching `pred`
    pub fn last_position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().rposition(pred)
    }
}

/// One second of quiet audio at 16kHz
pub fn utterance() -> Utterance {
    Utterance::new(vec![0.0; 16000], 16000)
}

/// Hands out queued utterances, then reports shutdown
pub struct ScriptedSource {
    log: Log,
    script: VecDeque<Result<Utterance>>,
}

impl ScriptedSource {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            script: VecDeque::new(),
        }
    }

    /// Source that yields `n` utterances
    pub fn turns(log: &Log, n: usize) -> Self {
        let mut source = Self::new(log);
        for _ in 0..n {
            source = source.then_utterance();
        }
        source
    }

    pub fn then_utterance(mut self) -> Self {
        self.script.push_back(Ok(utterance()));
        self
    }

    pub fn then_error(mut self, error: Error) -> Self {
        self.script.push_back(Err(error));
        self
    }
}

#[async_trait(?Send)]
impl AudioSource for ScriptedSource {
    async fn listen(&mut self) -> Result<Utterance> {
        self.log.push(Event::Listen);
        self.script.pop_front().unwrap_or(Err(Error::Cancelled))
    }
}

/// Returns queued transcripts; blank once the queue is empty
pub struct FakeTranscriber {
    log: Log,
    script: Mutex<VecDeque<Result<Transcript>>>,
}

impl FakeTranscriber {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn then_text(self, text: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(Transcript::from_text(text)));
        self
    }

    pub fn then_error(self, error: Error) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _utterance: &Utterance,
        language_hint: Option<&str>,
    ) -> Result<Transcript> {
        self.log
            .push(Event::Transcribe(language_hint.map(ToString::to_string)));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Transcript::default()))
    }
}

/// How one scripted response behaves
pub enum Reply {
    /// Yield these fragments, then end normally
    Fragments(Vec<String>),
    /// Yield these fragments, then a terminal error
    BreaksAfter(Vec<String>),
    /// Fail before any fragment
    Refuses,
}

impl Reply {
    pub fn of(fragments: &[&str]) -> Self {
        Self::Fragments(fragments.iter().map(ToString::to_string).collect())
    }

    pub fn broken(fragments: &[&str]) -> Self {
        Self::BreaksAfter(fragments.iter().map(ToString::to_string).collect())
    }
}

/// Streams scripted replies and records the history it was given
pub struct ScriptedGenerator {
    log: Log,
    script: Mutex<VecDeque<Reply>>,
    seen: Arc<Mutex<Vec<ConversationHistory>>>,
}

impl ScriptedGenerator {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            script: Mutex::new(VecDeque::new()),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    /// Handle to the histories passed to `generate`
    pub fn seen(&self) -> Arc<Mutex<Vec<ConversationHistory>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, history: &ConversationHistory) -> Result<FragmentStream> {
        self.log.push(Event::Generate);
        self.seen.lock().unwrap().push(history.clone());

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Fragments(Vec::new()));

        let items: Vec<Result<String>> = match reply {
            Reply::Fragments(fragments) => fragments.into_iter().map(Ok).collect(),
            Reply::BreaksAfter(fragments) => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(Error::Generation(
                    "connection reset".to_string(),
                ))))
                .collect(),
            Reply::Refuses => return Err(Error::Generation("503 overloaded".to_string())),
        };

        // Log each fragment at the moment it is pulled
        let log = self.log.clone();
        let stream = futures::stream::iter(items).map(move |item| {
            if let Ok(fragment) = &item {
                log.push(Event::Fragment(fragment.clone()));
            }
            item
        });

        Ok(Box::pin(stream))
    }
}

/// Records synthesis requests; one sample per character of text
pub struct RecordingSynthesizer {
    log: Log,
    fail_on: Option<String>,
}

impl RecordingSynthesizer {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            fail_on: None,
        }
    }

    /// Fail for any text containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, _voice: Voice) -> Result<AudioBuffer> {
        self.log.push(Event::Synthesize(text.to_string()));

        if self.fail_on.as_deref().is_some_and(|needle| text.contains(needle)) {
            return Err(Error::Synthesis("voice unavailable".to_string()));
        }

        Ok(AudioBuffer::new(vec![0.0; text.chars().count()], 24000))
    }
}

/// Records playback; optionally takes time or fails
pub struct RecordingPlayer {
    log: Log,
    delay: Duration,
    fail: bool,
}

impl RecordingPlayer {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub const fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn play(&mut self, buffer: AudioBuffer) -> Result<()> {
        let len = buffer.samples.len();
        self.log.push(Event::PlayStart(len));

        if self.fail {
            return Err(Error::Playback("device unplugged".to_string()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.log.push(Event::PlayEnd(len));
        Ok(())
    }
}

pub const SYSTEM_PROMPT: &str = "Respond in the language of the user's input.";

/// Wire fakes into a controller with a fresh history
pub fn controller(
    source: ScriptedSource,
    transcriber: FakeTranscriber,
    generator: ScriptedGenerator,
    synthesizer: RecordingSynthesizer,
    player: RecordingPlayer,
) -> TurnController {
    let speech = SpeechOutputPipeline::new(Box::new(synthesizer), Box::new(player), Voice::Alloy);
    TurnController::new(
        ConversationHistory::new(SYSTEM_PROMPT),
        Box::new(source),
        Box::new(transcriber),
        Box::new(generator),
        speech,
    )
}
