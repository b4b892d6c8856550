//! Turn controller integration tests
//!
//! Drive whole turns through scripted collaborators; no audio hardware or
//! network is touched.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use beacon_dialogue::{Error, OutputMode, Role, TurnOutcome, TurnState};

mod common;

use common::{
    Event, FakeTranscriber, Log, RecordingPlayer, RecordingSynthesizer, Reply, SYSTEM_PROMPT,
    ScriptedGenerator, ScriptedSource, controller,
};

const FIRST: &str = "First sentence is right here.";
const SECOND: &str = " Second sentence is here too.";
const TAIL: &str = " Tail";

fn roles(history: &beacon_dialogue::ConversationHistory) -> Vec<Role> {
    history.messages().iter().map(|m| m.role).collect()
}

/// No fragment is pulled between the start of synthesis and the end of playback
fn assert_no_pull_while_speaking(log: &Log) {
    let mut speaking = false;
    for event in log.events() {
        match event {
            Event::Synthesize(_) => speaking = true,
            Event::PlayEnd(_) => speaking = false,
            Event::Fragment(ref f) => assert!(!speaking, "fragment {f:?} pulled while speaking"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_long_sentence_spoken_and_recorded() {
    let log = Log::default();
    let generator = ScriptedGenerator::new(&log).then(Reply::of(&[
        "This is a long enough sentence to trigger",
        " emission",
        ".",
    ]));
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Tell me something"),
        generator,
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let outcome = controller.run_turn().await.unwrap();

    let expected = "This is a long enough sentence to trigger emission.";
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            response: expected.to_string(),
            segments: 1,
        }
    );
    assert_eq!(log.synthesized(), vec![expected]);

    let history = controller.history();
    assert_eq!(roles(history), vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(history.messages()[1].content, "Tell me something");
    assert_eq!(history.messages()[2].content, expected);
    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_short_reply_spoken_after_stream_ends() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hi"),
        ScriptedGenerator::new(&log).then(Reply::of(&["Hello", " there", "."])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    controller.run_turn().await.unwrap();

    assert_eq!(log.synthesized(), vec!["Hello there."]);
    let last_fragment = log.last_position(|e| matches!(e, Event::Fragment(_))).unwrap();
    let synth = log.position(|e| matches!(e, Event::Synthesize(_))).unwrap();
    assert!(synth > last_fragment);
}

#[tokio::test]
async fn test_two_sentences_in_one_fragment_are_one_segment() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hi"),
        ScriptedGenerator::new(&log).then(Reply::of(&["Short one. Second sentence."])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let outcome = controller.run_turn().await.unwrap();

    assert_eq!(log.synthesized(), vec!["Short one. Second sentence."]);
    assert!(matches!(outcome, TurnOutcome::Completed { segments: 1, .. }));
}

#[tokio::test]
async fn test_serial_mode_waits_for_playback() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Talk to me"),
        ScriptedGenerator::new(&log).then(Reply::of(&[FIRST, SECOND, TAIL])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log).with_delay(Duration::from_millis(5)),
    );

    let outcome = controller.run_turn().await.unwrap();

    assert_eq!(log.synthesized(), vec![FIRST, SECOND, TAIL]);
    assert_no_pull_while_speaking(&log);
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            response: format!("{FIRST}{SECOND}{TAIL}"),
            segments: 3,
        }
    );
}

#[tokio::test]
async fn test_pipelined_mode_generates_ahead() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Talk to me"),
        ScriptedGenerator::new(&log).then(Reply::of(&[FIRST, SECOND, TAIL])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log).with_delay(Duration::from_millis(20)),
    )
    .with_output_mode(OutputMode::Pipelined { queue: 4 });

    controller.run_turn().await.unwrap();

    let last_fragment = log.last_position(|e| matches!(e, Event::Fragment(_))).unwrap();
    let first_play_end = log.position(|e| matches!(e, Event::PlayEnd(_))).unwrap();
    assert!(last_fragment < first_play_end, "{:?}", log.events());

    assert_eq!(log.synthesized(), vec![FIRST, SECOND, TAIL]);
    assert_eq!(controller.history().turns(), 1);
}

#[tokio::test]
async fn test_pipelined_mode_keeps_player_serial() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Talk to me"),
        ScriptedGenerator::new(&log).then(Reply::of(&[FIRST, SECOND, TAIL])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log).with_delay(Duration::from_millis(5)),
    )
    .with_output_mode(OutputMode::Pipelined { queue: 1 });

    controller.run_turn().await.unwrap();

    assert_eq!(log.synthesized(), vec![FIRST, SECOND, TAIL]);

    // Every start is followed by its own end before the next start
    let plays: Vec<Event> = log
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::PlayStart(_) | Event::PlayEnd(_)))
        .collect();
    assert_eq!(plays.len(), 6);
    for pair in plays.chunks(2) {
        match pair {
            [Event::PlayStart(a), Event::PlayEnd(b)] => assert_eq!(a, b),
            other => panic!("overlapping playback: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_broken_stream_leaves_no_assistant_message() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Tell me a story"),
        ScriptedGenerator::new(&log)
            .then(Reply::broken(&["This sentence will be spoken aloud.", " And then"])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let err = controller.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Generation(_)));
    assert_eq!(log.synthesized(), vec!["This sentence will be spoken aloud."]);
    assert_eq!(roles(controller.history()), vec![Role::System, Role::User]);
    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_refused_generation_keeps_user_message() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hello"),
        ScriptedGenerator::new(&log).then(Reply::Refuses),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let err = controller.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Generation(_)));
    assert_eq!(roles(controller.history()), vec![Role::System, Role::User]);
    assert!(log.synthesized().is_empty());
}

#[tokio::test]
async fn test_synthesis_failure_aborts_turn() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hello"),
        ScriptedGenerator::new(&log).then(Reply::of(&[FIRST, " This one goes boom."])),
        RecordingSynthesizer::new(&log).failing_on("boom"),
        RecordingPlayer::new(&log),
    );

    let err = controller.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Synthesis(_)));
    assert_eq!(controller.history().turns(), 0);
    // The first sentence was already played
    assert!(log.position(|e| matches!(e, Event::PlayEnd(_))).is_some());
}

#[tokio::test]
async fn test_playback_failure_aborts_turn() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hello"),
        ScriptedGenerator::new(&log).then(Reply::of(&[FIRST])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log).failing(),
    )
    .with_output_mode(OutputMode::Pipelined { queue: 2 });

    let err = controller.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Playback(_)));
    assert_eq!(controller.history().turns(), 0);
}

#[tokio::test]
async fn test_blank_transcript_is_a_no_op() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("  \n "),
        ScriptedGenerator::new(&log),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let outcome = controller.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::Skipped);
    assert_eq!(controller.history().len(), 1);
    assert_eq!(controller.history().system_prompt(), SYSTEM_PROMPT);
    assert!(log.position(|e| *e == Event::Generate).is_none());
    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_transcription_failure_skips_generation() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_error(Error::Transcription("timeout".to_string())),
        ScriptedGenerator::new(&log),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let err = controller.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Transcription(_)));
    assert_eq!(controller.history().len(), 1);
    assert!(log.position(|e| *e == Event::Generate).is_none());
}

#[tokio::test]
async fn test_empty_fragments_are_filtered() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hi"),
        ScriptedGenerator::new(&log).then(Reply::of(&["", "Hello there.", ""])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let outcome = controller.run_turn().await.unwrap();

    assert_eq!(log.synthesized(), vec!["Hello there."]);
    assert!(matches!(outcome, TurnOutcome::Completed { segments: 1, .. }));
}

#[tokio::test]
async fn test_empty_reply_is_recorded() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Hi"),
        ScriptedGenerator::new(&log).then(Reply::of(&[])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    let outcome = controller.run_turn().await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            response: String::new(),
            segments: 0,
        }
    );
    assert_eq!(roles(controller.history()), vec![Role::System, Role::User, Role::Assistant]);
    assert!(log.synthesized().is_empty());
}

#[tokio::test]
async fn test_language_hint_reaches_transcriber() {
    let log = Log::default();
    let mut controller = controller(
        ScriptedSource::turns(&log, 1),
        FakeTranscriber::new(&log).then_text("Привет"),
        ScriptedGenerator::new(&log).then(Reply::of(&["Здравствуйте."])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    )
    .with_language(Some("ru".to_string()));

    controller.run_turn().await.unwrap();

    assert!(log.events().contains(&Event::Transcribe(Some("ru".to_string()))));
}

#[tokio::test]
async fn test_generator_sees_full_history() {
    let log = Log::default();
    let generator = ScriptedGenerator::new(&log)
        .then(Reply::of(&["Nice to meet you."]))
        .then(Reply::of(&["You said hello."]));
    let seen = generator.seen();

    let mut controller = controller(
        ScriptedSource::turns(&log, 2),
        FakeTranscriber::new(&log).then_text("Hello").then_text("What did I say?"),
        generator,
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    controller.run_turn().await.unwrap();
    controller.run_turn().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(roles(&seen[0]), vec![Role::System, Role::User]);
    assert_eq!(
        roles(&seen[1]),
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(seen[1].messages()[2].content, "Nice to meet you.");

    let history = controller.into_history();
    assert_eq!(history.len(), 5);
    assert_eq!(history.turns(), 2);
}

#[tokio::test]
async fn test_run_survives_failed_turns() {
    let log = Log::default();
    let source = ScriptedSource::new(&log)
        .then_utterance()
        .then_error(Error::Capture("device busy".to_string()))
        .then_utterance();
    let mut controller = controller(
        source,
        FakeTranscriber::new(&log)
            .then_error(Error::Transcription("bad audio".to_string()))
            .then_text("Hello again"),
        ScriptedGenerator::new(&log).then(Reply::of(&["Welcome back."])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    );

    // The source reports shutdown once its script runs out
    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();

    let listens = log.events().iter().filter(|e| **e == Event::Listen).count();
    assert_eq!(listens, 4);
    assert_eq!(controller.history().turns(), 1);
    assert_eq!(controller.history().messages()[1].content, "Hello again");
    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_run_returns_when_already_cancelled() {
    let log = Log::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut controller = controller(
        ScriptedSource::turns(&log, 3),
        FakeTranscriber::new(&log).then_text("Hello"),
        ScriptedGenerator::new(&log),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log),
    )
    .with_cancellation(cancel);

    tokio::time::timeout(Duration::from_secs(1), controller.run())
        .await
        .unwrap();

    assert_eq!(controller.history().len(), 1);
}

#[tokio::test]
async fn test_cancel_during_playback_stops_loop() {
    let log = Log::default();
    let cancel = CancellationToken::new();

    let mut controller = controller(
        ScriptedSource::turns(&log, 5),
        FakeTranscriber::new(&log).then_text("Tell me everything"),
        ScriptedGenerator::new(&log).then(Reply::of(&[FIRST, SECOND])),
        RecordingSynthesizer::new(&log),
        RecordingPlayer::new(&log).with_delay(Duration::from_secs(30)),
    )
    .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();

    // The user spoke, but the reply never finished
    assert_eq!(roles(controller.history()), vec![Role::System, Role::User]);
    assert!(log.position(|e| matches!(e, Event::PlayEnd(_))).is_none());
    assert_eq!(controller.state(), TurnState::Idle);
}
