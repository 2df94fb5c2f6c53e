mod common;

use common::{
    Cue, EventLog, FRAME_LEN, completed, config, contents, entered, failed, forever, transcript,
    utterance,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use talkback::audio::{CollectorSink, MockCaptureDevice};
use talkback::llm::MockGenerator;
use talkback::pipeline::{CollectingReporter, LogReporter, StationError, TeeReporter};
use talkback::stt::{MockRecognizer, MockReply};
use talkback::tts::MockSynthesizer;
use talkback::{Role, Session, SessionConfig, SessionEvent, SessionParts, Turn, TurnState};

struct Harness {
    recognizer: MockRecognizer,
    generator: MockGenerator,
    synthesizer: MockSynthesizer,
    sink: CollectorSink,
    reporter: CollectingReporter,
}

impl Harness {
    fn new(recognizer: MockRecognizer, generator: MockGenerator) -> Self {
        Self {
            recognizer,
            generator,
            synthesizer: MockSynthesizer::new().with_chunks(2, FRAME_LEN),
            sink: CollectorSink::new(),
            reporter: CollectingReporter::new(),
        }
    }

    fn with_synthesizer(mut self, synthesizer: MockSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    fn with_sink(mut self, sink: CollectorSink) -> Self {
        self.sink = sink;
        self
    }

    fn start(&self, config: SessionConfig, cues: Vec<Cue>) -> (talkback::SessionHandle, Arc<EventLog>) {
        self.start_with_device(config, cues, None)
    }

    fn start_with_device(
        &self,
        config: SessionConfig,
        cues: Vec<Cue>,
        device: Option<MockCaptureDevice>,
    ) -> (talkback::SessionHandle, Arc<EventLog>) {
        let (tx, log) = EventLog::new();
        let source = common::CueSource::new(Arc::clone(&log), cues);
        let reporter = TeeReporter::new(Arc::new(LogReporter), Arc::new(self.reporter.clone()));
        let handle = Session::new(config)
            .with_event_sender(tx)
            .with_error_reporter(Arc::new(reporter))
            .start(SessionParts {
                source: Box::new(source),
                barge_in_device: device.map(|d| Arc::new(d) as Arc<dyn talkback::CaptureDevice>),
                recognizer: Arc::new(self.recognizer.clone()),
                generator: Arc::new(self.generator.clone()),
                synthesizer: Arc::new(self.synthesizer.clone()),
                sink: Box::new(self.sink.clone()),
            })
            .unwrap();
        (handle, log)
    }
}

fn script(parts: Vec<Vec<Cue>>) -> Vec<Cue> {
    parts.into_iter().flatten().collect()
}

#[test]
fn weather_question_is_answered_phrase_by_phrase() {
    let harness = Harness::new(
        MockRecognizer::new("What's the weather?"),
        MockGenerator::new(&["It's sunny ", "today. ", "Enjoy it!"]),
    );
    let (handle, log) = harness.start(config(), script(vec![utterance(5), vec![completed(1)]]));

    let report = handle.wait().unwrap();
    assert_eq!(
        transcript(&report.conversation),
        vec![
            "system: Be brief.",
            "user: What's the weather?",
            "assistant: It's sunny today. ",
            "assistant: Enjoy it!",
        ]
    );
    assert_eq!(report.turns_completed, 1);
    assert_eq!(report.latency.map(|s| s.count), Some(1));

    // Both phrases played whole and in order.
    let first = MockSynthesizer::marker_for("It's sunny today. ");
    let second = MockSynthesizer::marker_for("Enjoy it!");
    let mut expected = vec![first; 2 * FRAME_LEN];
    expected.extend(vec![second; 2 * FRAME_LEN]);
    assert_eq!(harness.sink.samples(), expected);

    assert_eq!(
        log.states(),
        vec![
            TurnState::Assembling,
            TurnState::Recognizing,
            TurnState::Responding,
            TurnState::Idle,
            TurnState::Stopped,
        ]
    );
    assert!(log.contains(&SessionEvent::UserTurn("What's the weather?".to_string())));
    assert!(log.contains(&SessionEvent::AssistantPhrase {
        sequence: 1,
        text: "Enjoy it!".to_string(),
    }));
    assert!(log.contains(&SessionEvent::TurnCompleted { turns_completed: 1 }));
}

#[test]
fn reply_context_pins_system_prompt_and_keeps_recent_turns() {
    let harness = Harness::new(
        MockRecognizer::new("unused").with_script(vec![
            MockReply::Text("Hello".to_string()),
            MockReply::Text("And tomorrow?".to_string()),
        ]),
        MockGenerator::default().with_replies(vec![vec!["Hi there."], vec!["Rain tomorrow."]]),
    );
    let config = SessionConfig {
        history_turns: 2,
        ..config()
    };
    let cues = script(vec![
        utterance(5),
        vec![completed(1)],
        utterance(5),
        vec![completed(2)],
    ]);
    let (handle, _log) = harness.start(config, cues);

    let report = handle.wait().unwrap();
    assert_eq!(report.turns_completed, 2);

    let contexts = harness.generator.contexts();
    assert_eq!(contexts.len(), 2);
    assert_eq!(
        contexts[0],
        vec![Turn::system("Be brief."), Turn::user("Hello")]
    );
    assert_eq!(
        contexts[1],
        vec![
            Turn::system("Be brief."),
            Turn::assistant("Hi there."),
            Turn::user("And tomorrow?"),
        ]
    );
}

#[test]
fn speaking_over_the_reply_interrupts_playback() {
    let device = MockCaptureDevice::new(FRAME_LEN);
    let switch = device.speaking_switch();
    let sink = CollectorSink::new().with_on_write(move |index| {
        if index == 0 {
            switch.store(true, Ordering::SeqCst);
        }
    });
    let harness = Harness::new(
        MockRecognizer::new("Tell me a story"),
        MockGenerator::new(&["Once upon a time. ", "There was a fox. ", "The end."]),
    )
    .with_synthesizer(
        MockSynthesizer::new()
            .with_chunks(5, FRAME_LEN)
            .with_chunk_delay(Duration::from_millis(20)),
    )
    .with_sink(sink);

    let config = SessionConfig {
        barge_in: true,
        ..config()
    };
    let cues = script(vec![utterance(5), vec![completed(1)]]);
    let (handle, log) = harness.start_with_device(config, cues, Some(device.clone()));

    let report = handle.wait().unwrap();
    assert!(log.contains(&SessionEvent::BargeIn));
    assert_eq!(device.open_count(), 1);

    // Playback stopped early; generation kept recording the reply.
    let writes = harness.sink.writes().len();
    assert!(writes >= 1 && writes < 15, "{} writes", writes);
    assert_eq!(
        contents(&report.conversation, Role::Assistant),
        vec!["Once upon a time. ", "There was a fox. ", "The end."]
    );

    // Later phrases are kept in the conversation but never reach the speaker.
    let later = [
        MockSynthesizer::marker_for("There was a fox. "),
        MockSynthesizer::marker_for("The end."),
    ];
    let samples = harness.sink.samples();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| !later.contains(s)));
}

#[test]
fn barge_in_listens_only_once_a_phrase_is_playing() {
    let device = MockCaptureDevice::new(FRAME_LEN);
    let harness = Harness::new(
        MockRecognizer::new("Anything?"),
        MockGenerator::new(&["Never said."]).with_failure(),
    );
    let config = SessionConfig {
        barge_in: true,
        ..config()
    };
    let cues = script(vec![utterance(5), vec![failed(1)]]);
    let (handle, _log) = harness.start_with_device(config, cues, Some(device.clone()));

    let report = handle.wait().unwrap();
    assert_eq!(report.turns_completed, 0);
    assert!(harness.sink.samples().is_empty());
    assert_eq!(device.open_count(), 0);
}

#[test]
fn recognition_timeout_fails_the_turn_and_listening_resumes() {
    let harness = Harness::new(
        MockRecognizer::new("Second try").with_script(vec![MockReply::Hang]),
        MockGenerator::new(&["Got it."]),
    );
    let config = SessionConfig {
        turn_timeout: Duration::from_millis(300),
        ..config()
    };
    let cues = script(vec![
        utterance(5),
        vec![failed(1)],
        utterance(5),
        vec![completed(1)],
    ]);
    let (handle, log) = harness.start(config, cues);

    let report = handle.wait().unwrap();
    assert_eq!(harness.recognizer.call_count(), 2);
    assert_eq!(contents(&report.conversation, Role::User), vec!["Second try"]);
    assert_eq!(report.turns_completed, 1);

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("timed out"), "{}", failures[0]);
}

#[test]
fn generation_error_keeps_spoken_phrase_and_drops_remainder() {
    let harness = Harness::new(
        MockRecognizer::new("Can you help?"),
        MockGenerator::new(&["Sure thing. ", "And then", " more"]).with_error_after(2),
    );
    let cues = script(vec![utterance(5), vec![failed(1)]]);
    let (handle, log) = harness.start(config(), cues);

    let report = handle.wait().unwrap();
    assert_eq!(
        contents(&report.conversation, Role::Assistant),
        vec!["Sure thing. "]
    );
    assert_eq!(report.turns_completed, 0);

    let samples = harness.sink.samples();
    assert!(!samples.is_empty());
    let marker = MockSynthesizer::marker_for("Sure thing. ");
    assert!(samples.iter().all(|&s| s == marker));
    assert_eq!(log.failures().len(), 1);
}

#[test]
fn synthesis_failure_skips_only_that_phrase() {
    let harness = Harness::new(
        MockRecognizer::new("Count for me"),
        MockGenerator::new(&["One. ", "Broken phrase two. ", "Three!"]),
    )
    .with_synthesizer(
        MockSynthesizer::new()
            .with_chunks(2, FRAME_LEN)
            .with_failure_on("Broken"),
    );
    let cues = script(vec![utterance(5), vec![completed(1)]]);
    let (handle, log) = harness.start(config(), cues);

    let report = handle.wait().unwrap();
    assert_eq!(report.turns_completed, 1);
    assert_eq!(contents(&report.conversation, Role::Assistant).len(), 3);

    let one = MockSynthesizer::marker_for("One. ");
    let three = MockSynthesizer::marker_for("Three!");
    let mut expected = vec![one; 2 * FRAME_LEN];
    expected.extend(vec![three; 2 * FRAME_LEN]);
    assert_eq!(harness.sink.samples(), expected);

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("synthesis"), "{}", failures[0]);

    let reports = harness.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "synthesis");
    assert!(matches!(reports[0].1, StationError::Recoverable(_)));
    assert!(harness.reporter.first_fatal().is_none());
}

#[test]
fn speech_during_reply_never_becomes_an_utterance() {
    let harness = Harness::new(
        MockRecognizer::new("Hello"),
        MockGenerator::new(&["Hello, nice to hear from you."]),
    )
    .with_synthesizer(MockSynthesizer::new().with_chunks(4, FRAME_LEN))
    .with_sink(CollectorSink::new().with_write_delay(Duration::from_millis(50)));

    let cues = script(vec![
        utterance(5),
        vec![entered(TurnState::Responding)],
        utterance(8),
        vec![completed(1)],
    ]);
    let (handle, _log) = harness.start(config(), cues);

    let report = handle.wait().unwrap();
    assert_eq!(harness.recognizer.call_count(), 1);
    assert_eq!(contents(&report.conversation, Role::User), vec!["Hello"]);
}

#[test]
fn speech_queued_through_the_reply_is_not_answered() {
    let harness = Harness::new(
        MockRecognizer::new("Are you there?").with_delay(Duration::from_millis(400)),
        MockGenerator::new(&["Yes."]),
    )
    .with_sink(CollectorSink::new().with_write_delay(Duration::from_millis(50)));

    // The second utterance ends while the first is still being recognized, so
    // the assembler is blocked on it while the third is spoken over the reply.
    let cues = script(vec![
        utterance(5),
        vec![entered(TurnState::Recognizing)],
        utterance(5),
        vec![entered(TurnState::Responding)],
        utterance(5),
        vec![completed(2)],
    ]);
    let (handle, _log) = harness.start(config(), cues);

    let report = handle.wait().unwrap();
    assert_eq!(harness.recognizer.call_count(), 2);
    assert_eq!(report.turns_completed, 2);
    assert_eq!(
        contents(&report.conversation, Role::User),
        vec!["Are you there?", "Are you there?"]
    );
}

#[test]
fn greeting_is_spoken_before_listening() {
    let harness = Harness::new(
        MockRecognizer::new("unused"),
        MockGenerator::new(&["Hi, I'm here."]),
    );
    let config = SessionConfig {
        greeting: Some("Greet the user.".to_string()),
        ..config()
    };
    let (handle, _log) = harness.start(config, vec![completed(1)]);

    let report = handle.wait().unwrap();
    assert_eq!(
        transcript(&report.conversation),
        vec![
            "system: Be brief.",
            "system: Greet the user.",
            "assistant: Hi, I'm here.",
        ]
    );
    assert_eq!(harness.recognizer.call_count(), 0);
    assert_eq!(
        harness.generator.contexts()[0],
        vec![Turn::system("Be brief."), Turn::system("Greet the user.")]
    );
    assert!(!harness.sink.samples().is_empty());
}

#[test]
fn stop_interrupts_a_stalled_reply() {
    let harness = Harness::new(
        MockRecognizer::new("Keep talking"),
        MockGenerator::new(&["I will talk forever."]),
    )
    .with_synthesizer(MockSynthesizer::new().with_stall_on("forever"));
    let config = SessionConfig {
        turn_timeout: Duration::from_secs(5),
        ..config()
    };
    let cues = script(vec![utterance(5), vec![forever()]]);
    let (handle, _log) = harness.start(config, cues);

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.state() != TurnState::Responding && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(handle.state(), TurnState::Responding);

    let stopped_at = Instant::now();
    handle.stop();
    handle.stop();
    let report = handle.wait().unwrap();
    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert_eq!(report.turns_completed, 0);
}

#[test]
fn output_device_failure_ends_the_session() {
    let sink = CollectorSink::new();
    sink.fail_writes();
    let harness = Harness::new(MockRecognizer::new("Hello"), MockGenerator::new(&["Hi."]))
        .with_sink(sink);
    let cues = script(vec![utterance(5), vec![forever()]]);
    let (handle, _log) = harness.start(config(), cues);

    let err = handle.wait().unwrap_err();
    assert!(err.is_fatal(), "{}", err);
}
