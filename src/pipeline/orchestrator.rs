//! Turn-taking session: wires capture, gate, assembler, the service workers and
//! the player together and runs the conversation state machine.
//!
//! ```text
//! AudioSource → FrameSource → GateStation → AssemblerStation ─┐
//!                                                             ▼
//!        Conversation ◄── orchestrator ──► RecognitionWorker
//!                            │  ▲
//!                            ▼  │ fragments
//!                      GenerationWorker → PhraseBuffer → Player → AudioSink
//!                            ▲
//!                  BargeInMonitor (from the first phrase handed to the Player)
//! ```
//!
//! Only the orchestrator thread touches the [`Conversation`]. Cancellation is a
//! tree of tokens: session shutdown → reply → one token per phrase.

use crate::audio::playback::AudioSink;
use crate::audio::recorder::{AudioSource, CaptureDevice};
use crate::audio::vad::{EnergyClassifier, Endpointer, FrameClassifier, FrameFormat};
use crate::conversation::{Conversation, Turn};
use crate::defaults;
use crate::error::{Result, Stage, TalkbackError};
use crate::llm::generator::ReplyGenerator;
use crate::llm::phrase::{PhraseBuffer, PhraseChunk};
use crate::pipeline::assembler::{AssemblerStation, ListenGate};
use crate::pipeline::barge_in::BargeInMonitor;
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::events::{EventEmitter, SessionEvent, TurnState};
use crate::pipeline::frame_source::FrameSource;
use crate::pipeline::gate_station::GateStation;
use crate::pipeline::latency::{LatencyStats, LatencyTracker, PhaseTimings};
use crate::pipeline::station::StationRunner;
use crate::pipeline::types::{Segment, Utterance};
use crate::pipeline::workers::{
    GenerationEvent, GenerationWorker, RecognitionWorker, Wait, recv_until,
};
use crate::stt::recognizer::Recognizer;
use crate::tts::player::{PlaybackReport, Player, PlayerConfig};
use crate::tts::session::{PlaybackOutcome, PlaybackSession};
use crate::tts::synthesizer::{SpeechSynthesizer, VoiceParams};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Runtime settings of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub format: FrameFormat,
    pub vad_aggressiveness: u8,
    pub silence_timeout_ms: u32,
    pub capture_queue_frames: usize,
    pub system_prompt: Option<String>,
    pub greeting: Option<String>,
    /// Non-system turns sent to the generator.
    pub history_turns: usize,
    pub phrase_threshold: usize,
    pub turn_timeout: Duration,
    pub barge_in: bool,
    pub voice: VoiceParams,
    pub synthesis_workers: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            vad_aggressiveness: defaults::VAD_AGGRESSIVENESS,
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            capture_queue_frames: defaults::CAPTURE_QUEUE_FRAMES,
            system_prompt: Some(defaults::SYSTEM_PROMPT.to_string()),
            greeting: None,
            history_turns: defaults::HISTORY_TURNS,
            phrase_threshold: defaults::PHRASE_THRESHOLD,
            turn_timeout: Duration::from_millis(defaults::TURN_TIMEOUT_MS),
            barge_in: true,
            voice: VoiceParams::default(),
            synthesis_workers: defaults::SYNTHESIS_WORKERS,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        FrameFormat::new(self.format.sample_rate, self.format.frame_ms)?;
        EnergyClassifier::new(self.vad_aggressiveness)?;
        let positive = [
            ("audio.silence_timeout_ms", self.silence_timeout_ms as u64),
            ("audio.capture_queue_frames", self.capture_queue_frames as u64),
            ("conversation.history_turns", self.history_turns as u64),
            ("conversation.phrase_threshold", self.phrase_threshold as u64),
            ("conversation.turn_timeout_ms", self.turn_timeout.as_millis() as u64),
            ("synthesis.workers", self.synthesis_workers as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(TalkbackError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The collaborators a session runs with.
pub struct SessionParts {
    pub source: Box<dyn AudioSource>,
    /// Device the barge-in monitor opens its own stream on.
    pub barge_in_device: Option<Arc<dyn CaptureDevice>>,
    pub recognizer: Arc<dyn Recognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Box<dyn AudioSink>,
}

/// What a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub conversation: Conversation,
    pub turns_completed: usize,
    pub latency: Option<LatencyStats>,
}

/// Session builder.
pub struct Session {
    config: SessionConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    event_tx: Option<Sender<SessionEvent>>,
    classifier: Option<Arc<dyn FrameClassifier>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
            event_tx: None,
            classifier: None,
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    pub fn with_event_sender(mut self, tx: Sender<SessionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Replace the energy classifier built from `vad_aggressiveness`.
    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Start all threads.
    ///
    /// An invalid configuration or a capture source that cannot start fails
    /// before any thread is spawned.
    pub fn start(self, parts: SessionParts) -> Result<SessionHandle> {
        self.config.validate()?;
        let config = self.config;
        let classifier: Arc<dyn FrameClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(EnergyClassifier::new(config.vad_aggressiveness)?),
        };

        let shutdown = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(TurnState::Idle.as_u8()));
        let gate = ListenGate::new();

        let (captured_tx, captured_rx) = bounded(config.capture_queue_frames);
        let (gated_tx, gated_rx) = bounded(config.capture_queue_frames);
        // One utterance handed over at a time.
        let (segment_tx, segment_rx) = bounded(1);

        let capture = FrameSource::spawn(parts.source, config.format, captured_tx, shutdown.clone())?;

        // Dropping `handle` on a later error stops what was started.
        let mut handle = SessionHandle {
            shutdown: shutdown.clone(),
            state: Arc::clone(&state),
            orchestrator: None,
            capture: Some(capture),
            gate: None,
            assembler: None,
        };

        handle.gate = Some(StationRunner::spawn(
            GateStation::new(
                Arc::clone(&classifier),
                Endpointer::new(config.format.frame_ms, config.silence_timeout_ms),
            ),
            captured_rx,
            gated_tx,
            Arc::clone(&self.error_reporter),
        )?);
        handle.assembler = Some(StationRunner::spawn(
            AssemblerStation::new(config.format.sample_rate, gate.clone()),
            gated_rx,
            segment_tx,
            Arc::clone(&self.error_reporter),
        )?);

        let recognition = RecognitionWorker::spawn(parts.recognizer)?;
        let generation = GenerationWorker::spawn(parts.generator)?;
        let player = Player::spawn(
            Arc::clone(&parts.synthesizer),
            parts.sink,
            PlayerConfig {
                sample_rate: parts.synthesizer.sample_rate(),
                workers: config.synthesis_workers,
                chunk_timeout: config.turn_timeout,
                max_slice_ms: defaults::MAX_PLAYBACK_SLICE_MS,
                voice: config.voice.clone(),
            },
        );

        let barge_in = match (config.barge_in, parts.barge_in_device) {
            (true, Some(device)) => Some((device, Arc::clone(&classifier))),
            _ => None,
        };
        let orchestrator = Orchestrator {
            conversation: Conversation::new(config.system_prompt.as_deref()),
            config,
            timings: PhaseTimings::new(),
            latency: LatencyTracker::new(),
            state,
            gate,
            shutdown,
            recognition: Some(recognition),
            generation: Some(generation),
            player: Some(player),
            barge_in,
            events: EventEmitter::new(self.event_tx),
            reporter: self.error_reporter,
            turns_completed: 0,
        };
        handle.orchestrator = Some(
            thread::Builder::new()
                .name("orchestrator".to_string())
                .spawn(move || orchestrator.run(segment_rx))?,
        );

        Ok(handle)
    }
}

/// Control handle of a running session.
pub struct SessionHandle {
    shutdown: CancellationToken,
    state: Arc<AtomicU8>,
    orchestrator: Option<JoinHandle<Result<SessionReport>>>,
    capture: Option<JoinHandle<Result<()>>>,
    gate: Option<StationRunner<GateStation>>,
    assembler: Option<StationRunner<AssemblerStation>>,
}

impl SessionHandle {
    /// Request a graceful stop. Calling it again has no further effect.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Stopping session");
        }
        self.shutdown.cancel();
    }

    /// Token that stops the session when cancelled, for use from other threads.
    pub fn stop_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> TurnState {
        TurnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True once the orchestrator has exited (stop, end of input, or a fatal error).
    pub fn is_finished(&self) -> bool {
        self.orchestrator.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait until the session ends and every thread has exited.
    ///
    /// An orchestrator error is returned first, then a capture error.
    pub fn wait(mut self) -> Result<SessionReport> {
        let report = match self.orchestrator.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(TalkbackError::Other("orchestrator panicked".to_string()))),
            None => Err(TalkbackError::Other("session was not started".to_string())),
        };
        self.shutdown.cancel();

        let capture = match self.capture.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(TalkbackError::Other("capture thread panicked".to_string()))),
            None => Ok(()),
        };
        if let Some(gate) = self.gate.take()
            && let Err(msg) = gate.join()
        {
            tracing::error!("{}", msg);
        }
        if let Some(assembler) = self.assembler.take()
            && let Err(msg) = assembler.join()
        {
            tracing::error!("{}", msg);
        }

        let report = report?;
        capture?;
        Ok(report)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Orchestrator {
    config: SessionConfig,
    conversation: Conversation,
    timings: PhaseTimings,
    latency: LatencyTracker,
    state: Arc<AtomicU8>,
    gate: ListenGate,
    shutdown: CancellationToken,
    recognition: Option<RecognitionWorker>,
    generation: Option<GenerationWorker>,
    player: Option<Player>,
    barge_in: Option<(Arc<dyn CaptureDevice>, Arc<dyn FrameClassifier>)>,
    events: EventEmitter,
    reporter: Arc<dyn ErrorReporter>,
    turns_completed: usize,
}

/// How the reply stream ended.
enum ReplyEnd {
    Complete,
    Failed(TalkbackError),
    Stopped,
}

impl Orchestrator {
    fn run(mut self, segments: Receiver<Segment>) -> Result<SessionReport> {
        self.set_state(TurnState::Idle);
        let served = self.serve(&segments);
        if let Err(ref e) = served {
            tracing::error!("Session failed: {}", e);
        }

        self.shutdown.cancel();
        self.gate.unmute();
        drop(segments);
        let teardown = self.teardown();
        self.set_state(TurnState::Stopped);

        served?;
        teardown?;
        self.latency.log_summary();
        Ok(SessionReport {
            conversation: self.conversation,
            turns_completed: self.turns_completed,
            latency: self.latency.stats(),
        })
    }

    fn serve(&mut self, segments: &Receiver<Segment>) -> Result<()> {
        if let Some(greeting) = self.config.greeting.clone() {
            self.conversation.append(Turn::system(greeting));
            self.timings.reset();
            self.respond()?;
        }

        let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        while !self.shutdown.is_cancelled() {
            match segments.recv_timeout(poll) {
                Ok(Segment::SpeechStarted) => {
                    if self.state() == TurnState::Idle {
                        self.set_state(TurnState::Assembling);
                    }
                }
                Ok(Segment::Utterance(utterance)) => self.handle_utterance(utterance)?,
                Ok(Segment::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Input ended");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;
        if let Some(recognition) = self.recognition.take()
            && let Err(e) = recognition.shutdown()
        {
            first_error.get_or_insert(e);
        }
        if let Some(generation) = self.generation.take()
            && let Err(e) = generation.shutdown()
        {
            first_error.get_or_insert(e);
        }
        if let Some(player) = self.player.take()
            && let Err(e) = player.shutdown()
        {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_utterance(&mut self, utterance: Utterance) -> Result<()> {
        self.timings.reset();
        self.timings.mark_speech_ended(utterance.ended_at);
        tracing::debug!(
            "Utterance of {:.2}s ({} frames)",
            utterance.duration().as_secs_f64(),
            utterance.frames.len()
        );

        self.set_state(TurnState::Recognizing);
        self.timings.mark_recognition_start();
        let cancel = self.shutdown.child_token();
        let Some(recognition) = &self.recognition else {
            return Err(TalkbackError::Other("recognition worker stopped".to_string()));
        };
        let rx = recognition.submit(utterance, cancel.clone())?;

        let deadline = Instant::now() + self.config.turn_timeout;
        let transcript = match recv_until(&rx, deadline, &self.shutdown) {
            Wait::Item(Ok(Some(transcript))) => transcript,
            Wait::Item(Ok(None)) | Wait::Stopped => {
                cancel.cancel();
                return Ok(());
            }
            Wait::Item(Err(e)) => return self.fail_turn(e),
            Wait::TimedOut => {
                cancel.cancel();
                return self.fail_turn(TalkbackError::Timeout {
                    stage: Stage::Recognition,
                    waited_ms: self.config.turn_timeout.as_millis() as u64,
                });
            }
            Wait::Closed => {
                return Err(TalkbackError::Other(
                    "recognition worker stopped".to_string(),
                ));
            }
        };
        self.timings.mark_recognition_end();

        if !transcript.is_final || !transcript.is_meaningful() {
            tracing::debug!("Empty transcript, listening again");
            self.set_state(TurnState::Idle);
            return Ok(());
        }

        let text = transcript.text.trim().to_string();
        tracing::info!("User: {}", text);
        self.conversation.append(Turn::user(text.clone()));
        self.events.emit(SessionEvent::UserTurn(text));
        self.respond()
    }

    /// Generate and speak one reply to the current conversation.
    fn respond(&mut self) -> Result<()> {
        // Muted before the state is published.
        self.gate.mute();
        self.set_state(TurnState::Responding);
        let reply = self.shutdown.child_token();

        let result = self.speak_reply(&reply);
        reply.cancel();
        self.gate.unmute();
        self.set_state(TurnState::Idle);

        match result? {
            ReplyEnd::Complete => {
                self.turns_completed += 1;
                self.latency.record(self.timings.clone());
                self.events.emit(SessionEvent::TurnCompleted {
                    turns_completed: self.turns_completed,
                });
                Ok(())
            }
            ReplyEnd::Failed(e) => self.fail_turn(e),
            ReplyEnd::Stopped => Ok(()),
        }
    }

    fn speak_reply(&mut self, reply: &CancellationToken) -> Result<ReplyEnd> {
        let mut streamed = self.stream_reply(reply);
        let monitor = streamed.monitor.take();
        let played = self.await_playback(reply, streamed.spoken);

        let barged_in = match monitor {
            Some(monitor) => monitor.finish()?,
            None => false,
        };
        if barged_in {
            self.events.emit(SessionEvent::BargeIn);
        }

        played?;
        let end = streamed.end?;
        if self.shutdown.is_cancelled() {
            return Ok(ReplyEnd::Stopped);
        }
        Ok(end)
    }

    /// Pull fragments, re-buffer them into phrases, record and dispatch each.
    fn stream_reply(&mut self, reply: &CancellationToken) -> Streamed {
        let mut streamed = Streamed {
            spoken: 0,
            monitor: None,
            end: Ok(ReplyEnd::Complete),
        };
        self.timings.mark_generation_start();

        let cancel = self.shutdown.child_token();
        let context = self.conversation.window(self.config.history_turns);
        let events = match &self.generation {
            Some(generation) => generation.start(context, cancel.clone()),
            None => Err(TalkbackError::Other("generation worker stopped".to_string())),
        };
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                streamed.end = Err(e);
                return streamed;
            }
        };

        let mut buffer = PhraseBuffer::new(self.config.phrase_threshold);
        loop {
            let deadline = Instant::now() + self.config.turn_timeout;
            let phrases = match recv_until(&events, deadline, &self.shutdown) {
                Wait::Item(GenerationEvent::Fragment(fragment)) => {
                    self.timings.mark_first_fragment();
                    buffer.push(&fragment)
                }
                Wait::Item(GenerationEvent::Done) => {
                    let last: Vec<PhraseChunk> = buffer.finish().into_iter().collect();
                    streamed.end = Ok(ReplyEnd::Complete);
                    self.dispatch(&last, reply, &mut streamed);
                    break;
                }
                Wait::Item(GenerationEvent::Failed(e)) => {
                    self.discard_remainder(&mut buffer);
                    streamed.end = Ok(ReplyEnd::Failed(e));
                    break;
                }
                Wait::TimedOut => {
                    cancel.cancel();
                    self.discard_remainder(&mut buffer);
                    streamed.end = Ok(ReplyEnd::Failed(TalkbackError::Timeout {
                        stage: Stage::Generation,
                        waited_ms: self.config.turn_timeout.as_millis() as u64,
                    }));
                    break;
                }
                Wait::Closed => {
                    streamed.end = Err(TalkbackError::Other(
                        "generation worker stopped".to_string(),
                    ));
                    break;
                }
                Wait::Stopped => {
                    cancel.cancel();
                    streamed.end = Ok(ReplyEnd::Stopped);
                    break;
                }
            };
            self.dispatch(&phrases, reply, &mut streamed);
            if streamed.end.is_err() {
                break;
            }
        }

        self.timings.mark_generation_end();
        streamed
    }

    fn discard_remainder(&self, buffer: &mut PhraseBuffer) {
        let dropped = buffer.discard();
        if dropped > 0 {
            tracing::debug!("Discarding {} unflushed characters", dropped);
        }
    }

    /// Append each phrase as an assistant turn, then hand it to the player
    /// unless the reply was interrupted.
    fn dispatch(&mut self, phrases: &[PhraseChunk], reply: &CancellationToken, streamed: &mut Streamed) {
        for phrase in phrases {
            self.conversation.append(Turn::assistant(phrase.text.clone()));
            self.events.emit(SessionEvent::AssistantPhrase {
                sequence: phrase.sequence,
                text: phrase.text.clone(),
            });

            if reply.is_cancelled() {
                tracing::debug!("Reply interrupted, not speaking phrase {}", phrase.sequence);
                continue;
            }
            if streamed.monitor.is_none()
                && let Some((device, classifier)) = &self.barge_in
            {
                match BargeInMonitor::spawn(
                    device.as_ref(),
                    Arc::clone(classifier),
                    self.config.format,
                    reply.clone(),
                ) {
                    Ok(monitor) => streamed.monitor = Some(monitor),
                    Err(e) => {
                        streamed.end = Err(e);
                        return;
                    }
                }
            }
            tracing::info!("Assistant: {}", phrase.text.trim());
            self.timings.mark_synthesis_start();
            let session = PlaybackSession::new(reply.child_token());
            let spoken = match &self.player {
                Some(player) => player.speak(phrase, session),
                None => Err(TalkbackError::Other("player stopped".to_string())),
            };
            match spoken {
                Ok(()) => streamed.spoken += 1,
                Err(e) => {
                    streamed.end = Err(e);
                    return;
                }
            }
        }
    }

    /// Wait for a report from every dispatched phrase.
    fn await_playback(&mut self, reply: &CancellationToken, mut pending: usize) -> Result<()> {
        let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        let mut device_error = None;

        while pending > 0 {
            let Some(player) = &self.player else {
                break;
            };
            let report: PlaybackReport = match player.reports().recv_timeout(poll) {
                Ok(report) => report,
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.is_cancelled() {
                        reply.cancel();
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            pending -= 1;

            if let Some(at) = report.first_audio_at {
                self.timings.mark_first_audio(at);
            }
            match report.outcome {
                PlaybackOutcome::Finished => {}
                PlaybackOutcome::Cancelled => {
                    tracing::debug!("Phrase {} cancelled", report.sequence);
                }
                PlaybackOutcome::Failed(e) if e.is_fatal() => {
                    reply.cancel();
                    device_error.get_or_insert(e);
                }
                PlaybackOutcome::Failed(e) => {
                    self.reporter
                        .report("synthesis", &StationError::Recoverable(e.to_string()));
                    self.events.emit(SessionEvent::TurnFailed {
                        message: e.to_string(),
                    });
                }
            }
        }
        self.timings.mark_synthesis_end();

        match device_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// A recoverable failure ends the turn; a fatal one ends the session.
    fn fail_turn(&mut self, error: TalkbackError) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        let stage = match &error {
            TalkbackError::Service { stage, .. } | TalkbackError::Timeout { stage, .. } => {
                stage.to_string()
            }
            _ => "orchestrator".to_string(),
        };
        self.reporter
            .report(&stage, &StationError::Recoverable(error.to_string()));
        self.events.emit(SessionEvent::TurnFailed {
            message: error.to_string(),
        });
        self.set_state(TurnState::Idle);
        Ok(())
    }

    fn state(&self) -> TurnState {
        TurnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, next: TurnState) {
        let previous = TurnState::from_u8(self.state.swap(next.as_u8(), Ordering::SeqCst));
        if previous != next {
            tracing::debug!("state: {} -> {}", previous, next);
            self.events.emit(SessionEvent::StateChanged(next));
        }
    }
}

/// Result of streaming one reply.
struct Streamed {
    /// Phrases handed to the player.
    spoken: usize,
    /// Started with the first phrase handed to the player; stops with the reply.
    monitor: Option<BargeInMonitor>,
    end: Result<ReplyEnd>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::CollectorSink;
    use crate::audio::recorder::ScriptedAudioSource;
    use crate::llm::generator::MockGenerator;
    use crate::stt::recognizer::MockRecognizer;
    use crate::tts::synthesizer::MockSynthesizer;

    fn config() -> SessionConfig {
        SessionConfig {
            format: FrameFormat::new(16000, 10).unwrap(),
            silence_timeout_ms: 50,
            system_prompt: Some("Be brief.".to_string()),
            turn_timeout: Duration::from_secs(2),
            barge_in: false,
            ..SessionConfig::default()
        }
    }

    fn parts(source: ScriptedAudioSource, sink: CollectorSink) -> SessionParts {
        SessionParts {
            source: Box::new(source),
            barge_in_device: None,
            recognizer: Arc::new(MockRecognizer::new("Hello there")),
            generator: Arc::new(MockGenerator::new(&["Hi! ", "How can I help?"])),
            synthesizer: Arc::new(MockSynthesizer::new().with_chunks(1, 160)),
            sink: Box::new(sink),
        }
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = SessionConfig::default();
        config.phrase_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.turn_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.vad_aggressiveness = 4;
        assert!(config.validate().is_err());

        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn one_turn_from_scripted_audio() {
        let source = ScriptedAudioSource::new()
            .with_frames(5, 160, 3000)
            .with_frames(10, 160, 0);
        let sink = CollectorSink::new();
        let handle = Session::new(config())
            .start(parts(source, sink.clone()))
            .unwrap();

        let report = handle.wait().unwrap();
        let turns: Vec<String> = report
            .conversation
            .turns()
            .iter()
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect();
        assert_eq!(
            turns,
            vec![
                "system: Be brief.",
                "user: Hello there",
                "assistant: Hi! ",
                "assistant: How can I help?",
            ]
        );
        assert_eq!(report.turns_completed, 1);
        assert_eq!(sink.writes().len(), 2);
    }

    #[test]
    fn start_failure_leaves_nothing_running() {
        let mut config = config();
        config.history_turns = 0;
        let result = Session::new(config).start(parts(ScriptedAudioSource::new(), CollectorSink::new()));
        assert!(matches!(
            result,
            Err(TalkbackError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn stop_is_idempotent_and_state_ends_stopped() {
        let source = ScriptedAudioSource::new().endless();
        let handle = Session::new(config())
            .start(parts(source, CollectorSink::new()))
            .unwrap();

        handle.stop();
        handle.stop();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.state(), TurnState::Stopped);
        let report = handle.wait().unwrap();
        assert_eq!(report.turns_completed, 0);
    }
}
