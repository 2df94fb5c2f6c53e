//! Synthesis worker pool and ordered playback.
//!
//! `speak` hands one phrase to the pool and queues its playback. Workers
//! synthesize concurrently into per-phrase bounded channels; a single playback
//! thread drains those channels strictly in `speak` order, so phrase N is never
//! heard after phrase N+1 even when N+1 synthesizes faster.

use crate::audio::playback::AudioSink;
use crate::defaults;
use crate::error::{Result, Stage, TalkbackError};
use crate::llm::phrase::PhraseChunk;
use crate::tts::session::{PlaybackOutcome, PlaybackSession};
use crate::tts::synthesizer::{SpeechSynthesizer, VoiceParams};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Chunks buffered per phrase ahead of playback.
const AUDIO_QUEUE_CHUNKS: usize = 8;

/// Player settings.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    /// Phrases synthesized concurrently.
    pub workers: usize,
    /// Longest wait for the next audio chunk of a phrase.
    pub chunk_timeout: Duration,
    /// Largest slice written between cancellation checks.
    pub max_slice_ms: u32,
    pub voice: VoiceParams,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            workers: defaults::SYNTHESIS_WORKERS,
            chunk_timeout: Duration::from_millis(defaults::TURN_TIMEOUT_MS),
            max_slice_ms: defaults::MAX_PLAYBACK_SLICE_MS,
            voice: VoiceParams::default(),
        }
    }
}

/// Final result of one phrase.
#[derive(Debug)]
pub struct PlaybackReport {
    pub sequence: usize,
    pub outcome: PlaybackOutcome,
    pub samples_played: usize,
    /// When the first slice reached the sink.
    pub first_audio_at: Option<Instant>,
}

enum SynthMessage {
    Audio(Vec<i16>),
    Failed(TalkbackError),
    Done,
}

struct SynthesisJob {
    text: String,
    session: PlaybackSession,
    audio_tx: Sender<SynthMessage>,
}

struct PlaybackJob {
    sequence: usize,
    session: PlaybackSession,
    audio_rx: Receiver<SynthMessage>,
}

/// Handle to the synthesis pool and playback thread.
pub struct Player {
    jobs_tx: Option<Sender<SynthesisJob>>,
    playback_tx: Option<Sender<PlaybackJob>>,
    reports_rx: Receiver<PlaybackReport>,
    threads: Vec<JoinHandle<()>>,
}

impl Player {
    /// Starts the worker pool and the playback thread.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Box<dyn AudioSink>,
        config: PlayerConfig,
    ) -> Self {
        let (jobs_tx, jobs_rx) = unbounded::<SynthesisJob>();
        let (playback_tx, playback_rx) = unbounded::<PlaybackJob>();
        let (reports_tx, reports_rx) = unbounded::<PlaybackReport>();

        let mut threads = Vec::new();
        for _ in 0..config.workers.max(1) {
            let jobs_rx = jobs_rx.clone();
            let synthesizer = Arc::clone(&synthesizer);
            let voice = config.voice.clone();
            threads.push(thread::spawn(move || {
                synthesis_worker(synthesizer.as_ref(), &voice, jobs_rx);
            }));
        }

        let playback = PlaybackLoop {
            sink,
            slice_len: defaults::samples_per_ms(config.sample_rate, config.max_slice_ms).max(1),
            chunk_timeout: config.chunk_timeout,
            dead_sink: None,
        };
        threads.push(thread::spawn(move || playback.run(playback_rx, reports_tx)));

        Self {
            jobs_tx: Some(jobs_tx),
            playback_tx: Some(playback_tx),
            reports_rx,
            threads,
        }
    }

    /// Queue one phrase for synthesis and ordered playback.
    pub fn speak(&self, phrase: &PhraseChunk, session: PlaybackSession) -> Result<()> {
        let (Some(jobs_tx), Some(playback_tx)) = (&self.jobs_tx, &self.playback_tx) else {
            return Err(TalkbackError::Other("player is shut down".to_string()));
        };
        let (audio_tx, audio_rx) = bounded(AUDIO_QUEUE_CHUNKS);

        playback_tx
            .send(PlaybackJob {
                sequence: phrase.sequence,
                session: session.clone(),
                audio_rx,
            })
            .map_err(|_| TalkbackError::Other("playback thread stopped".to_string()))?;
        jobs_tx
            .send(SynthesisJob {
                text: phrase.text.clone(),
                session,
                audio_tx,
            })
            .map_err(|_| TalkbackError::Other("synthesis workers stopped".to_string()))?;
        Ok(())
    }

    /// One report per spoken phrase, in playback order.
    pub fn reports(&self) -> &Receiver<PlaybackReport> {
        &self.reports_rx
    }

    /// Stops accepting phrases and waits for all threads.
    ///
    /// Queued phrases still play unless their sessions are cancelled first.
    pub fn shutdown(mut self) -> Result<()> {
        self.jobs_tx.take();
        self.playback_tx.take();
        let mut panicked = 0;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(TalkbackError::Other(format!(
                "{panicked} player thread(s) panicked"
            )));
        }
        Ok(())
    }
}

fn synthesis_worker(
    synthesizer: &dyn SpeechSynthesizer,
    voice: &VoiceParams,
    jobs_rx: Receiver<SynthesisJob>,
) {
    while let Ok(job) = jobs_rx.recv() {
        if job.session.is_cancelled() {
            continue;
        }

        let stream = match synthesizer.synthesize(&job.text, voice, job.session.token()) {
            Ok(stream) => stream,
            Err(e) => {
                send_or_log(&job.audio_tx, SynthMessage::Failed(e));
                continue;
            }
        };

        let mut failed = false;
        for chunk in stream {
            if job.session.is_cancelled() {
                break;
            }
            match chunk {
                Ok(samples) => {
                    if job.audio_tx.send(SynthMessage::Audio(samples)).is_err() {
                        // Playback gave up on this phrase
                        break;
                    }
                }
                Err(e) => {
                    send_or_log(&job.audio_tx, SynthMessage::Failed(e));
                    failed = true;
                    break;
                }
            }
        }

        if !failed && !job.session.is_cancelled() {
            send_or_log(&job.audio_tx, SynthMessage::Done);
        }
    }
}

/// The receiver is gone once playback has given up on the phrase.
fn send_or_log(audio_tx: &Sender<SynthMessage>, message: SynthMessage) {
    if audio_tx.send(message).is_err() {
        tracing::debug!("playback no longer waiting for this phrase");
    }
}

struct PlaybackLoop {
    sink: Box<dyn AudioSink>,
    slice_len: usize,
    chunk_timeout: Duration,
    /// Set after the first write failure; the device is not retried.
    dead_sink: Option<String>,
}

struct Played {
    outcome: PlaybackOutcome,
    samples: usize,
    first_audio_at: Option<Instant>,
}

impl PlaybackLoop {
    fn run(mut self, playback_rx: Receiver<PlaybackJob>, reports_tx: Sender<PlaybackReport>) {
        while let Ok(job) = playback_rx.recv() {
            let played = self.play(&job);
            job.session.complete(played.outcome.state());

            match &played.outcome {
                PlaybackOutcome::Finished => {
                    tracing::debug!(
                        "phrase {} finished ({} samples)",
                        job.sequence,
                        played.samples
                    );
                }
                PlaybackOutcome::Cancelled => {
                    tracing::debug!(
                        "phrase {} cancelled after {} samples",
                        job.sequence,
                        played.samples
                    );
                }
                PlaybackOutcome::Failed(e) => {
                    tracing::warn!("phrase {} failed: {}", job.sequence, e);
                }
            }

            if playback_rx.is_empty()
                && self.dead_sink.is_none()
                && let Err(e) = self.sink.drain()
            {
                tracing::warn!("failed to drain {}: {}", self.sink.name(), e);
            }

            let report = PlaybackReport {
                sequence: job.sequence,
                outcome: played.outcome,
                samples_played: played.samples,
                first_audio_at: played.first_audio_at,
            };
            if reports_tx.send(report).is_err() {
                break;
            }
        }
    }

    fn play(&mut self, job: &PlaybackJob) -> Played {
        let mut played = Played {
            outcome: PlaybackOutcome::Finished,
            samples: 0,
            first_audio_at: None,
        };

        if let Some(ref message) = self.dead_sink {
            job.session.cancel();
            played.outcome = PlaybackOutcome::Failed(TalkbackError::device(message.clone()));
            return played;
        }

        let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        let mut deadline = Instant::now() + self.chunk_timeout;

        loop {
            if job.session.is_cancelled() {
                self.clear();
                played.outcome = PlaybackOutcome::Cancelled;
                return played;
            }

            let message = match job.audio_rx.recv_timeout(poll) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() < deadline {
                        continue;
                    }
                    // Stop the worker still producing this phrase
                    job.session.cancel();
                    played.outcome = PlaybackOutcome::Failed(TalkbackError::Timeout {
                        stage: Stage::Synthesis,
                        waited_ms: self.chunk_timeout.as_millis() as u64,
                    });
                    return played;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    played.outcome = if job.session.is_cancelled() {
                        self.clear();
                        PlaybackOutcome::Cancelled
                    } else {
                        PlaybackOutcome::Failed(TalkbackError::service(
                            Stage::Synthesis,
                            "audio stream ended without completing",
                        ))
                    };
                    return played;
                }
            };

            match message {
                SynthMessage::Audio(samples) => {
                    for slice in samples.chunks(self.slice_len) {
                        if job.session.is_cancelled() {
                            self.clear();
                            played.outcome = PlaybackOutcome::Cancelled;
                            return played;
                        }
                        if let Err(e) = self.sink.write(slice) {
                            tracing::error!("{} write failed: {}", self.sink.name(), e);
                            self.dead_sink = Some(e.to_string());
                            job.session.cancel();
                            played.outcome = PlaybackOutcome::Failed(e);
                            return played;
                        }
                        played.first_audio_at.get_or_insert_with(Instant::now);
                        played.samples += slice.len();
                    }
                    deadline = Instant::now() + self.chunk_timeout;
                }
                SynthMessage::Done => return played,
                SynthMessage::Failed(e) => {
                    played.outcome = PlaybackOutcome::Failed(e);
                    return played;
                }
            }
        }
    }

    fn clear(&mut self) {
        if let Err(e) = self.sink.clear() {
            tracing::warn!("failed to clear {}: {}", self.sink.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::CollectorSink;
    use crate::tts::session::SessionState;
    use crate::tts::synthesizer::MockSynthesizer;

    fn phrase(sequence: usize, text: &str) -> PhraseChunk {
        PhraseChunk {
            sequence,
            text: text.to_string(),
        }
    }

    fn config() -> PlayerConfig {
        PlayerConfig {
            chunk_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    fn recv(player: &Player) -> PlaybackReport {
        player
            .reports()
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn plays_phrases_in_order_even_if_first_is_slow() {
        let synth = MockSynthesizer::new()
            .with_chunks(2, 800)
            .with_slow_phrase("first", Duration::from_millis(150));
        let sink = CollectorSink::new();
        let player = Player::spawn(Arc::new(synth), Box::new(sink.clone()), config());

        player
            .speak(&phrase(0, "first one"), PlaybackSession::detached())
            .unwrap();
        player
            .speak(&phrase(1, "second"), PlaybackSession::detached())
            .unwrap();

        assert_eq!(recv(&player).sequence, 0);
        assert_eq!(recv(&player).sequence, 1);
        player.shutdown().unwrap();

        let samples = sink.samples();
        let first = MockSynthesizer::marker_for("first one");
        let second = MockSynthesizer::marker_for("second");
        let boundary = samples.iter().position(|&s| s == second).unwrap();
        assert!(samples[..boundary].iter().all(|&s| s == first));
        assert!(samples[boundary..].iter().all(|&s| s == second));
        assert_eq!(samples.len(), 3200);
    }

    #[test]
    fn slices_large_chunks_to_playback_granularity() {
        let synth = MockSynthesizer::new().with_chunks(1, 4000);
        let sink = CollectorSink::new();
        let player = Player::spawn(Arc::new(synth), Box::new(sink.clone()), config());

        player
            .speak(&phrase(0, "hello"), PlaybackSession::detached())
            .unwrap();
        let report = recv(&player);
        player.shutdown().unwrap();

        assert!(matches!(report.outcome, PlaybackOutcome::Finished));
        assert_eq!(report.samples_played, 4000);
        let sizes: Vec<usize> = sink.writes().iter().map(|w| w.len()).collect();
        assert_eq!(sizes, vec![1600, 1600, 800]);
    }

    #[test]
    fn cancelled_before_start_plays_nothing() {
        let synth = MockSynthesizer::new();
        let sink = CollectorSink::new();
        let player = Player::spawn(Arc::new(synth), Box::new(sink.clone()), config());

        let session = PlaybackSession::detached();
        session.cancel();
        player.speak(&phrase(0, "never"), session.clone()).unwrap();

        let report = recv(&player);
        player.shutdown().unwrap();

        assert!(matches!(report.outcome, PlaybackOutcome::Cancelled));
        assert!(sink.writes().is_empty());
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[test]
    fn cancellation_mid_phrase_stops_after_current_slice() {
        let session = PlaybackSession::detached();
        let canceller = session.clone();
        let sink = CollectorSink::new().with_on_write(move |index| {
            if index == 1 {
                canceller.cancel();
            }
        });
        let synth = MockSynthesizer::new().with_chunks(6, 1600);
        let player = Player::spawn(Arc::new(synth), Box::new(sink.clone()), config());

        player.speak(&phrase(0, "interrupt me"), session.clone()).unwrap();
        let report = recv(&player);
        player.shutdown().unwrap();

        assert!(matches!(report.outcome, PlaybackOutcome::Cancelled));
        assert_eq!(sink.writes().len(), 2);
        assert_eq!(sink.clear_count(), 1);
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[test]
    fn synthesis_failure_fails_only_that_phrase() {
        let synth = MockSynthesizer::new().with_chunks(1, 160).with_failure_on("bad");
        let sink = CollectorSink::new();
        let player = Player::spawn(Arc::new(synth), Box::new(sink.clone()), config());

        player
            .speak(&phrase(0, "bad phrase"), PlaybackSession::detached())
            .unwrap();
        player
            .speak(&phrase(1, "good"), PlaybackSession::detached())
            .unwrap();

        let first = recv(&player);
        let second = recv(&player);
        player.shutdown().unwrap();

        match first.outcome {
            PlaybackOutcome::Failed(e) => assert!(!e.is_fatal()),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(second.outcome, PlaybackOutcome::Finished));
        assert_eq!(sink.samples(), vec![MockSynthesizer::marker_for("good"); 160]);
    }

    #[test]
    fn stalled_synthesis_times_out() {
        let synth = MockSynthesizer::new().with_chunks(1, 160).with_stall_on("stuck");
        let sink = CollectorSink::new();
        let player = Player::spawn(
            Arc::new(synth),
            Box::new(sink.clone()),
            PlayerConfig {
                chunk_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );

        let session = PlaybackSession::detached();
        player.speak(&phrase(0, "stuck"), session.clone()).unwrap();
        let report = recv(&player);
        player.shutdown().unwrap();

        assert!(matches!(
            report.outcome,
            PlaybackOutcome::Failed(TalkbackError::Timeout {
                stage: Stage::Synthesis,
                ..
            })
        ));
        assert_eq!(report.samples_played, 160);
        assert!(session.is_cancelled());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn sink_failure_is_fatal_and_sticky() {
        let sink = CollectorSink::new();
        sink.fail_writes();
        let synth = MockSynthesizer::new().with_chunks(1, 160);
        let player = Player::spawn(Arc::new(synth), Box::new(sink.clone()), config());

        player
            .speak(&phrase(0, "one"), PlaybackSession::detached())
            .unwrap();
        player
            .speak(&phrase(1, "two"), PlaybackSession::detached())
            .unwrap();

        for _ in 0..2 {
            match recv(&player).outcome {
                PlaybackOutcome::Failed(e) => assert!(e.is_fatal()),
                other => panic!("expected device failure, got {:?}", other),
            }
        }
        player.shutdown().unwrap();
    }

    #[test]
    fn shutdown_without_phrases_reports_nothing() {
        let player = Player::spawn(
            Arc::new(MockSynthesizer::new()),
            Box::new(CollectorSink::new()),
            config(),
        );
        let reports = player.reports().clone();
        player.shutdown().unwrap();
        assert!(reports.try_recv().is_err());
    }
}
