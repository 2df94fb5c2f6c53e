//! Shared harness for end-to-end session tests.
//!
//! `CueSource` plays the user's side of a conversation: bursts of speech and
//! silence, and pauses that wait for the session to reach a given point
//! (read from the session's event channel).

#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use talkback::audio::vad::FrameFormat;
use talkback::{AudioSource, Result, Role, SessionConfig, SessionEvent, TurnState};

pub const FRAME_LEN: usize = 160;
pub const SPEECH_AMPLITUDE: i16 = 3000;

/// How long a single `Until` cue may wait before the test is failed.
const CUE_TIMEOUT: Duration = Duration::from_secs(10);

pub type Condition = Box<dyn Fn(&[SessionEvent]) -> bool + Send>;

pub enum Cue {
    Speech(usize),
    Silence(usize),
    /// Produce nothing until the condition holds over all events seen so far.
    Until(Condition),
}

/// Session events collected from the session's event channel.
pub struct EventLog {
    rx: Receiver<SessionEvent>,
    seen: Mutex<Vec<SessionEvent>>,
}

impl EventLog {
    pub fn new() -> (Sender<SessionEvent>, Arc<Self>) {
        let (tx, rx) = bounded(1024);
        let log = Arc::new(Self {
            rx,
            seen: Mutex::new(Vec::new()),
        });
        (tx, log)
    }

    /// Every event received so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        let mut seen = self.seen.lock().unwrap();
        seen.extend(self.rx.try_iter());
        seen.clone()
    }

    pub fn states(&self) -> Vec<TurnState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::TurnFailed { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, event: &SessionEvent) -> bool {
        self.events().contains(event)
    }
}

/// Live source driven by a list of cues; finite once the cues run out.
pub struct CueSource {
    cues: VecDeque<Cue>,
    log: Arc<EventLog>,
    waiting_since: Option<Instant>,
}

impl CueSource {
    pub fn new(log: Arc<EventLog>, cues: Vec<Cue>) -> Self {
        Self {
            cues: cues.into(),
            log,
            waiting_since: None,
        }
    }
}

impl AudioSource for CueSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let events = self.log.events();
        let (samples, done) = match self.cues.front_mut() {
            None => return Ok(Vec::new()),
            Some(Cue::Speech(count)) => {
                *count = count.saturating_sub(1);
                (vec![SPEECH_AMPLITUDE; FRAME_LEN], *count == 0)
            }
            Some(Cue::Silence(count)) => {
                *count = count.saturating_sub(1);
                (vec![0; FRAME_LEN], *count == 0)
            }
            Some(Cue::Until(condition)) => {
                let since = *self.waiting_since.get_or_insert_with(Instant::now);
                let met = condition(&events);
                if !met {
                    assert!(
                        since.elapsed() < CUE_TIMEOUT,
                        "session never reached the awaited point; events: {:?}",
                        events
                    );
                    thread::sleep(Duration::from_millis(2));
                }
                (Vec::new(), met)
            }
        };
        if done {
            self.cues.pop_front();
            self.waiting_since = None;
        }
        Ok(samples)
    }

    fn is_finite(&self) -> bool {
        self.cues.is_empty()
    }
}

/// One spoken utterance followed by enough silence to end it.
pub fn utterance(speech_frames: usize) -> Vec<Cue> {
    vec![Cue::Speech(speech_frames), Cue::Silence(10)]
}

fn count(events: &[SessionEvent], matches: fn(&SessionEvent) -> bool) -> usize {
    events.iter().filter(|e| matches(e)).count()
}

/// Wait until `n` replies completed.
pub fn completed(n: usize) -> Cue {
    Cue::Until(Box::new(move |events| {
        count(events, |e| matches!(e, SessionEvent::TurnCompleted { .. })) >= n
    }))
}

/// Wait until `n` turns failed.
pub fn failed(n: usize) -> Cue {
    Cue::Until(Box::new(move |events| {
        count(events, |e| matches!(e, SessionEvent::TurnFailed { .. })) >= n
    }))
}

/// Wait until the session entered `state` at least once.
pub fn entered(state: TurnState) -> Cue {
    Cue::Until(Box::new(move |events| {
        events.contains(&SessionEvent::StateChanged(state))
    }))
}

/// Never satisfied; the session has to be stopped from outside.
pub fn forever() -> Cue {
    Cue::Until(Box::new(|_| false))
}

/// 10ms frames, 50ms silence timeout, no barge-in.
pub fn config() -> SessionConfig {
    SessionConfig {
        format: FrameFormat::new(16000, 10).unwrap(),
        silence_timeout_ms: 50,
        system_prompt: Some("Be brief.".to_string()),
        turn_timeout: Duration::from_secs(2),
        barge_in: false,
        ..SessionConfig::default()
    }
}

/// Conversation rendered as `role: content` lines.
pub fn transcript(conversation: &talkback::Conversation) -> Vec<String> {
    conversation
        .turns()
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect()
}

pub fn contents(conversation: &talkback::Conversation, role: Role) -> Vec<String> {
    conversation
        .turns()
        .iter()
        .filter(|t| t.role == role)
        .map(|t| t.content.clone())
        .collect()
}
