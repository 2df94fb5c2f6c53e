//! Operator-facing session notifications.

use crossbeam_channel::{Sender, TrySendError};
use std::fmt;

/// Turn-taking state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Listening for the user.
    Idle,
    /// User speech in progress.
    Assembling,
    Recognizing,
    /// Generating and speaking the reply.
    Responding,
    Stopped,
}

impl TurnState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TurnState::Idle => 0,
            TurnState::Assembling => 1,
            TurnState::Recognizing => 2,
            TurnState::Responding => 3,
            TurnState::Stopped => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => TurnState::Assembling,
            2 => TurnState::Recognizing,
            3 => TurnState::Responding,
            4 => TurnState::Stopped,
            _ => TurnState::Idle,
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Assembling => "assembling",
            TurnState::Recognizing => "recognizing",
            TurnState::Responding => "responding",
            TurnState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(TurnState),
    /// A final transcript was appended as a user turn.
    UserTurn(String),
    /// A phrase was appended as an assistant turn.
    AssistantPhrase { sequence: usize, text: String },
    /// The user interrupted the reply.
    BargeIn,
    TurnFailed { message: String },
    TurnCompleted { turns_completed: usize },
}

/// Non-blocking event sender; a full or closed channel never stalls the session.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventEmitter {
    tx: Option<Sender<SessionEvent>>,
}

impl EventEmitter {
    pub(crate) fn new(tx: Option<Sender<SessionEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!("event channel full, dropped {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            TurnState::Idle,
            TurnState::Assembling,
            TurnState::Recognizing,
            TurnState::Responding,
            TurnState::Stopped,
        ] {
            assert_eq!(TurnState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn full_channel_drops_events() {
        let (tx, rx) = bounded(1);
        let emitter = EventEmitter::new(Some(tx));
        emitter.emit(SessionEvent::BargeIn);
        emitter.emit(SessionEvent::UserTurn("dropped".to_string()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::BargeIn);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_channel_is_a_no_op() {
        EventEmitter::default().emit(SessionEvent::BargeIn);
    }
}
