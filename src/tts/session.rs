//! Playback sessions: one synthesis + playback of one phrase.

use crate::error::TalkbackError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;
const FAILED: u8 = 3;

/// Lifecycle of a [`PlaybackSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            FINISHED => SessionState::Finished,
            CANCELLED => SessionState::Cancelled,
            FAILED => SessionState::Failed,
            _ => SessionState::Running,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Running => RUNNING,
            SessionState::Finished => FINISHED,
            SessionState::Cancelled => CANCELLED,
            SessionState::Failed => FAILED,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum PlaybackOutcome {
    /// All audio was played.
    Finished,
    /// Cancelled by barge-in or shutdown. Not an error.
    Cancelled,
    /// Synthesis failed, stalled, or the output device failed.
    Failed(TalkbackError),
}

impl PlaybackOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            PlaybackOutcome::Finished => SessionState::Finished,
            PlaybackOutcome::Cancelled => SessionState::Cancelled,
            PlaybackOutcome::Failed(_) => SessionState::Failed,
        }
    }
}

/// Single-use playback session.
///
/// Clones share the cancellation token and the terminal state. The
/// cancellation flag can never be cleared, and the session leaves `Running`
/// exactly once.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl PlaybackSession {
    /// Session cancelled by `token` (usually a child of the reply token).
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            state: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    /// Session with its own, unparented token.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token observed by the synthesis service call.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move from `Running` to a terminal state. Returns false if the session
    /// had already terminated.
    pub fn complete(&self, terminal: SessionState) -> bool {
        if terminal == SessionState::Running {
            return false;
        }
        self.state
            .compare_exchange(
                RUNNING,
                terminal.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn is_terminal(&self) -> bool {
        self.state() != SessionState::Running
    }
}
