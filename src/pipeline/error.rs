//! Error types and reporting for pipeline stations.

use crate::error::TalkbackError;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Errors that can occur during station processing.
#[derive(Debug, Clone)]
pub enum StationError {
    /// The item is dropped and the station keeps running.
    Recoverable(String),
    /// The station shuts down.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

impl From<TalkbackError> for StationError {
    fn from(error: TalkbackError) -> Self {
        if error.is_fatal() {
            StationError::Fatal(error.to_string())
        } else {
            StationError::Recoverable(error.to_string())
        }
    }
}

/// Receives errors from stations and background workers.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, station: &str, error: &StationError);
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(_) => tracing::warn!("[{}] {}", station, error),
            StationError::Fatal(_) => tracing::error!("[{}] {}", station, error),
        }
    }
}

/// Keeps every report for later inspection.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    reports: Arc<Mutex<Vec<(String, StationError)>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, StationError)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn first_fatal(&self) -> Option<(String, String)> {
        self.reports().into_iter().find_map(|(station, error)| match error {
            StationError::Fatal(msg) => Some((station, msg)),
            StationError::Recoverable(_) => None,
        })
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, station: &str, error: &StationError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((station.to_string(), error.clone()));
        }
    }
}

/// Forwards to two reporters.
pub struct TeeReporter {
    first: Arc<dyn ErrorReporter>,
    second: Arc<dyn ErrorReporter>,
}

impl TeeReporter {
    pub fn new(first: Arc<dyn ErrorReporter>, second: Arc<dyn ErrorReporter>) -> Self {
        Self { first, second }
    }
}

impl ErrorReporter for TeeReporter {
    fn report(&self, station: &str, error: &StationError) {
        self.first.report(station, error);
        self.second.report(station, error);
    }
}
