//! Station abstraction for the listening pipeline.
//!
//! Each station runs on its own named thread and is connected to its
//! neighbours by bounded crossbeam channels.

use crate::error::TalkbackError;
use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A processing step with one input and at most one output per input.
pub trait Station: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Process one item.
    ///
    /// `Ok(None)` consumes the input without producing anything.
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    /// Name used for the thread and for error reports.
    fn name(&self) -> &'static str;

    /// Called once after the input channel closes or a fatal error.
    fn shutdown(&mut self) {}
}

/// Owns the thread a station runs on.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    pub fn spawn(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, TalkbackError> {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(format!("station-{station_name}"))
            .spawn(move || {
                Self::run_station(&mut station, input_rx, output_tx, error_reporter);
            })?;

        Ok(Self {
            handle: Some(handle),
            station_name,
            _phantom: PhantomData,
        })
    }

    fn run_station(
        station: &mut S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) {
        let station_name = station.name();

        while let Ok(input) = input_rx.recv() {
            match station.process(input) {
                Ok(Some(output)) => {
                    if output_tx.send(output).is_err() {
                        tracing::debug!("{}: downstream closed", station_name);
                        break;
                    }
                }
                Ok(None) => {}
                Err(error @ StationError::Recoverable(_)) => {
                    error_reporter.report(station_name, &error);
                }
                Err(error @ StationError::Fatal(_)) => {
                    error_reporter.report(station_name, &error);
                    break;
                }
            }
        }

        station.shutdown();
        tracing::debug!("{}: stopped", station_name);
    }

    /// Wait for the station thread to finish.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &'static str {
        self.station_name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}
