//! Listening pipeline and turn-taking orchestrator.
//!
//! Capture, gate and assembler run as stations on their own threads, connected
//! by bounded crossbeam channels. The orchestrator consumes finished
//! utterances and drives recognition, generation and playback.

pub mod assembler;
pub mod barge_in;
pub mod error;
pub mod events;
pub mod frame_source;
pub mod gate_station;
pub mod latency;
pub mod orchestrator;
pub mod station;
pub mod types;
pub mod workers;

pub use assembler::{AssemblerStation, ListenGate};
pub use barge_in::BargeInMonitor;
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StationError, TeeReporter};
pub use events::{SessionEvent, TurnState};
pub use frame_source::{FrameSlicer, FrameSource};
pub use gate_station::GateStation;
pub use latency::{LatencyStats, LatencyTracker, PhaseTimings};
pub use orchestrator::{Session, SessionConfig, SessionHandle, SessionParts, SessionReport};
pub use station::{Station, StationRunner};
pub use types::{AudioFrame, Captured, Gated, Segment, Utterance};
pub use workers::{GenerationEvent, GenerationWorker, RecognitionWorker};
