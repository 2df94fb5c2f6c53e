//! Audio device primitives and frame classification.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod playback;
pub mod recorder;
#[cfg(feature = "cpal-audio")]
pub mod speaker;
pub mod vad;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::{CpalAudioSource, CpalCaptureDevice, list_input_devices, suppress_audio_warnings};
pub use playback::{AudioSink, CollectorSink};
pub use recorder::{
    AudioSource, CaptureDevice, MockAudioSource, MockCaptureDevice, ScriptStep,
    ScriptedAudioSource, SwitchedAudioSource,
};
#[cfg(feature = "cpal-audio")]
pub use speaker::{CpalAudioSink, list_output_devices};
pub use vad::{Endpointer, EnergyClassifier, FrameClassifier, FrameFormat, calculate_rms};
pub use wav::WavAudioSource;
