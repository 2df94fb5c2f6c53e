//! Voice activity gate station: classifies frames and marks utterance ends.

use crate::audio::vad::{Endpointer, FrameClassifier};
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{Captured, Gated};
use std::sync::Arc;

pub struct GateStation {
    classifier: Arc<dyn FrameClassifier>,
    endpointer: Endpointer,
    frames_seen: u64,
    markers_emitted: u64,
}

impl GateStation {
    pub fn new(classifier: Arc<dyn FrameClassifier>, endpointer: Endpointer) -> Self {
        Self {
            classifier,
            endpointer,
            frames_seen: 0,
            markers_emitted: 0,
        }
    }
}

impl Station for GateStation {
    type Input = Captured;
    type Output = Gated;

    fn process(&mut self, input: Captured) -> Result<Option<Gated>, StationError> {
        let frame = match input {
            Captured::Frame(frame) => frame,
            Captured::EndOfStream => {
                self.endpointer.reset();
                return Ok(Some(Gated::EndOfStream));
            }
        };

        self.frames_seen += 1;
        let is_speech = self.classifier.is_speech(&frame.samples);
        let end_of_utterance = self.endpointer.observe(is_speech);
        if end_of_utterance {
            self.markers_emitted += 1;
            tracing::trace!("gate: end of utterance at frame {}", frame.sequence);
        }

        Ok(Some(Gated::Frame {
            frame: frame.classified(is_speech),
            end_of_utterance,
        }))
    }

    fn name(&self) -> &'static str {
        "gate"
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            "gate: {} frames, {} end-of-utterance markers",
            self.frames_seen,
            self.markers_emitted
        );
    }
}
