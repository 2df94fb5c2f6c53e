//! WAV file audio source for offline runs.

use crate::audio::recorder::AudioSource;
use crate::error::{Result, TalkbackError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Audio source that reads from WAV file data.
///
/// Supports arbitrary sample rates and mono/stereo input, converted to mono
/// at the requested rate. Finite: an empty read means the file is exhausted.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
}

impl WavAudioSource {
    /// Create from any reader, converting to mono at `target_rate`.
    pub fn from_reader(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader)
            .map_err(|e| TalkbackError::device(format!("Failed to parse WAV file: {}", e)))?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels as usize;

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TalkbackError::device(format!("Failed to read WAV samples: {}", e)))?;

        let mono_samples = downmix(&raw_samples, source_channels);
        let samples = resample(&mono_samples, source_rate, target_rate);

        Ok(Self {
            samples,
            position: 0,
            // 100ms reads
            chunk_size: (target_rate / 10) as usize,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            TalkbackError::device(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Self::from_reader(Box::new(BufReader::new(file)), target_rate)
    }

    /// Total number of samples after conversion.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the file held no audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = std::cmp::min(self.position + self.chunk_size, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Average interleaved channels down to mono.
pub(crate) fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
