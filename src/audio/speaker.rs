//! Audio playback using CPAL.

use crate::audio::capture::{SendableStream, with_suppressed_stderr};
use crate::audio::playback::AudioSink;
use crate::error::{Result, TalkbackError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How much audio may sit in the device queue before `write` blocks.
const MAX_QUEUED_MS: u32 = 300;

const WAIT_STEP: Duration = Duration::from_millis(5);

/// Speaker output fed from a shared sample queue.
///
/// The output callback pulls mono samples at the session rate and repeats
/// them across the device's channels. `clear` drops everything not yet pulled.
pub struct CpalAudioSink {
    _stream: SendableStream,
    queue: Arc<Mutex<VecDeque<i16>>>,
    max_queued: usize,
}

impl CpalAudioSink {
    /// Open `device_name`, or the default output device, at `sample_rate`.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_output_device(device_name)?;
        let queue = Arc::new(Mutex::new(VecDeque::new()));

        let stream = build_output_stream(&device, sample_rate, Arc::clone(&queue))?;
        stream
            .play()
            .map_err(|e| TalkbackError::device(format!("Failed to start output stream: {}", e)))?;

        Ok(Self {
            _stream: SendableStream(stream),
            queue,
            max_queued: crate::defaults::samples_per_ms(sample_rate, MAX_QUEUED_MS),
        })
    }

    fn queued(&self) -> Result<usize> {
        self.queue
            .lock()
            .map(|q| q.len())
            .map_err(|e| TalkbackError::device(format!("Failed to lock output queue: {}", e)))
    }
}

impl AudioSink for CpalAudioSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        while self.queued()? > self.max_queued {
            std::thread::sleep(WAIT_STEP);
        }
        let mut queue = self
            .queue
            .lock()
            .map_err(|e| TalkbackError::device(format!("Failed to lock output queue: {}", e)))?;
        queue.extend(samples.iter().copied());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|e| TalkbackError::device(format!("Failed to lock output queue: {}", e)))?;
        queue.clear();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while self.queued()? > 0 {
            std::thread::sleep(WAIT_STEP);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "speaker"
    }
}

/// Names of the available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.output_devices().map_err(|e| {
            TalkbackError::device(format!("Failed to enumerate output devices: {}", e))
        })?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    })
}

fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        if let Some(wanted) = device_name {
            let devices = host.output_devices().map_err(|e| {
                TalkbackError::device(format!("Failed to enumerate output devices: {}", e))
            })?;
            for device in devices {
                if device.name().map(|n| n == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            return Err(TalkbackError::AudioDeviceNotFound {
                device: wanted.to_string(),
            });
        }
        host.default_output_device()
            .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                device: "default output".to_string(),
            })
    })
}

/// Try mono i16 at the session rate, then mono f32, then the device default
/// (channel duplication; the device must run at the session rate).
fn build_output_stream(
    device: &cpal::Device,
    sample_rate: u32,
    queue: Arc<Mutex<VecDeque<i16>>>,
) -> Result<cpal::Stream> {
    let err_callback = |err| {
        tracing::warn!("audio output stream error: {}", err);
    };

    let mono = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let q = Arc::clone(&queue);
    if let Ok(stream) = device.build_output_stream(
        &mono,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| fill(data, 1, &q, |s| s),
        err_callback,
        None,
    ) {
        return Ok(stream);
    }

    let q = Arc::clone(&queue);
    if let Ok(stream) = device.build_output_stream(
        &mono,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            fill(data, 1, &q, |s| s as f32 / i16::MAX as f32)
        },
        err_callback,
        None,
    ) {
        return Ok(stream);
    }

    let default_config = device.default_output_config().map_err(|e| {
        TalkbackError::device(format!("Failed to query default output config: {}", e))
    })?;
    let channels = default_config.channels() as usize;
    let stereo = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_output_stream(
            &stereo,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill(data, channels, &queue, |s| s as f32 / i16::MAX as f32)
            },
            err_callback,
            None,
        )
        .map_err(|e| TalkbackError::device(format!("Failed to build output stream: {}", e)))
}

/// Fill one callback buffer from the queue, padding with silence.
fn fill<T: Copy + Default>(
    data: &mut [T],
    channels: usize,
    queue: &Mutex<VecDeque<i16>>,
    convert: impl Fn(i16) -> T,
) {
    let Ok(mut queue) = queue.lock() else {
        data.iter_mut().for_each(|s| *s = T::default());
        return;
    };
    for frame in data.chunks_mut(channels) {
        let value = queue.pop_front().map(&convert).unwrap_or_default();
        frame.iter_mut().for_each(|s| *s = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_duplicates_across_channels_and_pads() {
        let queue = Mutex::new(VecDeque::from(vec![5i16, 6]));
        let mut data = [0i16; 6];

        fill(&mut data, 2, &queue, |s| s);

        assert_eq!(data, [5, 5, 6, 6, 0, 0]);
        assert!(queue.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fill_converts_to_float() {
        let queue = Mutex::new(VecDeque::from(vec![i16::MAX]));
        let mut data = [0.5f32; 2];

        fill(&mut data, 1, &queue, |s| s as f32 / i16::MAX as f32);

        assert_eq!(data, [1.0, 0.0]);
    }
}
