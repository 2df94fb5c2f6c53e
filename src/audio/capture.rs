//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::{AudioSource, CaptureDevice};
use crate::audio::wav::{downmix, resample};
use crate::defaults;
use crate::error::{Result, TalkbackError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL triggers noisy ALSA/JACK/PipeWire messages when probing backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA messages that occur during audio backend probing.
///
/// Must be called at startup before any threads are spawned.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
pub(crate) const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Names of the available input devices; preferred ones are marked.
pub fn list_input_devices() -> Result<Vec<String>> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| TalkbackError::device(format!("Failed to enumerate devices: {}", e)))?;
        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| {
                if is_preferred_device(&name) {
                    format!("{} [recommended]", name)
                } else {
                    name
                }
            })
            .collect())
    })
}

/// Find an input device by exact name, or the best default.
fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| TalkbackError::device(format!("Failed to enumerate devices: {}", e)))?;

        let mut preferred = None;
        for device in devices {
            let Ok(name) = device.name() else { continue };
            match device_name {
                Some(wanted) if name == wanted => return Ok(device),
                None if preferred.is_none() && is_preferred_device(&name) => {
                    preferred = Some(device)
                }
                _ => {}
            }
        }

        if let Some(wanted) = device_name {
            return Err(TalkbackError::AudioDeviceNotFound {
                device: wanted.to_string(),
            });
        }

        preferred
            .or_else(|| host.default_input_device())
            .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only touched through the owning Mutex, one thread at
/// a time, and its methods are called synchronously.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture producing mono i16 PCM at the configured rate.
///
/// Tries i16 then f32 at the target format, then falls back to the device's
/// native config with software downmixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Create a capture source on `device_name`, or the best default input.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_input_device(device_name)?;

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::warn!("audio input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let cap = backlog_cap(self.sample_rate);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    append_capped(&mut buf, data, cap);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let cap = backlog_cap(self.sample_rate);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                let converted: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                if let Ok(mut buf) = buffer.lock() {
                    append_capped(&mut buf, &converted, cap);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Build a stream at the device's native config and convert in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self.device.default_input_config().map_err(|e| {
            TalkbackError::device(format!("Failed to query default input config: {}", e))
        })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            "using native input format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            tracing::warn!("audio input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let cap = backlog_cap(self.sample_rate);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let mono = downmix(data, native_channels);
                        let converted = resample(&mono, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            append_capped(&mut buf, &converted, cap);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| {
                    TalkbackError::device(format!("Failed to build native i16 stream: {}", e))
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                        let mono = downmix(&i16_data, native_channels);
                        let converted = resample(&mono, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            append_capped(&mut buf, &converted, cap);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| {
                    TalkbackError::device(format!("Failed to build native f32 stream: {}", e))
                }),
            fmt => Err(TalkbackError::device(format!(
                "Unsupported native sample format: {:?}",
                fmt
            ))),
        }
    }
}

/// Samples the device buffer may hold while nobody reads it.
fn backlog_cap(sample_rate: u32) -> usize {
    sample_rate as usize * defaults::MAX_CAPTURE_BACKLOG_SECS
}

/// Append `samples`, dropping the oldest audio beyond `cap`.
fn append_capped(buf: &mut Vec<i16>, samples: &[i16], cap: usize) {
    buf.extend_from_slice(samples);
    if buf.len() > cap {
        let excess = buf.len() - cap;
        buf.drain(..excess);
    }
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self
                .stream
                .lock()
                .map_err(|e| TalkbackError::device(format!("Failed to lock stream: {}", e)))?;
            if stream_guard.is_some() {
                return Ok(());
            }
        }

        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| TalkbackError::device(format!("Failed to start audio stream: {}", e)))?;

        // Some PipeWire-ALSA setups accept non-native configs but never fire the callback.
        std::thread::sleep(Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }

            let native_stream = self.build_stream_native()?;
            native_stream.play().map_err(|e| {
                TalkbackError::device(format!("Failed to start native audio stream: {}", e))
            })?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| TalkbackError::device(format!("Failed to lock stream: {}", e)))?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| TalkbackError::device(format!("Failed to lock stream: {}", e)))?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| TalkbackError::device(format!("Failed to stop audio stream: {}", e)))?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|e| TalkbackError::device(format!("Failed to lock audio buffer: {}", e)))?;

        Ok(std::mem::take(&mut *buffer))
    }
}

/// Opens independent [`CpalAudioSource`] streams on one input device.
#[derive(Debug, Clone)]
pub struct CpalCaptureDevice {
    device_name: Option<String>,
    sample_rate: u32,
}

impl CpalCaptureDevice {
    pub fn new(device_name: Option<String>, sample_rate: u32) -> Self {
        Self {
            device_name,
            sample_rate,
        }
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn open(&self) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(CpalAudioSource::new(
            self.device_name.as_deref(),
            self.sample_rate,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_device_detection() {
        assert!(is_preferred_device("PipeWire Sound Server"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    fn test_backlog_keeps_newest_samples() {
        let mut buf = vec![1, 2, 3];
        append_capped(&mut buf, &[4, 5, 6], 4);
        assert_eq!(buf, vec![3, 4, 5, 6]);
        append_capped(&mut buf, &[7], 10);
        assert_eq!(buf, vec![3, 4, 5, 6, 7]);
        assert_eq!(backlog_cap(16000), 16000 * defaults::MAX_CAPTURE_BACKLOG_SECS);
    }

    #[test]
    fn test_capture_device_keeps_settings() {
        let device = CpalCaptureDevice::new(Some("pulse".to_string()), 16000);
        assert_eq!(device.device_name.as_deref(), Some("pulse"));
        assert_eq!(device.sample_rate, 16000);
    }
}
