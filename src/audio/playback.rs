//! Output device edge: renders the playback schedule into the device callback

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;

use super::scheduler::PlaybackScheduler;
use super::{AudioError, PLAYBACK_CHANNELS, PLAYBACK_SAMPLE_RATE, RENDER_BLOCK_SAMPLES};

/// Pulls rendered audio from the scheduler into the output device.
pub struct PlaybackEngine {
    host: Host,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    stream: Option<Stream>,
    selected_device: Option<String>,
}

impl PlaybackEngine {
    pub fn new(scheduler: Arc<Mutex<PlaybackScheduler>>) -> Self {
        Self {
            host: cpal::default_host(),
            scheduler,
            stream: None,
            selected_device: None,
        }
    }

    /// List available output devices
    pub fn list_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = host.output_devices().map_err(|e| {
            AudioError::DeviceUnavailable(format!("Failed to enumerate output devices: {}", e))
        })?;

        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Select output device by name (None for default)
    pub fn select_device(&mut self, name: Option<String>) {
        self.selected_device = name;
    }

    fn device_by_name(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            Some(device_name) => {
                let devices = self.host.output_devices().map_err(|e| {
                    AudioError::DeviceUnavailable(format!("Failed to enumerate devices: {}", e))
                })?;

                for device in devices {
                    if let Ok(n) = device.name() {
                        if n == device_name {
                            return Ok(device);
                        }
                    }
                }
                Err(AudioError::DeviceUnavailable(format!(
                    "Device '{}' not found",
                    device_name
                )))
            }
            None => self.host.default_output_device().ok_or_else(|| {
                AudioError::DeviceUnavailable("No default output device available".to_string())
            }),
        }
    }

    /// Start the output stream. `on_idle` fires once each time the last
    /// active unit finishes, from the device callback.
    pub fn start<F>(&mut self, on_idle: F) -> Result<(), AudioError>
    where
        F: Fn() + Send + 'static,
    {
        let device = self.device_by_name(self.selected_device.as_deref())?;
        tracing::info!("Using output device: {}", device.name().unwrap_or_default());

        let config = StreamConfig {
            channels: PLAYBACK_CHANNELS,
            sample_rate: cpal::SampleRate(PLAYBACK_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(RENDER_BLOCK_SAMPLES as u32),
        };

        let scheduler = self.scheduler.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let outcome = scheduler.lock().render(data);
                    if outcome.became_idle {
                        on_idle();
                    }
                },
                move |err| {
                    tracing::error!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| {
                AudioError::DeviceUnavailable(format!("Failed to build output stream: {}", e))
            })?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        tracing::info!("Playback started at {} Hz", PLAYBACK_SAMPLE_RATE);
        Ok(())
    }

    /// Release the output device. Dropping an already-stopped stream is a
    /// no-op, so teardown cannot fail.
    pub fn stop(&mut self) {
        self.stream = None;
    }
}
