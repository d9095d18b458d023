//! Live capture edge: microphone (primary) and optional secondary source

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, Stream};
use parking_lot::Mutex;
use std::sync::Arc;

use super::ducking::GainControl;
use super::mixer::CaptureMixer;
use super::resample::resample;
use super::AudioError;

/// Feeds live device samples into the capture mixer and hands mixed blocks
/// to the session.
pub struct CaptureEngine {
    host: Host,
    mixer: Arc<Mutex<CaptureMixer>>,
    primary_stream: Option<Stream>,
    secondary_stream: Option<Stream>,
    selected_primary: Option<String>,
    selected_secondary: Option<String>,
}

impl CaptureEngine {
    pub fn new(mixer: Arc<Mutex<CaptureMixer>>) -> Self {
        Self {
            host: cpal::default_host(),
            mixer,
            primary_stream: None,
            secondary_stream: None,
            selected_primary: None,
            selected_secondary: None,
        }
    }

    /// List available input devices
    pub fn list_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to enumerate input devices: {}", e)))?;

        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Select the microphone by name (None for default)
    pub fn select_primary(&mut self, name: Option<String>) {
        self.selected_primary = name;
    }

    /// Select the secondary source by name (None for default)
    pub fn select_secondary(&mut self, name: Option<String>) {
        self.selected_secondary = name;
    }

    fn device_by_name(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            Some(device_name) => {
                let devices = self.host.input_devices().map_err(|e| {
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
            None => self.host.default_input_device().ok_or_else(|| {
                AudioError::DeviceUnavailable("No default input device available".to_string())
            }),
        }
    }

    /// Open the microphone and start feeding the mixer. `on_block` receives
    /// each mixed block together with the bus sample rate. Failure here is
    /// fatal to the session.
    ///
    /// Returns the capture device's sample rate.
    pub fn start_primary<F>(&mut self, on_block: F) -> Result<u32, AudioError>
    where
        F: FnMut(Vec<f32>, u32) + Send + 'static,
    {
        let device = self.device_by_name(self.selected_primary.as_deref())?;
        tracing::info!("Using input device: {}", device.name().unwrap_or_default());

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to get input config: {}", e)))?;

        let config = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;
        self.mixer.lock().set_sample_rate(sample_rate);

        let on_block = Arc::new(Mutex::new(on_block));

        let err_fn = |err| {
            tracing::error!("Audio capture error: {}", err);
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mixer = self.mixer.clone();
                let on_block = on_block.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        feed_primary(&mixer, data, channels, sample_rate, &mut *on_block.lock());
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mixer = self.mixer.clone();
                let on_block = on_block.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let float_data: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        feed_primary(&mixer, &float_data, channels, sample_rate, &mut *on_block.lock());
                    },
                    err_fn,
                    None,
                )
            }
            format => {
                return Err(AudioError::DeviceUnavailable(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to start stream: {}", e)))?;

        self.primary_stream = Some(stream);
        tracing::info!("Primary capture started at {} Hz", sample_rate);
        Ok(sample_rate)
    }

    /// Open the secondary source and connect it to the bus. The caller
    /// treats failure as a degraded state, not a session error.
    pub fn start_secondary(&mut self, gain: Arc<GainControl>) -> Result<(), AudioError> {
        let device = self.device_by_name(self.selected_secondary.as_deref())?;
        tracing::info!(
            "Using secondary device: {}",
            device.name().unwrap_or_default()
        );

        let supported = device.default_input_config().map_err(|e| {
            AudioError::DeviceUnavailable(format!("Failed to get secondary config: {}", e))
        })?;

        let config = supported.config();
        let source_rate = config.sample_rate.0;
        let channels = config.channels as usize;
        let bus_rate = self.mixer.lock().sample_rate();

        self.mixer.lock().attach_secondary(gain);

        let err_fn = |err| {
            tracing::error!("Secondary capture error: {}", err);
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mixer = self.mixer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        feed_secondary(&mixer, data, channels, source_rate, bus_rate);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mixer = self.mixer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let float_data: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        feed_secondary(&mixer, &float_data, channels, source_rate, bus_rate);
                    },
                    err_fn,
                    None,
                )
            }
            format => {
                self.mixer.lock().detach_secondary();
                return Err(AudioError::DeviceUnavailable(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| {
            self.mixer.lock().detach_secondary();
            AudioError::DeviceUnavailable(format!("Failed to build secondary stream: {}", e))
        })?;

        stream.play().map_err(|e| {
            self.mixer.lock().detach_secondary();
            AudioError::DeviceUnavailable(format!("Failed to start secondary stream: {}", e))
        })?;

        self.secondary_stream = Some(stream);
        tracing::info!("Secondary capture started at {} Hz", source_rate);
        Ok(())
    }

    /// Disconnect the secondary source; primary capture continues.
    pub fn stop_secondary(&mut self) {
        self.secondary_stream = None;
        self.mixer.lock().detach_secondary();
    }

    /// Release both capture devices. Dropping an already-stopped stream is
    /// a no-op, so teardown cannot fail.
    pub fn stop(&mut self) {
        self.primary_stream = None;
        self.stop_secondary();
    }
}

/// Fold interleaved device frames to mono and run the bus.
fn feed_primary<F>(
    mixer: &Arc<Mutex<CaptureMixer>>,
    data: &[f32],
    channels: usize,
    sample_rate: u32,
    on_block: &mut F,
) where
    F: FnMut(Vec<f32>, u32),
{
    let mut blocks = Vec::new();
    {
        let mut mixer = mixer.lock();
        push_mono(&mut mixer, data, channels, true);
        while let Some(block) = mixer.drain_block() {
            blocks.push(block);
        }
    }
    // Encode outside the bus lock
    for block in blocks {
        on_block(block, sample_rate);
    }
}

fn feed_secondary(
    mixer: &Arc<Mutex<CaptureMixer>>,
    data: &[f32],
    channels: usize,
    source_rate: u32,
    bus_rate: u32,
) {
    let mut mixer = mixer.lock();
    if source_rate == bus_rate || bus_rate == 0 {
        push_mono(&mut mixer, data, channels, false);
    } else {
        let mono = fold_mono(data, channels);
        mixer.push_secondary(&resample(&mono, source_rate, bus_rate));
    }
}

fn push_mono(mixer: &mut CaptureMixer, data: &[f32], channels: usize, primary: bool) {
    if channels > 1 {
        let mono = fold_mono(data, channels);
        if primary {
            mixer.push_primary(&mono);
        } else {
            mixer.push_secondary(&mono);
        }
    } else if primary {
        mixer.push_primary(data);
    } else {
        mixer.push_secondary(data);
    }
}

fn fold_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_mono_averages_channels() {
        let interleaved = [0.2, 0.4, -0.2, -0.4];
        let mono = fold_mono(&interleaved, 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn fold_mono_passes_single_channel_through() {
        let data = [0.1, 0.2, 0.3];
        assert_eq!(fold_mono(&data, 1), data.to_vec());
    }
}
