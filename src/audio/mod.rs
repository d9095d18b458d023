mod capture;
mod codec;
mod ducking;
mod mixer;
mod pcm;
mod playback;
mod resample;
mod scheduler;

pub use capture::CaptureEngine;
pub use codec::{decode_payload, encode_bytes, WireBlob};
pub use ducking::{DuckingController, GainControl};
pub use mixer::CaptureMixer;
pub use pcm::{from_pcm16, pcm_blob, to_pcm16};
pub use playback::PlaybackEngine;
pub use resample::resample;
pub use scheduler::{PlaybackScheduler, RenderOutcome, ScheduleOutcome};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate of outbound frames sent to the agent
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of inbound agent speech (fixed by the protocol, not negotiated)
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;
/// Inbound agent speech is mono
pub const INBOUND_CHANNELS: u16 = 1;
/// Mixed capture samples per outbound block
pub const CAPTURE_BLOCK_SAMPLES: usize = 4096;
/// Sample rate requested from the output device
pub const PLAYBACK_SAMPLE_RATE: u32 = 48_000;
/// Channels requested from the output device (mono for voice)
pub const PLAYBACK_CHANNELS: u16 = 1;
/// Samples per output device callback (20ms at 48kHz)
pub const RENDER_BLOCK_SAMPLES: usize = 960;
/// Secondary-source gain while the agent is quiet
pub const NOMINAL_SECONDARY_GAIN: f32 = 0.7;
/// Ramp length when ducking the secondary source
pub const DUCK_RAMP_MS: u32 = 50;
/// Ramp length when restoring the secondary source
pub const RESTORE_RAMP_MS: u32 = 200;
/// Margin added when (re)starting the playback timeline
pub const SCHEDULING_LOOKAHEAD_MS: u32 = 50;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Inbound payload is not valid transport encoding")]
    MalformedEncoding,
    #[error("PCM byte length {len} does not divide into {channels} channel(s)")]
    FrameAlignment { len: usize, channels: u16 },
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Output rejected a scheduled unit: {0}")]
    PlaybackFailure(String),
    #[error("Session is already running")]
    AlreadyRunning,
}

/// Pipeline tuning. Defaults match the reference deployment; the surrounding
/// application may override before constructing a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub outbound_rate: u32,
    pub inbound_rate: u32,
    pub capture_block: usize,
    pub nominal_secondary_gain: f32,
    pub duck_ramp_ms: u32,
    pub restore_ramp_ms: u32,
    pub scheduling_lookahead_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            outbound_rate: OUTBOUND_SAMPLE_RATE,
            inbound_rate: INBOUND_SAMPLE_RATE,
            capture_block: CAPTURE_BLOCK_SAMPLES,
            nominal_secondary_gain: NOMINAL_SECONDARY_GAIN,
            duck_ramp_ms: DUCK_RAMP_MS,
            restore_ramp_ms: RESTORE_RAMP_MS,
            scheduling_lookahead_ms: SCHEDULING_LOOKAHEAD_MS,
        }
    }
}

/// A decoded run of audio: planar f32 channels in [-1, 1] plus their rate.
/// Immutable once produced; ownership moves stage to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { channels, sample_rate }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Fold to a single channel by averaging.
    pub fn into_mono(mut self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels.pop().unwrap_or_default();
        }
        let frames = self.frame_count();
        let scale = 1.0 / self.channels.len() as f32;
        (0..frames)
            .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() * scale)
            .collect()
    }
}
