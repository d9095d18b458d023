pub mod audio;
mod session;

pub use audio::{
    decode_payload, encode_bytes, from_pcm16, pcm_blob, resample, to_pcm16, AudioError,
    CaptureEngine, CaptureMixer, DuckingController, GainControl, PipelineConfig, PlaybackEngine,
    PlaybackScheduler, RenderOutcome, SampleBuffer, ScheduleOutcome, WireBlob,
    CAPTURE_BLOCK_SAMPLES, DUCK_RAMP_MS, INBOUND_CHANNELS, INBOUND_SAMPLE_RATE,
    NOMINAL_SECONDARY_GAIN, OUTBOUND_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE, RESTORE_RAMP_MS,
    SCHEDULING_LOOKAHEAD_MS,
};
pub use session::{AudioSession, InboundMessage, OutboundAudioFrame};

/// Install the default tracing subscriber. Call once from the embedding
/// application's entry point.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
