//! The full-duplex session
//! Manages the complete pipeline: capture -> mix -> encode -> outbound queue,
//! and inbound frames -> decode -> playback schedule, with ducking between
//! the two directions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::{
    decode_payload, from_pcm16, pcm_blob, resample, AudioError, CaptureEngine, CaptureMixer,
    DuckingController, PipelineConfig, PlaybackEngine, PlaybackScheduler, INBOUND_CHANNELS,
    PLAYBACK_SAMPLE_RATE,
};

/// One captured block, encoded and ready for the transport.
#[derive(Clone, Debug, Serialize)]
pub struct OutboundAudioFrame {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// The audio-relevant part of one message from the transport.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InboundMessage {
    /// Base64 PCM16 payload; absent when the message carries no audio
    pub data: Option<String>,
    /// The agent's turn was cut off by the user
    pub interrupted: bool,
    /// The agent finished its turn; no audio-pipeline effect
    pub turn_complete: bool,
}

impl InboundMessage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Threshold for "speaking" detection on the outbound level meter
const SPEAKING_THRESHOLD: f32 = 0.02;

#[derive(Default)]
struct LevelState {
    level: f32,
    rms: f32,
}

/// The complete bidirectional audio pipeline.
///
/// Both directions run in device callbacks; every operation here is a
/// bounded-time transformation over fixed-size buffers, so neither callback
/// ever blocks.
pub struct AudioSession {
    config: PipelineConfig,
    mixer: Arc<Mutex<CaptureMixer>>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    ducking: Arc<DuckingController>,
    capture: Mutex<CaptureEngine>,
    playback: Mutex<PlaybackEngine>,
    is_running: AtomicBool,
    is_muted: Arc<AtomicBool>,
    level: Arc<Mutex<LevelState>>,
    outbound_tx: mpsc::UnboundedSender<OutboundAudioFrame>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<OutboundAudioFrame>>,
}

impl AudioSession {
    pub fn new(config: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let mixer = Arc::new(Mutex::new(CaptureMixer::new(
            config.capture_block,
            PLAYBACK_SAMPLE_RATE,
        )));
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(
            PLAYBACK_SAMPLE_RATE,
            config.scheduling_lookahead_ms,
        )));
        let ducking = Arc::new(DuckingController::new(
            config.nominal_secondary_gain,
            config.duck_ramp_ms,
            config.restore_ramp_ms,
        ));

        Self {
            capture: Mutex::new(CaptureEngine::new(mixer.clone())),
            playback: Mutex::new(PlaybackEngine::new(scheduler.clone())),
            mixer,
            scheduler,
            ducking,
            config,
            is_running: AtomicBool::new(false),
            is_muted: Arc::new(AtomicBool::new(false)),
            level: Arc::new(Mutex::new(LevelState::default())),
            outbound_tx: tx,
            outbound_rx: Mutex::new(rx),
        }
    }

    /// Select the microphone by name before starting (None for default)
    pub fn select_input_device(&self, name: Option<String>) {
        self.capture.lock().select_primary(name);
    }

    /// Select the output device by name before starting (None for default)
    pub fn select_output_device(&self, name: Option<String>) {
        self.playback.lock().select_device(name);
    }

    /// Select the secondary source by name (None for default)
    pub fn select_secondary_device(&self, name: Option<String>) {
        self.capture.lock().select_secondary(name);
    }

    /// Acquire devices and start both directions. Primary capture failure
    /// is fatal; the secondary source is attached separately and its
    /// absence only degrades the session.
    pub fn start(&self) -> Result<(), AudioError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRunning);
        }

        let ducking = self.ducking.clone();
        if let Err(e) = self.playback.lock().start(move || ducking.on_agent_idle()) {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let tx = self.outbound_tx.clone();
        let muted = self.is_muted.clone();
        let level = self.level.clone();
        let outbound_rate = self.config.outbound_rate;

        let started = self.capture.lock().start_primary(move |block, source_rate| {
            let rms = calculate_rms(&block);
            let is_muted = muted.load(Ordering::SeqCst);
            {
                let mut state = level.lock();
                state.rms = rms;
                state.level = if is_muted { 0.0 } else { rms_to_level(rms) };
            }
            if is_muted {
                return;
            }
            let _ = tx.send(encode_block(&block, source_rate, outbound_rate));
        });

        if let Err(e) = started {
            self.playback.lock().stop();
            self.is_running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        tracing::info!("Audio session started");
        Ok(())
    }

    /// Try to connect the secondary source. Failure leaves the session in
    /// the (observable) primary-only state.
    pub fn attach_secondary(&self) -> Result<(), AudioError> {
        match self.capture.lock().start_secondary(self.ducking.gain()) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Secondary source unavailable, capturing primary only: {}", e);
                Err(e)
            }
        }
    }

    pub fn detach_secondary(&self) {
        self.capture.lock().stop_secondary();
    }

    /// False means primary-only capture; surface this to the user.
    pub fn has_secondary(&self) -> bool {
        self.mixer.lock().has_secondary()
    }

    /// Apply one transport message to the pipeline. Per-frame errors are
    /// logged and the frame dropped; the loops never stop.
    pub fn handle_message(&self, message: &InboundMessage) {
        if message.interrupted {
            let mut scheduler = self.scheduler.lock();
            self.ducking.on_interruption(&mut scheduler);
        }

        if let Some(data) = message.data.as_deref() {
            if let Err(e) = self.schedule_inbound(data) {
                tracing::warn!("Dropping inbound audio frame: {}", e);
            }
        }

        if message.turn_complete {
            tracing::debug!("Agent turn complete");
        }
    }

    fn schedule_inbound(&self, data: &str) -> Result<(), AudioError> {
        let bytes = decode_payload(data)?;
        let buffer = from_pcm16(&bytes, self.config.inbound_rate, INBOUND_CHANNELS)?;
        let outcome = self.scheduler.lock().enqueue(buffer)?;
        if outcome.started_speaking {
            self.ducking.on_agent_speaking();
        }
        Ok(())
    }

    /// Next encoded frame for the transport, in capture order (non-blocking)
    pub fn next_outbound(&self) -> Option<OutboundAudioFrame> {
        self.outbound_rx.lock().try_recv().ok()
    }

    /// The sole authority for "the agent is audibly speaking"
    pub fn is_agent_speaking(&self) -> bool {
        self.scheduler.lock().is_speaking()
    }

    pub fn set_muted(&self, muted: bool) {
        self.is_muted.store(muted, Ordering::SeqCst);
        if muted {
            self.level.lock().level = 0.0;
        }
        tracing::info!("Mute set to: {}", muted);
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted.load(Ordering::SeqCst)
    }

    /// Outbound level (0.0 - 1.0) for UI metering
    pub fn current_level(&self) -> f32 {
        self.level.lock().level
    }

    /// Whether the user is speaking into the mixed capture bus
    pub fn is_user_speaking(&self) -> bool {
        !self.is_muted() && self.level.lock().rms > SPEAKING_THRESHOLD
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Tear the session down: halt playback, disconnect the mixer, release
    /// the devices. Idempotent and best-effort; never fails.
    pub fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.scheduler.lock().cancel_all();
        self.capture.lock().stop();
        self.playback.lock().stop();
        self.mixer.lock().clear();
        *self.level.lock() = LevelState::default();

        tracing::info!("Audio session stopped");
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

// Safety: all interior state is behind Arc<Mutex>/atomics; the cpal streams
// are only touched through the engine mutexes.
unsafe impl Send for AudioSession {}
unsafe impl Sync for AudioSession {}

/// Resample one mixed block to the outbound rate and wrap it for the wire.
fn encode_block(block: &[f32], source_rate: u32, outbound_rate: u32) -> OutboundAudioFrame {
    let samples = resample(block, source_rate, outbound_rate);
    let blob = pcm_blob(&samples, outbound_rate);
    OutboundAudioFrame {
        data: blob.data,
        mime_type: blob.mime_type,
    }
}

/// Calculate RMS of samples
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert RMS to normalized level (-60dB to 0dB range)
fn rms_to_level(rms: f32) -> f32 {
    let db = 20.0 * rms.max(1e-10).log10();
    let normalized = (db + 60.0) / 60.0;
    normalized.clamp(0.0, 1.0)
}
