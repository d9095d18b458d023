//! Gapless playback scheduling on a monotonically advancing timeline

use uuid::Uuid;

use super::resample::resample;
use super::{AudioError, SampleBuffer};

/// One decoded inbound segment scheduled on the output timeline.
struct PlaybackUnit {
    id: Uuid,
    /// Samples converted to the output device rate
    samples: Vec<f32>,
    /// Device-clock sample index of the first sample
    start_sample: u64,
    /// Duration in source-rate terms, seconds
    duration: f64,
}

/// Result of scheduling one inbound frame.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOutcome {
    pub unit: Uuid,
    /// Start time on the device clock, seconds
    pub start: f64,
    /// True when this unit turned the active set non-empty
    pub started_speaking: bool,
}

/// Result of rendering one output block.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOutcome {
    /// True when the last active unit finished during this block
    pub became_idle: bool,
}

/// Converts bursty inbound frames into back-to-back playback.
///
/// The device clock is the number of samples the output callback has
/// rendered; the cursor is the next free slot on that clock. Both are owned
/// here and mutated only through `enqueue`, `render` and the cancel calls.
pub struct PlaybackScheduler {
    device_rate: u32,
    lookahead: f64,
    /// Samples handed to the output device so far
    rendered: u64,
    /// Next free slot on the device clock, seconds. Unset until the first
    /// frame arrives and after an interruption.
    cursor: Option<f64>,
    /// Active set, in arrival order
    active: Vec<PlaybackUnit>,
}

impl PlaybackScheduler {
    pub fn new(device_rate: u32, lookahead_ms: u32) -> Self {
        Self {
            device_rate,
            lookahead: lookahead_ms as f64 / 1000.0,
            rendered: 0,
            cursor: None,
            active: Vec::new(),
        }
    }

    /// Current position of the output device clock, seconds.
    pub fn now(&self) -> f64 {
        self.rendered as f64 / self.device_rate as f64
    }

    /// Non-empty exactly while the agent is audibly speaking.
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    /// Schedule one decoded inbound frame for gapless playback.
    ///
    /// The start time is the cursor, unless the cursor has fallen behind the
    /// device clock (idle gap) or was never set, in which case the timeline
    /// restarts slightly ahead of now to avoid an audible underrun. The
    /// cursor then advances by exactly the unit's duration.
    pub fn enqueue(&mut self, buffer: SampleBuffer) -> Result<ScheduleOutcome, AudioError> {
        if buffer.frame_count() == 0 {
            return Err(AudioError::PlaybackFailure("empty unit".into()));
        }

        let duration = buffer.duration_secs();
        let now = self.now();
        let start = match self.cursor {
            Some(cursor) if cursor >= now => cursor,
            _ => now + self.lookahead,
        };

        let source_rate = buffer.sample_rate();
        let samples = resample(&buffer.into_mono(), source_rate, self.device_rate);

        let started_speaking = self.active.is_empty();
        let id = Uuid::new_v4();
        self.active.push(PlaybackUnit {
            id,
            samples,
            start_sample: (start * self.device_rate as f64).round() as u64,
            duration,
        });
        self.cursor = Some(start + duration);

        Ok(ScheduleOutcome {
            unit: id,
            start,
            started_speaking,
        })
    }

    /// Mix every due unit into `out` and advance the device clock.
    /// Called from the output callback; bounded-time, never blocks.
    pub fn render(&mut self, out: &mut [f32]) -> RenderOutcome {
        out.fill(0.0);
        let had_units = !self.active.is_empty();
        let base = self.rendered;

        for unit in &self.active {
            for (i, slot) in out.iter_mut().enumerate() {
                let t = base + i as u64;
                if t < unit.start_sample {
                    continue;
                }
                let idx = (t - unit.start_sample) as usize;
                if idx >= unit.samples.len() {
                    break;
                }
                *slot += unit.samples[idx];
            }
        }
        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.rendered += out.len() as u64;
        let clock = self.rendered;
        self.active
            .retain(|u| u.start_sample + u.samples.len() as u64 > clock);

        RenderOutcome {
            became_idle: had_units && self.active.is_empty(),
        }
    }

    /// Cancel one unit by its handle.
    pub fn cancel(&mut self, id: Uuid) -> bool {
        let before = self.active.len();
        self.active.retain(|u| u.id != id);
        self.active.len() != before
    }

    /// Cancel every scheduled and sounding unit and unset the timeline.
    /// Returns how many units were dropped. No cancelled unit can fire later.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.active.len();
        self.active.clear();
        self.cursor = None;
        cancelled
    }
}
