//! Secondary-source gain control and the speaking/interruption protocol

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::scheduler::PlaybackScheduler;

/// One linear gain trajectory. At most one is active; a new request
/// replaces any pending one.
#[derive(Debug, Clone, Copy)]
struct GainRamp {
    from: f32,
    to: f32,
    start: f64,
    duration: f64,
}

struct GainState {
    /// Value when no ramp is active
    value: f32,
    ramp: Option<GainRamp>,
}

/// The mutable gain of the secondary capture path.
///
/// Readers (the mixer) evaluate the value at a point in time; the ducking
/// controller is the only writer.
pub struct GainControl {
    epoch: Instant,
    state: Mutex<GainState>,
}

fn eval(state: &GainState, t: f64) -> f32 {
    match state.ramp {
        None => state.value,
        Some(r) => {
            if t >= r.start + r.duration {
                r.to
            } else if t <= r.start {
                r.from
            } else {
                r.from + (r.to - r.from) * ((t - r.start) / r.duration) as f32
            }
        }
    }
}

impl GainControl {
    pub fn new(initial: f32) -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(GainState {
                value: initial,
                ramp: None,
            }),
        }
    }

    /// Seconds elapsed on this control's clock.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Gain value at time `t` on this control's clock.
    pub fn value_at(&self, t: f64) -> f32 {
        eval(&self.state.lock(), t)
    }

    pub fn value(&self) -> f32 {
        self.value_at(self.now())
    }

    /// Where the gain is heading: the active ramp's end value, or the
    /// settled value when no ramp is pending.
    pub fn target(&self) -> f32 {
        let state = self.state.lock();
        state.ramp.map_or(state.value, |r| r.to)
    }

    pub fn has_ramp(&self) -> bool {
        self.state.lock().ramp.is_some()
    }

    /// Schedule a linear ramp starting at `t`, superseding any pending one.
    pub fn ramp_to_at(&self, target: f32, duration: f64, t: f64) {
        let mut state = self.state.lock();
        let from = eval(&state, t);
        state.value = target;
        state.ramp = Some(GainRamp {
            from,
            to: target,
            start: t,
            duration: duration.max(0.0),
        });
    }

    pub fn ramp_to(&self, target: f32, duration: f64) {
        self.ramp_to_at(target, duration, self.now());
    }

    /// Cancel any ramp and jump straight to `value`.
    pub fn set_direct(&self, value: f32) {
        let mut state = self.state.lock();
        state.value = value;
        state.ramp = None;
    }
}

/// Drives the secondary-source gain in response to agent speech and owns
/// the interruption transition. No other component schedules gain ramps.
pub struct DuckingController {
    gain: Arc<GainControl>,
    nominal: f32,
    duck_secs: f64,
    restore_secs: f64,
}

impl DuckingController {
    pub fn new(nominal: f32, duck_ramp_ms: u32, restore_ramp_ms: u32) -> Self {
        Self {
            gain: Arc::new(GainControl::new(nominal)),
            nominal,
            duck_secs: duck_ramp_ms as f64 / 1000.0,
            restore_secs: restore_ramp_ms as f64 / 1000.0,
        }
    }

    /// Shared handle the mixer reads the secondary gain through.
    pub fn gain(&self) -> Arc<GainControl> {
        self.gain.clone()
    }

    /// First unit entered the active set: pull the secondary path down fast
    /// so the agent does not hear its own voice mixed back in.
    pub fn on_agent_speaking(&self) {
        self.gain.ramp_to(0.0, self.duck_secs);
        tracing::debug!("Agent speaking, ducking secondary source");
    }

    /// Active set drained: bring the secondary path back, slower to avoid
    /// an audible pop.
    pub fn on_agent_idle(&self) {
        self.gain.ramp_to(self.nominal, self.restore_secs);
        tracing::debug!("Agent idle, restoring secondary source");
    }

    /// The user cut the agent off: halt all scheduled playback and restore
    /// the gain at once, without a ramp.
    pub fn on_interruption(&self, scheduler: &mut PlaybackScheduler) {
        let cancelled = scheduler.cancel_all();
        self.gain.set_direct(self.nominal);
        tracing::info!("Interrupted, cancelled {} playback unit(s)", cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleBuffer;

    #[test]
    fn ramp_interpolates_linearly() {
        let gain = GainControl::new(0.7);
        gain.ramp_to_at(0.0, 0.05, 1.0);
        assert_eq!(gain.value_at(1.0), 0.7);
        assert!((gain.value_at(1.025) - 0.35).abs() < 1e-6);
        assert_eq!(gain.value_at(1.05), 0.0);
        assert_eq!(gain.value_at(2.0), 0.0);
    }

    #[test]
    fn value_before_ramp_start_is_origin() {
        let gain = GainControl::new(0.7);
        gain.ramp_to_at(0.0, 0.05, 5.0);
        assert_eq!(gain.value_at(4.0), 0.7);
    }

    #[test]
    fn new_ramp_supersedes_pending_one() {
        let gain = GainControl::new(0.7);
        gain.ramp_to_at(0.0, 0.2, 0.0);
        // Halfway down, a restore arrives: it must start from the current
        // value and win outright.
        let mid = gain.value_at(0.1);
        assert!((mid - 0.35).abs() < 1e-6);
        gain.ramp_to_at(0.7, 0.2, 0.1);
        assert!((gain.value_at(0.1) - mid).abs() < 1e-6);
        assert_eq!(gain.value_at(0.3), 0.7);
        assert_eq!(gain.target(), 0.7);
    }

    #[test]
    fn set_direct_cancels_ramp() {
        let gain = GainControl::new(0.7);
        gain.ramp_to_at(0.0, 0.2, 0.0);
        gain.set_direct(0.7);
        assert!(!gain.has_ramp());
        assert_eq!(gain.value_at(0.0), 0.7);
        assert_eq!(gain.value_at(100.0), 0.7);
    }

    #[test]
    fn zero_duration_ramp_lands_immediately() {
        let gain = GainControl::new(0.5);
        gain.ramp_to_at(0.0, 0.0, 1.0);
        assert_eq!(gain.value_at(1.0), 0.0);
    }

    #[test]
    fn speaking_and_idle_set_ramp_targets() {
        let ctl = DuckingController::new(0.7, 50, 200);
        assert_eq!(ctl.gain().target(), 0.7);
        ctl.on_agent_speaking();
        assert_eq!(ctl.gain().target(), 0.0);
        ctl.on_agent_idle();
        assert_eq!(ctl.gain().target(), 0.7);
    }

    #[test]
    fn interruption_clears_playback_and_restores_without_ramp() {
        let ctl = DuckingController::new(0.7, 50, 200);
        let mut scheduler = PlaybackScheduler::new(48_000, 50);
        scheduler
            .enqueue(SampleBuffer::mono(vec![0.1; 2400], 24_000))
            .unwrap();
        scheduler
            .enqueue(SampleBuffer::mono(vec![0.1; 2400], 24_000))
            .unwrap();
        ctl.on_agent_speaking();

        ctl.on_interruption(&mut scheduler);
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.cursor(), None);
        assert!(!ctl.gain().has_ramp());
        assert_eq!(ctl.gain().value(), 0.7);
    }
}
