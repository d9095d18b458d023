//! Capture-side summing bus: microphone plus an optional secondary source

use std::collections::VecDeque;
use std::sync::Arc;

use super::ducking::GainControl;

/// Gain of the microphone path. Fixed: the primary source is never ducked.
const PRIMARY_GAIN: f32 = 1.0;

/// Queue cap per source, in blocks, so a stalled consumer cannot grow
/// memory unbounded.
const MAX_BUFFERED_BLOCKS: usize = 8;

struct SecondaryBus {
    queue: VecDeque<f32>,
    gain: Arc<GainControl>,
}

/// Sums two independent live sample streams into one bus.
///
/// The output cadence follows the primary source: a mixed block is emitted
/// once a full block of primary samples has accumulated, and the secondary
/// contributes whatever it has buffered at that moment. No secondary source
/// attached is not an error; the bus degrades to primary-only.
pub struct CaptureMixer {
    primary: VecDeque<f32>,
    secondary: Option<SecondaryBus>,
    block: usize,
    sample_rate: u32,
}

impl CaptureMixer {
    pub fn new(block: usize, sample_rate: u32) -> Self {
        Self {
            primary: VecDeque::with_capacity(block * 2),
            secondary: None,
            block,
            sample_rate,
        }
    }

    /// Bus sample rate (the primary capture device's rate).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Called when the primary capture stream opens and reports its rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn push_primary(&mut self, samples: &[f32]) {
        self.primary.extend(samples);
        let cap = self.block * MAX_BUFFERED_BLOCKS;
        while self.primary.len() > cap {
            self.primary.pop_front();
        }
    }

    /// Connect (or replace) the secondary source. Its gain stays owned by
    /// the ducking controller through the shared handle.
    pub fn attach_secondary(&mut self, gain: Arc<GainControl>) {
        self.secondary = Some(SecondaryBus {
            queue: VecDeque::with_capacity(self.block * 2),
            gain,
        });
        tracing::info!("Secondary source attached to capture bus");
    }

    /// Disconnect the secondary source; the primary path is unaffected.
    pub fn detach_secondary(&mut self) {
        if self.secondary.take().is_some() {
            tracing::info!("Secondary source detached from capture bus");
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Samples from a detached source are dropped silently.
    pub fn push_secondary(&mut self, samples: &[f32]) {
        let cap = self.block * MAX_BUFFERED_BLOCKS;
        if let Some(bus) = self.secondary.as_mut() {
            bus.queue.extend(samples);
            while bus.queue.len() > cap {
                bus.queue.pop_front();
            }
        }
    }

    /// Next mixed block, once enough primary samples have arrived.
    /// Bounded-time, never blocks.
    pub fn drain_block(&mut self) -> Option<Vec<f32>> {
        if self.primary.len() < self.block {
            return None;
        }

        let mut out: Vec<f32> = self
            .primary
            .drain(..self.block)
            .map(|s| s * PRIMARY_GAIN)
            .collect();

        if let Some(bus) = self.secondary.as_mut() {
            let t0 = bus.gain.now();
            let step = 1.0 / self.sample_rate as f64;
            let n = out.len().min(bus.queue.len());
            for (i, slot) in out.iter_mut().take(n).enumerate() {
                let gain = bus.gain.value_at(t0 + i as f64 * step);
                *slot += bus.queue.pop_front().unwrap_or(0.0) * gain;
            }
        }

        // Keep the summed bus inside [-1, 1]
        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        Some(out)
    }

    /// Drop all buffered samples from both sources.
    pub fn clear(&mut self) {
        self.primary.clear();
        if let Some(bus) = self.secondary.as_mut() {
            bus.queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain(value: f32) -> Arc<GainControl> {
        Arc::new(GainControl::new(value))
    }

    #[test]
    fn no_block_until_primary_fills() {
        let mut mixer = CaptureMixer::new(4, 48_000);
        mixer.push_primary(&[0.1, 0.2, 0.3]);
        assert!(mixer.drain_block().is_none());
        mixer.push_primary(&[0.4]);
        assert_eq!(mixer.drain_block().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn primary_only_when_secondary_absent() {
        let mut mixer = CaptureMixer::new(2, 48_000);
        assert!(!mixer.has_secondary());
        // Secondary samples with nothing attached vanish, not an error.
        mixer.push_secondary(&[0.9, 0.9]);
        mixer.push_primary(&[0.5, -0.5]);
        assert_eq!(mixer.drain_block().unwrap(), vec![0.5, -0.5]);
    }

    #[test]
    fn secondary_sums_with_gain_applied() {
        let mut mixer = CaptureMixer::new(2, 48_000);
        mixer.attach_secondary(gain(0.5));
        mixer.push_primary(&[0.2, 0.2]);
        mixer.push_secondary(&[0.4, 0.4]);
        let block = mixer.drain_block().unwrap();
        assert!((block[0] - 0.4).abs() < 1e-6);
        assert!((block[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn secondary_shortfall_contributes_silence() {
        let mut mixer = CaptureMixer::new(4, 48_000);
        mixer.attach_secondary(gain(1.0));
        mixer.push_primary(&[0.1, 0.1, 0.1, 0.1]);
        mixer.push_secondary(&[0.2]);
        let block = mixer.drain_block().unwrap();
        assert!((block[0] - 0.3).abs() < 1e-6);
        assert_eq!(&block[1..], &[0.1, 0.1, 0.1]);
    }

    #[test]
    fn attach_mid_session_without_disturbing_primary() {
        let mut mixer = CaptureMixer::new(2, 48_000);
        mixer.push_primary(&[0.1, 0.1]);
        assert_eq!(mixer.drain_block().unwrap(), vec![0.1, 0.1]);

        mixer.attach_secondary(gain(1.0));
        assert!(mixer.has_secondary());
        mixer.push_primary(&[0.1, 0.1]);
        mixer.push_secondary(&[0.2, 0.2]);
        let block = mixer.drain_block().unwrap();
        assert!((block[0] - 0.3).abs() < 1e-6);

        mixer.detach_secondary();
        mixer.push_primary(&[0.1, 0.1]);
        assert_eq!(mixer.drain_block().unwrap(), vec![0.1, 0.1]);
    }

    #[test]
    fn attach_replaces_prior_secondary() {
        let mut mixer = CaptureMixer::new(2, 48_000);
        mixer.attach_secondary(gain(1.0));
        mixer.push_secondary(&[0.9, 0.9]);
        // Re-attach: the stale queue must not leak into the new connection.
        mixer.attach_secondary(gain(1.0));
        mixer.push_primary(&[0.1, 0.1]);
        assert_eq!(mixer.drain_block().unwrap(), vec![0.1, 0.1]);
    }

    #[test]
    fn summed_bus_is_clamped() {
        let mut mixer = CaptureMixer::new(2, 48_000);
        mixer.attach_secondary(gain(1.0));
        mixer.push_primary(&[0.8, -0.8]);
        mixer.push_secondary(&[0.8, -0.8]);
        assert_eq!(mixer.drain_block().unwrap(), vec![1.0, -1.0]);
    }

    #[test]
    fn queues_are_capped() {
        let mut mixer = CaptureMixer::new(4, 48_000);
        mixer.push_primary(&vec![0.1; 4 * MAX_BUFFERED_BLOCKS + 100]);
        let mut drained = 0;
        while mixer.drain_block().is_some() {
            drained += 1;
        }
        assert_eq!(drained, MAX_BUFFERED_BLOCKS);
    }
}
