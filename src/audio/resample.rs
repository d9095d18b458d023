//! Linear-interpolation sample-rate conversion

/// Convert a mono sample sequence from `source_rate` to `target_rate`.
///
/// Identity when the rates already match. Otherwise each output index maps
/// to a fractional source position, interpolated between its floor and
/// ceiling neighbours (ceiling clamped to the last valid index). Stateless
/// and deterministic.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let output_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let idx = (src_pos.floor() as usize).min(last);
        let next = (idx + 1).min(last);
        let frac = (src_pos - idx as f64) as f32;
        output.push(samples[idx] + (samples[next] - samples[idx]) * frac);
    }
    output
}
