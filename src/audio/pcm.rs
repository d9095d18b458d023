//! Fixed-point wire frames: normalized f32 to and from interleaved PCM16

use super::codec::WireBlob;
use super::{AudioError, SampleBuffer};

/// Clamp and scale normalized samples to signed 16-bit.
///
/// Negative values scale by 32768 so -1.0 lands on i16::MIN; non-negative
/// values scale by 32767 so +1.0 stays inside the positive range.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Package one outbound block as a transport blob tagged with its rate.
pub fn pcm_blob(samples: &[f32], sample_rate: u32) -> WireBlob {
    let pcm = to_pcm16(samples);
    let bytes: &[u8] = bytemuck::cast_slice(&pcm);
    WireBlob::new(bytes, format!("audio/pcm;rate={sample_rate}"))
}

/// Reinterpret an inbound byte buffer as interleaved little-endian PCM16,
/// de-interleave per channel and normalize by 32768.
pub fn from_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<SampleBuffer, AudioError> {
    if channels == 0 || bytes.len() % (2 * channels as usize) != 0 {
        return Err(AudioError::FrameAlignment {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / 2 / channels as usize;
    let mut planar: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0;
        planar[i % channels as usize].push(sample);
    }

    Ok(SampleBuffer::new(planar, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_mapping() {
        assert_eq!(to_pcm16(&[-1.0]), vec![i16::MIN]);
        assert_eq!(to_pcm16(&[1.0]), vec![i16::MAX]);
        assert_eq!(to_pcm16(&[0.0]), vec![0]);
    }

    #[test]
    fn out_of_range_clamps_to_full_scale() {
        assert_eq!(to_pcm16(&[2.5]), to_pcm16(&[1.0]));
        assert_eq!(to_pcm16(&[-3.0]), to_pcm16(&[-1.0]));
    }

    #[test]
    fn round_trip_within_quantization_error() {
        let samples: Vec<f32> = (-10..=10).map(|i| i as f32 / 10.0).collect();
        let pcm = to_pcm16(&samples);
        let bytes: &[u8] = bytemuck::cast_slice(&pcm);
        let decoded = from_pcm16(bytes, 16_000, 1).unwrap();
        // One quantization step, plus the skew from scaling positives by
        // 32767 while normalizing by 32768.
        for (orig, back) in samples.iter().zip(decoded.channel(0)) {
            assert!(
                (orig - back).abs() <= 2.0 / 32768.0,
                "{} -> {}",
                orig,
                back
            );
        }
    }

    #[test]
    fn misaligned_bytes_are_rejected() {
        assert!(matches!(
            from_pcm16(&[0, 1, 2], 24_000, 1),
            Err(AudioError::FrameAlignment { len: 3, channels: 1 })
        ));
        // Six bytes are three mono samples but not a whole stereo frame pair.
        assert!(matches!(
            from_pcm16(&[0; 6], 24_000, 2),
            Err(AudioError::FrameAlignment { .. })
        ));
        assert!(from_pcm16(&[0; 8], 24_000, 2).is_ok());
    }

    #[test]
    fn stereo_deinterleaves_per_channel() {
        let left = to_pcm16(&[0.5, -0.5]);
        let right = to_pcm16(&[0.25, -0.25]);
        let interleaved = [left[0], right[0], left[1], right[1]];
        let bytes: &[u8] = bytemuck::cast_slice(&interleaved);

        let buffer = from_pcm16(bytes, 24_000, 2).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert!((buffer.channel(0)[0] - 0.5).abs() < 1e-3);
        assert!((buffer.channel(1)[0] - 0.25).abs() < 1e-3);
        assert!((buffer.channel(0)[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn blob_is_tagged_with_rate() {
        let blob = pcm_blob(&[0.0; 16], 16_000);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    }
}
