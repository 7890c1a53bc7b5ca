//! Channel collapsing, sample-rate reduction and PCM conversion helpers.
//!
//! The conditioner uses:
//!
//! 1. [`collapse_to_mono`]: by default a multi-channel buffer is flattened
//!    in buffer order.  [`ChannelMix::Downmix`] keeps the first planar row or
//!    averages interleaved frames instead.
//! 2. [`decimate_by_two`]: keeps every second sample.  This is plain
//!    decimation, not a filtered resampler; it is only applied when the
//!    source rate is exactly twice a supported target rate.
//!
//! The transcription boundary uses [`f32_to_i16`] and, for engines with a
//! fixed input rate, [`resample_linear`].

use crate::audio::utterance::{ChannelLayout, ChannelMix};

/// Input rate whisper.cpp expects.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// Channel handling
// ---------------------------------------------------------------------------

/// Mean of each `channels`-sample frame.  A trailing partial frame is
/// dropped.
///
/// ```rust
/// use voice_turn::audio::average_frames;
///
/// let frames = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = average_frames(&frames, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn average_frames(samples: &[f32], channels: u16) -> Vec<f32> {
    let width = usize::from(channels);
    if width <= 1 {
        return if width == 0 { Vec::new() } else { samples.to_vec() };
    }
    let scale = 1.0 / width as f64;
    samples
        .chunks_exact(width)
        .map(|frame| (frame.iter().map(|&s| f64::from(s)).sum::<f64>() * scale) as f32)
        .collect()
}

/// Collapse `samples` to a single channel.
///
/// Under [`ChannelMix::Flatten`] the buffer is used as one signal whatever
/// its shape, so a 1×N stack is its own first channel.  Under
/// [`ChannelMix::Downmix`] planar input keeps its first row and interleaved
/// input is averaged per frame.
pub fn collapse_to_mono(
    samples: Vec<f32>,
    channels: u16,
    layout: ChannelLayout,
    mix: ChannelMix,
) -> Vec<f32> {
    if channels <= 1 || mix == ChannelMix::Flatten {
        return samples;
    }
    match layout {
        ChannelLayout::Planar => {
            let mut first = samples;
            let row = first.len() / usize::from(channels);
            first.truncate(row);
            first
        }
        ChannelLayout::Interleaved => average_frames(&samples, channels),
    }
}

// ---------------------------------------------------------------------------
// Rate conversion
// ---------------------------------------------------------------------------

/// Keep samples `0, 2, 4, …`.  Halves the sample rate without filtering.
pub fn decimate_by_two(samples: &[f32]) -> Vec<f32> {
    samples.iter().step_by(2).copied().collect()
}

/// Linear-interpolation resampler from `from_rate` to `to_rate` Hz.
///
/// Source positions are tracked as exact integer ratios, so the output has
/// `ceil(len × to / from)` samples.  Equal rates copy the input; a zero rate
/// yields nothing.
///
/// ```rust
/// use voice_turn::audio::{resample_linear, WHISPER_SAMPLE_RATE};
///
/// let hi = vec![0.5_f32; 480];
/// assert_eq!(resample_linear(&hi, 48_000, WHISPER_SAMPLE_RATE).len(), 160);
/// ```
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let (from, to) = (u64::from(from_rate), u64::from(to_rate));
    let out_len = (samples.len() as u64 * to).div_ceil(from);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let num = i * from;
            let idx = (num / to) as usize;
            let frac = (num % to) as f32 / to as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a + (b - a) * frac,
                (Some(&a), None) => a,
                _ => samples[last],
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// PCM conversion
// ---------------------------------------------------------------------------

/// Convert normalised float audio to 16-bit PCM, saturating at full scale.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32_768.0).clamp(-32_768.0, 32_767.0) as i16)
        .collect()
}

/// Convert 16-bit PCM to normalised float audio.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32_768.0).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
