//! Raw and conditioned utterance audio.
//!
//! [`UtteranceAudio`] is what the transport layer hands over once voice
//! activity detection has closed an utterance.  The sample buffer keeps the
//! bit width it arrived with ([`Samples`]) so the conditioner can pick the
//! right full-scale divisor when normalising to `f32`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// PCM sample buffer in its source encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Signed 16-bit PCM (full scale 32 768).
    I16(Vec<i16>),
    /// Signed 32-bit PCM (full scale 2 147 483 648).
    I32(Vec<i32>),
    /// Floating-point PCM, nominally in `[-1.0, 1.0]`.
    F32(Vec<f32>),
}

impl Samples {
    /// Total number of samples across all channels.
    pub fn len(&self) -> usize {
        match self {
            Samples::I16(s) => s.len(),
            Samples::I32(s) => s.len(),
            Samples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the encoding, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Samples::I16(_) => "i16",
            Samples::I32(_) => "i32",
            Samples::F32(_) => "f32",
        }
    }

    /// Normalise to `f32` by dividing by the full-scale value of the source
    /// bit width.  Float input is passed through untouched.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Samples::I16(s) => s.iter().map(|&v| v as f32 / 32_768.0).collect(),
            Samples::I32(s) => s.iter().map(|&v| (v as f64 / 2_147_483_648.0) as f32).collect(),
            Samples::F32(s) => s.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelLayout
// ---------------------------------------------------------------------------

/// How multi-channel samples are arranged in the flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    /// Frames of `channels` samples, one after another (`L R L R …`).
    #[default]
    Interleaved,
    /// One full row per channel (`L L L … R R R …`).
    Planar,
}

/// How the conditioner reduces a multi-channel buffer to one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelMix {
    /// Use the whole buffer, in buffer order, as one signal.
    #[default]
    Flatten,
    /// Planar: first row only.  Interleaved: mean of each frame.
    Downmix,
}

// ---------------------------------------------------------------------------
// UtteranceAudio
// ---------------------------------------------------------------------------

/// One captured utterance.
///
/// Before conditioning this may be any bit width, channel count and rate.
/// After [`AudioConditioner::condition`](crate::audio::AudioConditioner::condition)
/// it is always mono `f32`, finite, at an accepted sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceAudio {
    pub samples: Samples,
    pub sample_rate: u32,
    pub channels: u16,
    pub layout: ChannelLayout,
}

impl UtteranceAudio {
    /// Mono audio in any encoding.
    pub fn mono(samples: Samples, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            layout: ChannelLayout::Interleaved,
        }
    }

    /// Interleaved multi-channel audio.
    pub fn interleaved(samples: Samples, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            layout: ChannelLayout::Interleaved,
        }
    }

    /// Channel-major (one row per channel) audio.
    pub fn planar(samples: Samples, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            layout: ChannelLayout::Planar,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Duration in seconds, computed from the frame count.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f32 / self.sample_rate as f32
    }

    /// Read a WAV file as-is: interleaved, at its own rate and bit width.
    /// 24-bit integer files are widened into the `I32` range.
    pub fn read_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader =
            hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
        let spec = reader.spec();

        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => {
                Samples::F32(reader.samples::<f32>().collect::<Result<_, _>>()?)
            }
            (hound::SampleFormat::Int, 16) => {
                Samples::I16(reader.samples::<i16>().collect::<Result<_, _>>()?)
            }
            (hound::SampleFormat::Int, bits @ (24 | 32)) => {
                let shift = 32 - u32::from(bits);
                Samples::I32(
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|v| v << shift))
                        .collect::<Result<_, _>>()?,
                )
            }
            (format, bits) => bail!(
                "{}: unsupported WAV encoding {format:?} {bits}-bit",
                path.display()
            ),
        };

        Ok(Self::interleaved(samples, spec.sample_rate, spec.channels))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_full_scale_maps_into_unit_range() {
        let s = Samples::I16(vec![i16::MIN, 0, 16_384, i16::MAX]);
        let f = s.to_f32();
        assert_eq!(f[0], -1.0);
        assert_eq!(f[1], 0.0);
        assert!((f[2] - 0.5).abs() < 1e-6);
        assert!(f[3] < 1.0 && f[3] > 0.9999);
    }

    #[test]
    fn i32_full_scale_maps_into_unit_range() {
        let s = Samples::I32(vec![i32::MIN, 1 << 30]);
        let f = s.to_f32();
        assert_eq!(f[0], -1.0);
        assert!((f[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn duration_uses_frames_not_samples() {
        let audio = UtteranceAudio::interleaved(Samples::F32(vec![0.0; 48_000]), 24_000, 2);
        assert_eq!(audio.frames(), 24_000);
        assert!((audio.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn read_wav_keeps_encoding_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [100i16, -100, 200, -200] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let audio = UtteranceAudio::read_wav(&path).unwrap();
        assert_eq!(audio.samples, Samples::I16(vec![100, -100, 200, -200]));
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frames(), 2);
    }

    #[test]
    fn read_wav_missing_file_names_path() {
        let err = UtteranceAudio::read_wav("/nonexistent/utterance.wav").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/utterance.wav"));
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        let audio = UtteranceAudio::mono(Samples::F32(vec![0.0; 10]), 0);
        assert_eq!(audio.duration_secs(), 0.0);
    }
}
