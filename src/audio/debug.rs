//! Offline inspection sink for conditioned audio.
//!
//! When `debug.audio` is enabled the session hands every conditioned
//! utterance to a [`DebugSink`] before transcription.  [`WavDebugSink`] writes
//! 16-bit mono WAV files named after the label it is given.  Sink failures are
//! logged by the caller and never affect the turn.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::audio::resample::f32_to_i16;

/// Destination for conditioned audio snapshots.
pub trait DebugSink: Send + Sync {
    fn save(&self, samples: &[f32], sample_rate: u32, label: &str) -> Result<()>;
}

/// Writes `<dir>/<label>.wav`, creating `dir` on first use.
#[derive(Debug, Clone)]
pub struct WavDebugSink {
    dir: PathBuf,
}

impl WavDebugSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a given label is written to.
    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.wav"))
    }
}

impl DebugSink for WavDebugSink {
    fn save(&self, samples: &[f32], sample_rate: u32, label: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating debug audio dir {}", self.dir.display()))?;

        let path = self.path_for(label);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("creating {}", path.display()))?;
        for sample in f32_to_i16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        log::debug!("audio: debug snapshot saved to {}", path.display());
        Ok(())
    }
}

/// Label used for a snapshot taken now: `received_HHMMSS`.
pub fn timestamp_label() -> String {
    format!("received_{}", chrono::Local::now().format("%H%M%S"))
}
