//! Core `Synthesizer` trait, rendered audio type and the exclusive wrapper.

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// SynthesisError
// ---------------------------------------------------------------------------

/// Errors a single synthesis call can report.  The orchestrator drops the
/// affected segment and carries on.
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("nothing to synthesize")]
    EmptyText,

    #[error("synthesizer not ready: {0}")]
    NotReady(String),

    /// An external program failed to start or exited unsuccessfully.
    #[error("{program} failed: {message}")]
    Command {
        program: &'static str,
        message: String,
    },

    /// The rendered audio could not be read.
    #[error("audio decode failed: {0}")]
    Audio(String),

    #[error("synthesis timed out")]
    Timeout,
}

// ---------------------------------------------------------------------------
// SynthesizedAudio
// ---------------------------------------------------------------------------

/// Mono int16 PCM produced for one flushed span of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl SynthesizedAudio {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Linear gain with saturation at the int16 range.  `1.0` is a no-op.
pub fn apply_volume(samples: &mut [i16], volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in samples.iter_mut() {
        *s = (*s as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

// ---------------------------------------------------------------------------
// Synthesizer trait
// ---------------------------------------------------------------------------

/// Async text-to-speech capability.
///
/// Implementors must be `Send + Sync` so they can be shared across sessions
/// as `Arc<dyn Synthesizer>`.  Callers bound each call with their own
/// timeout.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError>;

    /// `false` when the backend cannot currently render anything.
    fn is_ready(&self) -> bool;
}

// ---------------------------------------------------------------------------
// ExclusiveSynthesizer
// ---------------------------------------------------------------------------

/// Serialises calls into a synthesizer that must not be entered twice.
///
/// The lock is held across the `await`, so concurrent turns queue up.
pub struct ExclusiveSynthesizer<S> {
    inner: tokio::sync::Mutex<S>,
    ready: bool,
}

impl<S: Synthesizer> ExclusiveSynthesizer<S> {
    pub fn new(inner: S) -> Self {
        let ready = inner.is_ready();
        Self {
            inner: tokio::sync::Mutex::new(inner),
            ready,
        }
    }
}

#[async_trait]
impl<S: Synthesizer> Synthesizer for ExclusiveSynthesizer<S> {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let inner = self.inner.lock().await;
        inner.synthesize(text).await
    }

    /// Readiness as seen when the wrapper was built; checked without waiting
    /// for the lock.
    fn is_ready(&self) -> bool {
        match self.inner.try_lock() {
            Ok(inner) => inner.is_ready(),
            Err(_) => self.ready,
        }
    }
}

// ---------------------------------------------------------------------------
// ToneSynthesizer  (test-only)
// ---------------------------------------------------------------------------

/// Test double: one sample per character, optional failures and delays.
#[cfg(test)]
pub struct ToneSynthesizer {
    pub fail_on: Vec<String>,
    pub delay: Option<std::time::Duration>,
    pub ready: bool,
    pub calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl ToneSynthesizer {
    pub fn new() -> Self {
        Self {
            fail_on: Vec::new(),
            delay: None,
            ready: true,
            calls: Default::default(),
        }
    }

    pub fn failing_on(texts: &[&str]) -> Self {
        Self {
            fail_on: texts.iter().map(|s| s.to_string()).collect(),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.iter().any(|t| t == text) {
            return Err(SynthesisError::Audio(format!("refused {text:?}")));
        }
        Ok(SynthesizedAudio::new(24_000, vec![1_000; text.chars().count()]))
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}
