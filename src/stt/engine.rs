//! Transcriber capability and implementations.
//!
//! # Overview
//!
//! [`Transcriber`] is the interface the transcription gate calls.  It is
//! object-safe and `Send + Sync` so it can be held behind an
//! `Arc<dyn Transcriber>` and moved into `spawn_blocking`.
//!
//! [`ExclusiveTranscriber`] serialises calls into a collaborator that is not
//! safe to enter from two turns at once.
//!
//! [`WhisperTranscriber`] (cargo feature `whisper`) wraps a
//! `whisper_rs::WhisperContext`.

use std::sync::Mutex;

use thiserror::Error;

use crate::stt::transcribe::TranscriptionResult;

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

/// All errors that can arise from a transcriber.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// The model file was not found at the given path.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The engine failed to initialise its inference context.
    #[error("Context initialisation failed: {0}")]
    ContextInit(String),

    /// The engine is not loaded and cannot accept audio.
    #[error("Transcriber not ready")]
    NotReady,

    /// An error occurred during the inference pass.
    #[error("Transcription error: {0}")]
    Transcription(String),
}

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe speech-to-text capability.
///
/// # Contract
///
/// - `samples` are mono int16 PCM at `sample_rate`.
/// - Calls may block; callers run them on the blocking pool.
/// - `is_ready` is `false` until the underlying model is loaded.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, samples: &[i16], sample_rate: u32)
        -> Result<TranscriptionResult, SttError>;

    fn is_ready(&self) -> bool;
}

// Compile-time assertion: Box<dyn Transcriber> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Transcriber>) {}
};

// ---------------------------------------------------------------------------
// ExclusiveTranscriber
// ---------------------------------------------------------------------------

/// Wraps a non-reentrant transcriber so concurrent turns take turns.
pub struct ExclusiveTranscriber<T> {
    inner: Mutex<T>,
}

impl<T: Transcriber> ExclusiveTranscriber<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl<T: Transcriber> Transcriber for ExclusiveTranscriber<T> {
    fn transcribe(
        &self,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<TranscriptionResult, SttError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| SttError::Transcription("transcriber lock poisoned".into()))?;
        inner.transcribe(samples, sample_rate)
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().map(|t| t.is_ready()).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// WhisperTranscriber
// ---------------------------------------------------------------------------

#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;

#[cfg(feature = "whisper")]
mod whisper {
    use std::path::Path;

    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use super::{SttError, Transcriber};
    use crate::audio::{i16_to_f32, resample_linear, WHISPER_SAMPLE_RATE};
    use crate::stt::transcribe::TranscriptionResult;

    /// whisper.cpp transcriber.  A new `WhisperState` is created for every
    /// call so the context can be shared across threads without locking.
    pub struct WhisperTranscriber {
        ctx: WhisperContext,
        language: String,
        n_threads: i32,
    }

    impl std::fmt::Debug for WhisperTranscriber {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("WhisperTranscriber")
                .field("language", &self.language)
                .field("n_threads", &self.n_threads)
                .finish_non_exhaustive()
        }
    }

    // SAFETY: WhisperContext is Send+Sync as declared by whisper-rs; the
    // model weights are read-only after loading.
    unsafe impl Send for WhisperTranscriber {}
    unsafe impl Sync for WhisperTranscriber {}

    impl WhisperTranscriber {
        /// Load a GGML model.  `language` is an ISO-639-1 code or `"auto"`.
        pub fn load(model_path: impl AsRef<Path>, language: &str) -> Result<Self, SttError> {
            let path = model_path.as_ref();
            if !path.exists() {
                return Err(SttError::ModelNotFound(path.display().to_string()));
            }
            let path_str = path.to_str().ok_or_else(|| {
                SttError::ModelNotFound(format!(
                    "model path contains non-UTF-8 characters: {}",
                    path.display()
                ))
            })?;

            let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
                .map_err(|e| SttError::ContextInit(e.to_string()))?;

            let n_threads = std::thread::available_parallelism()
                .map(|n| n.get().min(8) as i32)
                .unwrap_or(4);

            log::info!("stt: whisper model loaded from {}", path.display());
            Ok(Self {
                ctx,
                language: language.to_string(),
                n_threads,
            })
        }
    }

    impl Transcriber for WhisperTranscriber {
        fn transcribe(
            &self,
            samples: &[i16],
            sample_rate: u32,
        ) -> Result<TranscriptionResult, SttError> {
            let audio = resample_linear(&i16_to_f32(samples), sample_rate, WHISPER_SAMPLE_RATE);

            let mut fp = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            let lang = (self.language != "auto").then_some(self.language.as_str());
            fp.set_language(lang);
            fp.set_n_threads(self.n_threads);
            fp.set_print_progress(false);
            fp.set_print_realtime(false);

            let mut state = self
                .ctx
                .create_state()
                .map_err(|e| SttError::ContextInit(e.to_string()))?;
            state
                .full(fp, &audio)
                .map_err(|e| SttError::Transcription(e.to_string()))?;

            let n_segments = state
                .full_n_segments()
                .map_err(|e| SttError::Transcription(e.to_string()))?;
            let mut text = String::new();
            for i in 0..n_segments {
                let seg = state
                    .full_get_segment_text(i)
                    .map_err(|e| SttError::Transcription(format!("segment {i}: {e}")))?;
                text.push_str(&seg);
            }

            Ok(TranscriptionResult::new(
                text.trim(),
                self.language.clone(),
                0.0,
            ))
        }

        fn is_ready(&self) -> bool {
            true
        }
    }
}

// ---------------------------------------------------------------------------
// MockTranscriber  (test-only)
// ---------------------------------------------------------------------------

/// Test double returning a pre-configured response without any model.
#[cfg(test)]
pub struct MockTranscriber {
    response: Result<TranscriptionResult, SttError>,
    ready: bool,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn ok(text: &str, no_speech_probability: f32) -> Self {
        Self {
            response: Ok(TranscriptionResult::new(text, "en", no_speech_probability)),
            ready: true,
            calls: Default::default(),
        }
    }

    pub fn err(error: SttError) -> Self {
        Self {
            response: Err(error),
            ready: true,
            calls: Default::default(),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::ok("unused", 0.0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Transcriber for MockTranscriber {
    fn transcribe(
        &self,
        _samples: &[i16],
        _sample_rate: u32,
    ) -> Result<TranscriptionResult, SttError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.response.clone()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
