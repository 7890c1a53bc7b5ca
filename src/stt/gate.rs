//! Transcription gate: conditioned audio → accepted transcript.
//!
//! The gate converts the conditioned float signal to int16 PCM, runs the
//! transcriber on the blocking pool and applies the confidence filter.

use std::sync::Arc;

use thiserror::Error;

use crate::audio::{f32_to_i16, UtteranceAudio};
use crate::config::SttConfig;
use crate::stt::engine::{SttError, Transcriber};
use crate::stt::transcribe::TranscriptionResult;

/// Why the gate refused to pass a transcript on.
#[derive(Debug, Clone, Error)]
pub enum GateRejection {
    #[error("transcriber not ready")]
    NotReady,

    #[error("transcriber failed: {0}")]
    Failed(#[from] SttError),

    #[error("empty transcript")]
    EmptyText,

    #[error("no-speech probability {probability:.3} exceeds {threshold}")]
    NoSpeech { probability: f32, threshold: f32 },
}

/// Calls the transcriber and applies the no-speech / empty-text filter.
#[derive(Debug, Clone)]
pub struct TranscriptionGate {
    /// Results with a strictly greater no-speech probability are rejected.
    pub no_speech_threshold: f32,
}

impl Default for TranscriptionGate {
    fn default() -> Self {
        Self::from_config(&SttConfig::default())
    }
}

impl TranscriptionGate {
    pub fn from_config(config: &SttConfig) -> Self {
        Self {
            no_speech_threshold: config.no_speech_threshold,
        }
    }

    /// Transcribe `audio` and return the result only if it is confident.
    pub async fn transcribe(
        &self,
        audio: &UtteranceAudio,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<TranscriptionResult, GateRejection> {
        if !transcriber.is_ready() {
            return Err(GateRejection::NotReady);
        }

        let pcm = f32_to_i16(&audio.samples.to_f32());
        let sample_rate = audio.sample_rate;

        let result = tokio::task::spawn_blocking(move || transcriber.transcribe(&pcm, sample_rate))
            .await
            .map_err(|e| SttError::Transcription(format!("transcription task failed: {e}")))??;

        log::debug!(
            "stt: language={} no_speech={:.4} text={:?}",
            result.language,
            result.no_speech_probability,
            result.text
        );

        self.check(result)
    }

    /// Confidence filter on its own.
    pub fn check(&self, result: TranscriptionResult) -> Result<TranscriptionResult, GateRejection> {
        if result.trimmed().is_empty() {
            return Err(GateRejection::EmptyText);
        }
        if result.no_speech_probability > self.no_speech_threshold {
            return Err(GateRejection::NoSpeech {
                probability: result.no_speech_probability,
                threshold: self.no_speech_threshold,
            });
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Samples;
    use crate::stt::engine::MockTranscriber;

    fn audio() -> UtteranceAudio {
        UtteranceAudio::mono(Samples::F32(vec![0.1; 16_000]), 16_000)
    }

    #[tokio::test]
    async fn confident_transcript_passes() {
        let t: Arc<dyn Transcriber> = Arc::new(MockTranscriber::ok("  what time is it ", 0.2));
        let result = TranscriptionGate::default()
            .transcribe(&audio(), t)
            .await
            .unwrap();
        assert_eq!(result.trimmed(), "what time is it");
    }

    #[tokio::test]
    async fn high_no_speech_probability_is_rejected() {
        let t: Arc<dyn Transcriber> = Arc::new(MockTranscriber::ok("hello", 0.95));
        let err = TranscriptionGate::default()
            .transcribe(&audio(), t)
            .await
            .unwrap_err();
        assert!(matches!(err, GateRejection::NoSpeech { .. }));
    }

    #[tokio::test]
    async fn threshold_is_exclusive() {
        let t: Arc<dyn Transcriber> = Arc::new(MockTranscriber::ok("hello", 0.9));
        assert!(TranscriptionGate::default().transcribe(&audio(), t).await.is_ok());
    }

    #[tokio::test]
    async fn whitespace_transcript_is_rejected() {
        let t: Arc<dyn Transcriber> = Arc::new(MockTranscriber::ok(" \n\t", 0.0));
        let err = TranscriptionGate::default()
            .transcribe(&audio(), t)
            .await
            .unwrap_err();
        assert!(matches!(err, GateRejection::EmptyText));
    }

    #[tokio::test]
    async fn not_ready_skips_the_call() {
        let mock = Arc::new(MockTranscriber::not_ready());
        let t: Arc<dyn Transcriber> = mock.clone();
        let err = TranscriptionGate::default()
            .transcribe(&audio(), t)
            .await
            .unwrap_err();
        assert!(matches!(err, GateRejection::NotReady));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn engine_error_is_surfaced() {
        let t: Arc<dyn Transcriber> =
            Arc::new(MockTranscriber::err(SttError::Transcription("oom".into())));
        let err = TranscriptionGate::default()
            .transcribe(&audio(), t)
            .await
            .unwrap_err();
        assert!(matches!(err, GateRejection::Failed(SttError::Transcription(_))));
    }
}
