//! Transcription result type.

use serde::Serialize;

/// The output of one transcriber call.  Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionResult {
    /// Transcript text as reported by the engine.
    pub text: String,

    /// Detected or configured language; passed through to telemetry only.
    pub language: String,

    /// Engine confidence (0.0 – 1.0) that the audio contained no speech.
    pub no_speech_probability: f32,
}

impl TranscriptionResult {
    pub fn new(
        text: impl Into<String>,
        language: impl Into<String>,
        no_speech_probability: f32,
    ) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            no_speech_probability: no_speech_probability.clamp(0.0, 1.0),
        }
    }

    /// Text with leading and trailing whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }
}
