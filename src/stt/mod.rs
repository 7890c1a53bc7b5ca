//! Speech-to-text stage: transcriber capability, confidence gate and
//! transcript quality filter.
//!
//! # Architecture
//!
//! ```text
//! conditioned UtteranceAudio (f32)
//!   │  f32 → i16
//!   ▼
//! ┌──────────────────────┐   spawn_blocking   ┌───────────────────────┐
//! │  TranscriptionGate   │ ─────────────────▶ │ dyn Transcriber       │
//! │  is_ready / empty /  │ ◀───────────────── │ (Whisper, Exclusive…) │
//! │  no-speech > 0.9     │ TranscriptionResult└───────────────────────┘
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │  TranscriptFilter    │  ordered rules, first match rejects
//! └──────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use voice_turn::stt::TranscriptFilter;
//!
//! let filter = TranscriptFilter::default();
//! assert!(filter.check("What time is it in Tokyo?").is_ok());
//! assert!(filter.check("Thank you for watching").is_err());
//! ```

pub mod engine;
pub mod filter;
pub mod gate;
pub mod transcribe;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use engine::{ExclusiveTranscriber, SttError, Transcriber};
#[cfg(feature = "whisper")]
pub use engine::WhisperTranscriber;
pub use filter::{FilterRule, QualityRejection, TranscriptFilter, DENY_LIST, HALLUCINATION_PHRASES};
pub use gate::{GateRejection, TranscriptionGate};
pub use transcribe::TranscriptionResult;

#[cfg(test)]
pub use engine::MockTranscriber;
