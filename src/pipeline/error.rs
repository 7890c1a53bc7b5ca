//! Turn-level error taxonomy and outcome.

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::audio::AudioRejection;
use crate::stt::{GateRejection, QualityRejection};

/// Every way a turn can go wrong.  Synthesis failures are absorbed per
/// segment and only reach this type for the fallback apology.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TurnError {
    #[error("rejected input: {0}")]
    RejectedInput(#[from] AudioRejection),

    #[error("low-confidence transcript: {0}")]
    LowConfidenceTranscript(String),

    #[error("low-quality transcript ({rule}): {reason}")]
    LowQualityTranscript { rule: &'static str, reason: String },

    #[error("transcription failed: {0}")]
    TranscriptionFailure(String),

    /// Generation failed before any fragment arrived.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// Generation failed after some fragments arrived.
    #[error("generation failed mid-stream: {0}")]
    PartialGenerationFailure(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("resource not ready: {0}")]
    ResourceNotReady(String),
}

impl TurnError {
    /// Input-side rejections that end the turn silently.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TurnError::RejectedInput(_)
                | TurnError::LowConfidenceTranscript(_)
                | TurnError::LowQualityTranscript { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::RejectedInput(_) => "RejectedInput",
            TurnError::LowConfidenceTranscript(_) => "LowConfidenceTranscript",
            TurnError::LowQualityTranscript { .. } => "LowQualityTranscript",
            TurnError::TranscriptionFailure(_) => "TranscriptionFailure",
            TurnError::GenerationFailure(_) => "GenerationFailure",
            TurnError::PartialGenerationFailure(_) => "PartialGenerationFailure",
            TurnError::SynthesisFailure(_) => "SynthesisFailure",
            TurnError::ResourceNotReady(_) => "ResourceNotReady",
        }
    }
}

impl From<GateRejection> for TurnError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::NotReady => TurnError::ResourceNotReady("transcriber".into()),
            GateRejection::Failed(e) => TurnError::TranscriptionFailure(e.to_string()),
            other @ (GateRejection::EmptyText | GateRejection::NoSpeech { .. }) => {
                TurnError::LowConfidenceTranscript(other.to_string())
            }
        }
    }
}

impl From<QualityRejection> for TurnError {
    fn from(rejection: QualityRejection) -> Self {
        TurnError::LowQualityTranscript {
            rule: rejection.rule,
            reason: rejection.reason,
        }
    }
}

/// How a turn ended.  Exactly one per turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Rejected(TurnError),
    Failed(TurnError),
}

impl TurnOutcome {
    /// `Rejected` for input rejections, `Failed` otherwise.
    pub fn from_error(error: TurnError) -> Self {
        if error.is_rejection() {
            TurnOutcome::Rejected(error)
        } else {
            TurnOutcome::Failed(error)
        }
    }

    pub fn error(&self) -> Option<&TurnError> {
        match self {
            TurnOutcome::Rejected(e) | TurnOutcome::Failed(e) => Some(e),
            TurnOutcome::Completed | TurnOutcome::Cancelled => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Cancelled => "cancelled",
            TurnOutcome::Rejected(_) => "rejected",
            TurnOutcome::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error() {
            Some(e) => write!(f, "{}: {e}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

impl Serialize for TurnOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("TurnOutcome", 3)?;
        s.serialize_field("status", self.label())?;
        s.serialize_field("kind", &self.error().map(TurnError::kind))?;
        s.serialize_field("reason", &self.error().map(|e| e.to_string()))?;
        s.end()
    }
}
