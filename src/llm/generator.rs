//! Core `TextGenerator` trait and chat message types.
//!
//! A generator turns a user prompt plus conversation history into a lazy,
//! finite, non-restartable stream of text fragments.  The stream may fail
//! mid-way; the orchestrator classifies the failure by whether any fragment
//! was seen first.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// GenerationError
// ---------------------------------------------------------------------------

/// Errors that can occur while starting or consuming a generation stream.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The provider needs an API key that was not supplied.
    #[error("{0} is not configured (missing API key)")]
    NotConfigured(String),

    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    /// No response or fragment within the allotted time.
    #[error("generation timed out")]
    Timeout,

    /// The response body broke off or could not be decoded.
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One `{role, content}` entry as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TextGenerator trait
// ---------------------------------------------------------------------------

/// Lazy sequence of fragments; ends with `None` or after an `Err`.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// Async capability producing a streamed reply.
///
/// `history` holds earlier turns of the conversation, oldest first, and does
/// not include `prompt`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<FragmentStream, GenerationError>;
}

// ---------------------------------------------------------------------------
// ScriptedGenerator  (test-only)
// ---------------------------------------------------------------------------

/// Test double replaying a fixed fragment script.
#[cfg(test)]
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    /// Returned from `generate` itself.
    refuse: Option<GenerationError>,
    /// Yielded after the last fragment.
    break_off: Option<GenerationError>,
    pub calls: std::sync::Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

#[cfg(test)]
impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            refuse: None,
            break_off: None,
            calls: Default::default(),
        }
    }

    pub fn refusing(error: GenerationError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::new(&[])
        }
    }

    pub fn breaking_off(fragments: &[&str], error: GenerationError) -> Self {
        Self {
            break_off: Some(error),
            ..Self::new(fragments)
        }
    }
}

#[cfg(test)]
#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<FragmentStream, GenerationError> {
        use futures::StreamExt;

        if let Ok(mut calls) = self.calls.lock() {
            calls.push((prompt.to_string(), history.to_vec()));
        }
        if let Some(e) = &self.refuse {
            return Err(e.clone());
        }
        let items: Vec<Result<String, GenerationError>> = self
            .fragments
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.break_off.clone().map(Err))
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialise_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[tokio::test]
    async fn scripted_generator_replays_fragments() {
        use futures::StreamExt;

        let gen = ScriptedGenerator::breaking_off(&["a", "b"], GenerationError::Timeout);
        let items: Vec<_> = gen.generate("q", &[]).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Err(GenerationError::Timeout)));
        assert_eq!(gen.calls.lock().unwrap()[0].0, "q");
    }

    #[test]
    fn generator_is_object_safe() {
        let _g: Box<dyn TextGenerator> = Box::new(ScriptedGenerator::new(&[]));
    }
}
