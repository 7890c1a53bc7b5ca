//! Text generation: the streamed reply to one transcript.
//!
//! This module provides:
//! * [`TextGenerator`]: async trait returning a [`FragmentStream`].
//! * [`ApiGenerator`]: OpenAI-compatible streaming chat completions
//!   (DeepSeek, Qwen-Plus, local servers).
//! * [`ConversationHistory`]: rolling window of earlier messages.
//! * [`SYSTEM_PROMPT`] / [`build_messages`]: request assembly.
//! * [`GenerationError`]: error variants for generation.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use voice_turn::config::AppConfig;
//! use voice_turn::llm::{ApiGenerator, ConversationHistory, TextGenerator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default().with_env_overrides().unwrap();
//!     let generator = ApiGenerator::from_config(&config.llm);
//!     let history = ConversationHistory::default();
//!
//!     let mut fragments = generator
//!         .generate("Tell me a joke", &history.snapshot())
//!         .await
//!         .unwrap();
//!     while let Some(Ok(fragment)) = fragments.next().await {
//!         print!("{fragment}");
//!     }
//! }
//! ```

pub mod api;
pub mod generator;
pub mod history;
pub mod prompt;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use api::{parse_sse_line, sse_fragments, ApiGenerator, LineDecoder, SseLine};
pub use generator::{ChatMessage, FragmentStream, GenerationError, Role, TextGenerator};
pub use history::{ConversationHistory, DEFAULT_HISTORY_LIMIT};
pub use prompt::{build_messages, SYSTEM_PROMPT};

#[cfg(test)]
pub use generator::ScriptedGenerator;
