//! Turn pipeline: one captured utterance in, a stream of speech segments out.
//!
//! # Architecture
//!
//! ```text
//! UtteranceAudio ──▶ VoiceSession::start_turn(audio, CancelToken) ──▶ Turn
//!
//! Turn::next_segment()
//!   ├─ AudioConditioner            → RejectedInput
//!   ├─ TranscriptionGate           → LowConfidenceTranscript / TranscriptionFailure
//!   ├─ TranscriptFilter            → LowQualityTranscript
//!   ├─ TextGenerator::generate     → FragmentStream
//!   └─ StreamingOrchestrator
//!        fragments ─▶ TextAccumulator ─(≥ flush_threshold)─▶ Synthesizer ─▶ SpeechSegment
//!
//! TurnMetrics ── milestones ──▶ LatencyReport (logged when the turn ends)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_turn::audio::{Samples, UtteranceAudio};
//! use voice_turn::config::AppConfig;
//! use voice_turn::llm::ApiGenerator;
//! use voice_turn::pipeline::{CancelToken, VoiceSession};
//! use voice_turn::stt::Transcriber;
//! use voice_turn::tts::CommandSynthesizer;
//!
//! # async fn run(transcriber: Arc<dyn Transcriber>, pcm: Vec<i16>) {
//! let config = AppConfig::load().unwrap_or_default();
//! let session = VoiceSession::new(
//!     &config,
//!     transcriber,
//!     Arc::new(ApiGenerator::from_config(&config.llm)),
//!     Arc::new(CommandSynthesizer::from_config(&config.tts)),
//! );
//!
//! let audio = UtteranceAudio::mono(Samples::I16(pcm), 24_000);
//! let mut turn = session.start_turn(audio, CancelToken::new());
//! while let Some(segment) = turn.next_segment().await {
//!     println!("{} samples for {:?}", segment.samples.len(), segment.source_text);
//! }
//! println!("{}", turn.report().unwrap().outcome);
//! # }
//! ```

pub mod accumulator;
pub mod cancel;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use accumulator::TextAccumulator;
pub use cancel::CancelToken;
pub use error::{TurnError, TurnOutcome};
pub use metrics::{LatencyReport, TurnMetrics};
pub use orchestrator::{OrchestratorSettings, SpeechSegment, StreamingOrchestrator};
pub use session::{Turn, TurnReport, VoiceSession};
pub use state::TurnState;
