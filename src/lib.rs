//! voice-turn: the per-utterance half of a voice assistant.
//!
//! A transport hands over one captured utterance; the crate conditions the
//! audio, transcribes and gates it, asks a text generator for a streamed
//! reply, and turns the reply into speech segments as it arrives.
//!
//! | Module       | Role                                                    |
//! |--------------|---------------------------------------------------------|
//! | [`audio`]    | Utterance container, conditioning, debug WAV dumps       |
//! | [`stt`]      | Transcriber capability, confidence gate, quality filter |
//! | [`llm`]      | Streaming text generation and conversation history      |
//! | [`tts`]      | Synthesizer capability and the `say`/`ffmpeg` backend   |
//! | [`pipeline`] | Sessions, turns, the streaming orchestrator, telemetry  |
//! | [`config`]   | TOML settings, environment overrides, paths             |

pub mod audio;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod stt;
pub mod tts;
