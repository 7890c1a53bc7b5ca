//! Audio conditioning: raw utterance → mono, finite, accepted-rate `f32`.
//!
//! # Pipeline
//!
//! ```text
//! UtteranceAudio (i16 / i32 / f32, any layout)
//!   → to_f32 → collapse_to_mono → decimate_by_two (48 kHz → 24 kHz)
//!   → duration / finite / energy / flatness / DC checks
//!   → UtteranceAudio (mono f32)            ──▶ stt::TranscriptionGate
//!   → DebugSink (optional)
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use voice_turn::audio::{AudioConditioner, Samples, UtteranceAudio};
//!
//! let samples: Vec<f32> = (0..24_000).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
//! let raw = UtteranceAudio::mono(Samples::F32(samples), 24_000);
//! let conditioned = AudioConditioner::default().condition(&raw).unwrap();
//! assert_eq!(conditioned.sample_rate, 24_000);
//! ```

pub mod conditioner;
pub mod debug;
pub mod resample;
pub mod utterance;

pub use conditioner::{AudioConditioner, AudioRejection};
pub use debug::{timestamp_label, DebugSink, WavDebugSink};
pub use resample::{
    average_frames, collapse_to_mono, decimate_by_two, f32_to_i16, i16_to_f32, resample_linear,
    WHISPER_SAMPLE_RATE,
};
pub use utterance::{ChannelLayout, ChannelMix, Samples, UtteranceAudio};
