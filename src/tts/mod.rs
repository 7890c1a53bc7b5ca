//! Text-to-speech stage.
//!
//! * [`Synthesizer`]: async capability rendering one span of text.
//! * [`CommandSynthesizer`]: `say` + `ffmpeg` backend.
//! * [`ExclusiveSynthesizer`]: serialises access for non-reentrant backends.

pub mod command;
pub mod synthesizer;

pub use command::{parse_voice_list, read_wav_i16, CommandSynthesizer, VoiceInfo};
pub use synthesizer::{
    apply_volume, ExclusiveSynthesizer, SynthesisError, SynthesizedAudio, Synthesizer,
};

#[cfg(test)]
pub use synthesizer::ToneSynthesizer;
