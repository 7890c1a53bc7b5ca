//! `CommandSynthesizer`: the macOS `say` voice rendered through `ffmpeg`.
//!
//! ```text
//! text ─▶ say -v <voice> -r <rate> -o speech.aiff
//!      ─▶ ffmpeg -i speech.aiff -ar <rate> -ac 1 -f wav speech.wav
//!      ─▶ hound (int16) ─▶ volume ─▶ SynthesizedAudio
//! ```
//!
//! Both files live in a temporary directory removed after each call.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::TtsConfig;
use crate::tts::synthesizer::{apply_volume, SynthesisError, SynthesizedAudio, Synthesizer};

const SAY: &str = "say";
const FFMPEG: &str = "ffmpeg";

/// One entry of `say -v ?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub description: String,
}

/// Renders speech by shelling out to `say` and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    voice: String,
    rate: u32,
    volume: f32,
    output_sample_rate: u32,
}

impl CommandSynthesizer {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            rate: config.rate,
            volume: config.volume,
            output_sample_rate: config.output_sample_rate,
        }
    }

    /// Voices the local `say` knows about.
    pub async fn list_voices() -> Result<Vec<VoiceInfo>, SynthesisError> {
        let stdout = run(SAY, Command::new(SAY).args(["-v", "?"])).await?;
        Ok(parse_voice_list(&String::from_utf8_lossy(&stdout)))
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let dir = tempfile::tempdir().map_err(|e| SynthesisError::Audio(e.to_string()))?;
        let aiff = dir.path().join("speech.aiff");
        let wav = dir.path().join("speech.wav");

        log::debug!("tts: rendering {} chars with voice {}", text.chars().count(), self.voice);

        run(
            SAY,
            Command::new(SAY)
                .arg("-v")
                .arg(&self.voice)
                .arg("-r")
                .arg(self.rate.to_string())
                .arg("-o")
                .arg(&aiff)
                .arg(text),
        )
        .await?;

        run(
            FFMPEG,
            Command::new(FFMPEG)
                .args(["-y", "-loglevel", "error", "-i"])
                .arg(&aiff)
                .arg("-ar")
                .arg(self.output_sample_rate.to_string())
                .args(["-ac", "1", "-f", "wav"])
                .arg(&wav),
        )
        .await?;

        let (sample_rate, mut samples) = tokio::task::spawn_blocking(move || {
            let decoded = read_wav_i16(&wav);
            drop(dir);
            decoded
        })
        .await
        .map_err(|e| SynthesisError::Audio(e.to_string()))??;

        apply_volume(&mut samples, self.volume);
        log::debug!("tts: rendered {} samples at {sample_rate} Hz", samples.len());
        Ok(SynthesizedAudio::new(sample_rate, samples))
    }

    fn is_ready(&self) -> bool {
        which::which(SAY).is_ok() && which::which(FFMPEG).is_ok()
    }
}

/// Run to completion, returning stdout.  The child is killed if the future
/// is dropped (timeout or cancellation).
async fn run(program: &'static str, command: &mut Command) -> Result<Vec<u8>, SynthesisError> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SynthesisError::Command {
            program,
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SynthesisError::Command {
            program,
            message: format!(
                "exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }
    Ok(output.stdout)
}

/// Read a 16-bit integer WAV file, returning `(sample_rate, samples)`.
pub fn read_wav_i16(path: &Path) -> Result<(u32, Vec<i16>), SynthesisError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SynthesisError::Audio(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SynthesisError::Audio(format!(
            "expected 16-bit PCM, got {:?} {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SynthesisError::Audio(e.to_string()))?;
    Ok((spec.sample_rate, samples))
}

/// Parse `say -v ?` output: `Name    lang_REGION    # sample sentence`.
///
/// Names may contain spaces ("Bad News"), so the locale is taken from the
/// last field before `#`.  A line without a locale field is all name.
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    output
        .lines()
        .filter_map(|line| {
            let (head, description) = match line.split_once('#') {
                Some((head, desc)) => (head, desc.trim()),
                None => (line, ""),
            };
            let mut fields: Vec<&str> = head.split_whitespace().collect();
            let language = match fields.last() {
                Some(last) if fields.len() > 1 && is_locale(last) => fields.pop(),
                _ => None,
            };
            if fields.is_empty() {
                return None;
            }
            Some(VoiceInfo {
                name: fields.join(" "),
                language: language.unwrap_or("unknown").to_string(),
                description: description.to_string(),
            })
        })
        .collect()
}

/// `en_US`, `zh-TW`, `en_US_POSIX`.
fn is_locale(field: &str) -> bool {
    let mut parts = field.split(['_', '-']);
    let lang = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();
    (2..=3).contains(&lang.len())
        && lang.chars().all(|c| c.is_ascii_lowercase())
        && !rest.is_empty()
        && rest
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()))
}
