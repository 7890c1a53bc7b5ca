//! Application settings structs, defaults, environment overrides and TOML
//! persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across
//! sessions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;
use crate::audio::ChannelMix;

/// Sample rates a conditioned utterance may end up at.
pub const STANDARD_SAMPLE_RATES: [u32; 6] = [8_000, 16_000, 22_050, 24_000, 44_100, 48_000];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Conditioning thresholds applied to every utterance before transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// How multi-channel input becomes one signal.
    pub channel_mix: ChannelMix,
    /// Utterances shorter than this are rejected.
    pub min_duration_secs: f32,
    /// Utterances longer than this are truncated.
    pub max_duration_secs: f32,
    /// Sample rates accepted after decimation.
    pub accepted_sample_rates: Vec<u32>,
    /// Target rates reached by 2:1 decimation (48 kHz → 24 kHz).
    pub decimation_targets: Vec<u32>,
    /// RMS below which low-energy gain is applied.
    pub low_energy_rms: f32,
    /// RMS the gain stage aims for.
    pub target_rms: f32,
    /// Maximum gain factor.
    pub max_gain: f32,
    /// Peak amplitude below which the signal is rescaled.
    pub peak_floor: f32,
    /// Peak amplitude after rescaling.
    pub peak_target: f32,
    /// Standard deviation below which the signal is considered flat.
    pub flat_std_dev: f32,
    /// Zero-crossing rate below which a DC offset is removed.
    pub dc_zero_crossing_rate: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channel_mix: ChannelMix::Flatten,
            min_duration_secs: 0.5,
            max_duration_secs: 30.0,
            accepted_sample_rates: STANDARD_SAMPLE_RATES.to_vec(),
            decimation_targets: vec![24_000],
            low_energy_rms: 0.001,
            target_rms: 0.01,
            max_gain: 50.0,
            peak_floor: 0.01,
            peak_target: 0.1,
            flat_std_dev: 1e-6,
            dc_zero_crossing_rate: 1e-4,
        }
    }
}

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Speech-recognition backends this crate can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SttProvider {
    /// whisper.cpp via `whisper-rs` (cargo feature `whisper`).
    #[default]
    Whisper,
}

/// Settings for the transcription stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub provider: SttProvider,
    /// Model file path (Whisper GGML).
    pub model: String,
    /// ISO-639-1 code, or `"auto"` for detection.
    pub language: String,
    /// Transcripts whose no-speech probability exceeds this are dropped.
    pub no_speech_threshold: f32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::default(),
            model: "models/ggml-small.bin".into(),
            language: "auto".into(),
            no_speech_threshold: 0.9,
        }
    }
}

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Text-generation backends.  Each variant is an OpenAI-compatible streaming
/// chat-completions endpoint with its own defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProvider {
    #[default]
    DeepSeek,
    QwenPlus,
    /// Any other OpenAI-compatible server (Ollama, LM Studio, vLLM …).
    OpenAiCompatible,
}

impl LlmProvider {
    /// Parse the value of `AI_MODEL_PROVIDER`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Some(Self::DeepSeek),
            "qwen-plus" | "qwen" => Some(Self::QwenPlus),
            "openai" | "open-ai-compatible" | "openai-compatible" => Some(Self::OpenAiCompatible),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::DeepSeek => "DeepSeek",
            Self::QwenPlus => "Qwen-Plus",
            Self::OpenAiCompatible => "OpenAI-compatible",
        }
    }

    /// Base URL; `/chat/completions` is appended per request.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com",
            Self::QwenPlus => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            Self::OpenAiCompatible => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek-chat",
            Self::QwenPlus => "qwen-plus",
            Self::OpenAiCompatible => "qwen2.5:3b",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::QwenPlus => Some("QWEN_PLUS_API_KEY"),
            Self::OpenAiCompatible => None,
        }
    }

    pub fn requires_api_key(self) -> bool {
        self.api_key_env().is_some()
    }
}

/// Settings for the streaming text-generation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    /// `None` for local providers.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Connect timeout for the HTTP request.
    pub timeout_secs: u64,
    /// Messages kept in the per-session conversation history.
    pub history_limit: usize,
}

impl LlmConfig {
    /// Defaults for `provider`.
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().into(),
            api_key: None,
            model: provider.default_model().into(),
            temperature: 0.7,
            max_tokens: 200,
            timeout_secs: 15,
            history_limit: 20,
        }
    }

    /// `true` when the provider either needs no key or has a non-empty one.
    pub fn is_configured(&self) -> bool {
        !self.provider.requires_api_key() || self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::for_provider(LlmProvider::default())
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// Settings for the command-line speech synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Voice name passed to `say -v`.
    pub voice: String,
    /// Words per minute passed to `say -r`.
    pub rate: u32,
    /// Linear gain applied to the rendered samples (0.0 – 1.0).
    pub volume: f32,
    /// Rate the rendered audio is converted to.
    pub output_sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: "Meijia".into(),
            rate: 200,
            volume: 1.0,
            output_sample_rate: 24_000,
        }
    }
}

// ---------------------------------------------------------------------------
// TurnConfig
// ---------------------------------------------------------------------------

/// Streaming orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Minimum trimmed length of pending text before a synthesis call.
    pub flush_threshold: usize,
    /// Timeout for each fragment wait and each synthesis call.
    pub call_timeout_secs: u64,
    /// Spoken when generation fails before producing any text.
    pub fallback_text: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 3,
            call_timeout_secs: 10,
            fallback_text: "Sorry, there was an issue processing your request.".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// DebugConfig / LoggingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Save every conditioned utterance as a WAV file.
    pub audio: bool,
    pub audio_path: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            audio: false,
            audio_path: "debug_audio".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `env_logger` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Every validation problem found in one pass.
#[derive(Debug, Error)]
#[error("configuration validation failed:\n  - {}", .0.join("\n  - "))]
pub struct ConfigError(pub Vec<String>);

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_turn::config::AppConfig;
///
/// let config = AppConfig::load().unwrap().with_env_overrides().unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub turn: TurnConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from the platform `settings.toml`; missing file → defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save to the platform `settings.toml`, creating parent directories.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (`AI_MODEL_PROVIDER`, `DEEPSEEK_API_KEY`,
    /// `TTS_VOICE`, `MIN_AUDIO_DURATION`, …).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid value for {key}: {value:?}"))
        }

        if let Some(name) = lookup("AI_MODEL_PROVIDER") {
            let provider = LlmProvider::parse(&name)
                .with_context(|| format!("unsupported AI_MODEL_PROVIDER: {name:?}"))?;
            if provider != self.llm.provider {
                self.llm = LlmConfig {
                    temperature: self.llm.temperature,
                    max_tokens: self.llm.max_tokens,
                    timeout_secs: self.llm.timeout_secs,
                    history_limit: self.llm.history_limit,
                    ..LlmConfig::for_provider(provider)
                };
            }
        }
        if let Some(env) = self.llm.provider.api_key_env() {
            if let Some(key) = lookup(env).filter(|k| !k.is_empty()) {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(v) = lookup("STT_LANGUAGE") {
            self.stt.language = v;
        }
        if let Some(v) = lookup("TTS_VOICE") {
            self.tts.voice = v;
        }
        if let Some(v) = lookup("TTS_RATE") {
            self.tts.rate = parsed("TTS_RATE", v)?;
        }
        if let Some(v) = lookup("TTS_VOLUME") {
            self.tts.volume = parsed("TTS_VOLUME", v)?;
        }
        if let Some(v) = lookup("TTS_TIMEOUT") {
            self.turn.call_timeout_secs = parsed("TTS_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("MIN_AUDIO_DURATION") {
            self.audio.min_duration_secs = parsed("MIN_AUDIO_DURATION", v)?;
        }
        if let Some(v) = lookup("MAX_AUDIO_DURATION") {
            self.audio.max_duration_secs = parsed("MAX_AUDIO_DURATION", v)?;
        }
        if let Some(v) = lookup("DEBUG_AUDIO") {
            self.debug.audio = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("DEBUG_AUDIO_PATH") {
            self.debug.audio_path = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.trim().to_ascii_lowercase();
        }
        Ok(self)
    }

    /// Check value ranges, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let a = &self.audio;
        if a.min_duration_secs <= 0.0 || a.min_duration_secs >= a.max_duration_secs {
            errors.push(format!(
                "audio duration bounds invalid: min {} / max {}",
                a.min_duration_secs, a.max_duration_secs
            ));
        }
        if a.accepted_sample_rates.is_empty() {
            errors.push("audio.accepted_sample_rates is empty".into());
        }
        for rate in &a.accepted_sample_rates {
            if !STANDARD_SAMPLE_RATES.contains(rate) {
                errors.push(format!("non-standard accepted sample rate: {rate}"));
            }
        }
        for rate in &a.decimation_targets {
            if !a.accepted_sample_rates.contains(rate) {
                errors.push(format!("decimation target {rate} is not an accepted rate"));
            }
        }
        if a.max_gain < 1.0 {
            errors.push(format!("audio.max_gain must be ≥ 1.0, got {}", a.max_gain));
        }

        if !(0.0..=1.0).contains(&self.stt.no_speech_threshold) {
            errors.push(format!(
                "stt.no_speech_threshold must be within 0.0–1.0, got {}",
                self.stt.no_speech_threshold
            ));
        }

        if self.llm.base_url.trim().is_empty() {
            errors.push("llm.base_url is empty".into());
        }
        if self.llm.history_limit == 0 {
            errors.push("llm.history_limit must be > 0".into());
        }

        if !(0.0..=1.0).contains(&self.tts.volume) {
            errors.push(format!("tts.volume must be within 0.0–1.0, got {}", self.tts.volume));
        }
        if !STANDARD_SAMPLE_RATES.contains(&self.tts.output_sample_rate) {
            errors.push(format!(
                "non-standard tts.output_sample_rate: {}",
                self.tts.output_sample_rate
            ));
        }

        if self.turn.flush_threshold == 0 {
            errors.push("turn.flush_threshold must be > 0".into());
        }
        if self.turn.call_timeout_secs == 0 {
            errors.push("turn.call_timeout_secs must be > 0".into());
        }
        if self.turn.fallback_text.trim().is_empty() {
            errors.push("turn.fallback_text is empty".into());
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(format!(
                "logging.level must be one of {LOG_LEVELS:?}, got {:?}",
                self.logging.level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(errors))
        }
    }

    /// Serialisable overview with secrets reduced to booleans.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "llm": {
                "provider": self.llm.provider.display_name(),
                "model": self.llm.model,
                "base_url": self.llm.base_url,
                "configured": self.llm.is_configured(),
            },
            "stt": {
                "provider": self.stt.provider,
                "model": self.stt.model,
                "language": self.stt.language,
                "no_speech_threshold": self.stt.no_speech_threshold,
            },
            "tts": {
                "voice": self.tts.voice,
                "rate": self.tts.rate,
                "volume": self.tts.volume,
            },
            "audio": {
                "channel_mix": self.audio.channel_mix,
                "min_duration_secs": self.audio.min_duration_secs,
                "max_duration_secs": self.audio.max_duration_secs,
                "accepted_sample_rates": self.audio.accepted_sample_rates,
            },
            "turn": {
                "flush_threshold": self.turn.flush_threshold,
                "call_timeout_secs": self.turn.call_timeout_secs,
            },
            "debug": {
                "audio": self.debug.audio,
                "audio_path": self.debug.audio_path,
            },
        })
    }

    /// `true` when no `settings.toml` exists yet.
    pub fn is_first_run() -> bool {
        !AppPaths::new().settings_file.exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.llm.provider, loaded.llm.provider);
        assert_eq!(original.llm.base_url, loaded.llm.base_url);
        assert_eq!(original.llm.model, loaded.llm.model);
        assert_eq!(original.stt.language, loaded.stt.language);
        assert_eq!(original.audio.accepted_sample_rates, loaded.audio.accepted_sample_rates);
        assert_eq!(original.audio.min_duration_secs, loaded.audio.min_duration_secs);
        assert_eq!(original.tts.voice, loaded.tts.voice);
        assert_eq!(original.turn.flush_threshold, loaded.turn.flush_threshold);
        assert_eq!(original.turn.fallback_text, loaded.turn.fallback_text);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let config = AppConfig::load_from(&dir.path().join("nope.toml")).expect("no error");
        assert_eq!(config.turn.flush_threshold, 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[turn]\nflush_threshold = 8\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.turn.flush_threshold, 8);
        assert_eq!(config.turn.call_timeout_secs, 10);
        assert_eq!(config.audio.max_duration_secs, 30.0);
        assert_eq!(config.audio.channel_mix, ChannelMix::Flatten);
    }

    #[test]
    fn channel_mix_is_read_from_file() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("mix.toml");
        std::fs::write(&path, "[audio]\nchannel_mix = \"downmix\"\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.audio.channel_mix, ChannelMix::Downmix);
        assert_eq!(config.audio.min_duration_secs, 0.5);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.audio.min_duration_secs, 0.5);
        assert_eq!(cfg.audio.max_duration_secs, 30.0);
        assert_eq!(cfg.audio.decimation_targets, vec![24_000]);
        assert_eq!(cfg.stt.no_speech_threshold, 0.9);
        assert_eq!(cfg.llm.provider, LlmProvider::DeepSeek);
        assert_eq!(cfg.llm.model, "deepseek-chat");
        assert_eq!(cfg.llm.history_limit, 20);
        assert_eq!(cfg.tts.output_sample_rate, 24_000);
        assert!(!cfg.debug.audio);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn provider_switch_resets_endpoint() {
        let cfg = AppConfig::default()
            .with_overrides(env(&[
                ("AI_MODEL_PROVIDER", "qwen-plus"),
                ("QWEN_PLUS_API_KEY", "sk-qwen"),
                ("DEEPSEEK_API_KEY", "sk-deep"),
            ]))
            .unwrap();
        assert_eq!(cfg.llm.provider, LlmProvider::QwenPlus);
        assert_eq!(cfg.llm.model, "qwen-plus");
        assert!(cfg.llm.base_url.contains("dashscope"));
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-qwen"));
        assert!(cfg.llm.is_configured());
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let cfg = AppConfig::default()
            .with_overrides(env(&[
                ("MIN_AUDIO_DURATION", "0.8"),
                ("TTS_RATE", "180"),
                ("DEBUG_AUDIO", "TRUE"),
                ("LOG_LEVEL", "DEBUG"),
            ]))
            .unwrap();
        assert_eq!(cfg.audio.min_duration_secs, 0.8);
        assert_eq!(cfg.tts.rate, 180);
        assert!(cfg.debug.audio);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn bad_override_is_an_error() {
        let err = AppConfig::default()
            .with_overrides(env(&[("TTS_RATE", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("TTS_RATE"));

        assert!(AppConfig::default()
            .with_overrides(env(&[("AI_MODEL_PROVIDER", "gpt-9")]))
            .is_err());
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut cfg = AppConfig::default();
        cfg.tts.volume = 1.5;
        cfg.turn.flush_threshold = 0;
        cfg.audio.accepted_sample_rates = vec![12_345];
        cfg.logging.level = "loud".into();

        let err = cfg.validate().unwrap_err();
        let msg = err.to_string();
        assert!(err.0.len() >= 4, "{msg}");
        assert!(msg.contains("tts.volume"));
        assert!(msg.contains("flush_threshold"));
        assert!(msg.contains("12345"));
        assert!(msg.contains("logging.level"));
    }

    #[test]
    fn summary_hides_api_key() {
        let mut cfg = AppConfig::default();
        cfg.llm.api_key = Some("sk-secret".into());
        let summary = cfg.summary().to_string();
        assert!(!summary.contains("sk-secret"));
        assert!(summary.contains("\"configured\":true"));
    }

    #[test]
    fn deepseek_without_key_is_not_configured() {
        assert!(!LlmConfig::for_provider(LlmProvider::DeepSeek).is_configured());
        assert!(LlmConfig::for_provider(LlmProvider::OpenAiCompatible).is_configured());
    }
}
