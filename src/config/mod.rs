//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each stage of
//! the turn pipeline, `AppPaths` for cross-platform directories, TOML
//! persistence via `AppConfig::load` / `AppConfig::save`, and environment
//! overrides via `AppConfig::with_env_overrides`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, ConfigError, DebugConfig, LlmConfig, LlmProvider, LoggingConfig,
    SttConfig, SttProvider, TtsConfig, TurnConfig, STANDARD_SAMPLE_RATES,
};
