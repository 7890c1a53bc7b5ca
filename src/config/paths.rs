//! Platform directories for settings and speech models, via `dirs`.
//!
//! | What            | Linux                             | macOS                                         |
//! |-----------------|-----------------------------------|-----------------------------------------------|
//! | `settings.toml` | `~/.config/voice-turn/`           | `~/Library/Application Support/voice-turn/`   |
//! | models          | `~/.local/share/voice-turn/models`| `~/Library/Application Support/voice-turn/models` |
//!
//! Windows uses `%APPDATA%` and `%LOCALAPPDATA%` respectively.

use std::path::{Path, PathBuf};

const APP_NAME: &str = "voice-turn";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    /// Searched for bare model file names.
    pub models_dir: PathBuf,
}

impl AppPaths {
    /// Platform locations; the current directory stands in for any the
    /// platform does not define.
    pub fn new() -> Self {
        let here = || PathBuf::from(".");
        Self::under(
            dirs::config_dir().unwrap_or_else(here),
            dirs::data_local_dir().unwrap_or_else(here),
        )
    }

    /// Layout below explicit roots.
    pub fn under(config_root: impl AsRef<Path>, data_root: impl AsRef<Path>) -> Self {
        let config_dir = config_root.as_ref().join(APP_NAME);
        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir: data_root.as_ref().join(APP_NAME).join("models"),
        }
    }

    /// Where to load the `stt.model` setting from: the path itself when it
    /// exists, otherwise its file name inside [`models_dir`](Self::models_dir).
    pub fn resolve_model(&self, model: &str) -> PathBuf {
        let configured = PathBuf::from(model);
        if configured.exists() {
            return configured;
        }
        match configured.file_name() {
            Some(name) => self.models_dir.join(name),
            None => configured,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_below_roots() {
        let paths = AppPaths::under("/cfg", "/data");
        assert_eq!(paths.settings_file, Path::new("/cfg/voice-turn/settings.toml"));
        assert_eq!(paths.models_dir, Path::new("/data/voice-turn/models"));
        assert!(paths.settings_file.starts_with(&paths.config_dir));
    }

    #[test]
    fn platform_paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.ends_with(APP_NAME));
        assert!(paths.models_dir.ends_with("models"));
    }

    #[test]
    fn existing_model_path_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("ggml-tiny.bin");
        std::fs::write(&model, b"").unwrap();

        let paths = AppPaths::under("/cfg", "/data");
        assert_eq!(paths.resolve_model(model.to_str().unwrap()), model);
    }

    #[test]
    fn missing_model_falls_back_to_models_dir() {
        let paths = AppPaths::under("/cfg", "/data");
        assert_eq!(
            paths.resolve_model("models/ggml-small.bin"),
            Path::new("/data/voice-turn/models/ggml-small.bin")
        );
    }
}
