//! Settings storage
//!
//! Persists the model location, runtime options and default generation
//! parameters as JSON.

use crate::inference::config::GenerationConfig;
use crate::inference::streaming::OutputOptions;
use crate::storage::{get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model file to load when none is given explicitly
    pub model_path: Option<PathBuf>,
    /// Number of CPU threads the engine uses
    pub threads: i32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Echo generated text to stdout while generating
    pub echo: bool,
    /// Print the full chat prompt before generating
    pub echo_prompt: bool,
    /// Log every token and recalculation event
    pub debug: bool,
    /// Default generation parameters
    pub generation: GenerationConfig,
}

fn default_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: None,
            threads: default_threads(),
            gpu_layers: 0,
            echo: false,
            echo_prompt: false,
            debug: false,
            generation: GenerationConfig::default(),
        }
    }
}

impl Settings {
    /// Fixes values this crate owns.
    ///
    /// Generation parameters are left untouched; the engine decides what it
    /// accepts.
    pub fn validate(&mut self) {
        if self.threads < 1 {
            self.threads = default_threads();
        }
    }

    /// Output switches for a generation call
    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            echo: self.echo,
            echo_prompt: self.echo_prompt,
            debug: self.debug,
        }
    }

    /// Reads settings from `path`.
    pub fn load_from(path: &Path) -> Result<Self, StorageError> {
        let json = fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&json)?;
        settings.validate();
        Ok(settings)
    }

    /// Writes settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> Settings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

fn load_settings_internal() -> Result<Settings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(Settings::default());
    }

    let settings = Settings::load_from(&path)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &Settings) -> Result<(), StorageError> {
    let path = get_settings_path()?;
    settings.save_to(&path)?;
    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.threads >= 1);
        assert_eq!(settings.gpu_layers, 0);
        assert!(!settings.echo);
        assert_eq!(settings.generation, GenerationConfig::default());
    }

    #[test]
    fn test_validate_fixes_threads_only() {
        let mut settings = Settings::default();
        settings.threads = 0;
        settings.generation.n_ctx = -1;
        settings.validate();

        assert!(settings.threads >= 1);
        assert_eq!(settings.generation.n_ctx, -1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.model_path = Some(PathBuf::from("/models/orca-mini.gguf"));
        settings.echo = true;
        settings.generation.n_predict = 256;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert!(loaded.output_options().echo);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"debug": true, "generation": {"temp": 0.7}}"#).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert!(loaded.debug);
        assert!((loaded.generation.temp - 0.7).abs() < 0.001);
        assert_eq!(loaded.generation.n_ctx, 1024);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            Settings::load_from(&path),
            Err(StorageError::JsonError(_))
        ));
    }
}
