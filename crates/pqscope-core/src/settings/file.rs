//! JSON settings file
//!
//! Stored at `<config_dir>/pqscope/settings.json` by default.

use super::{Settings, SettingsError, SettingsSource};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Settings persisted as a JSON document
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<config_dir>/pqscope/settings.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pqscope")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults on any error
    pub fn load_or_default(&self) -> Settings {
        match self.load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to load settings, using defaults");
                Settings::default()
            }
        }
    }

    /// Save settings, creating parent directories if needed
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        tracing::info!(path = %self.path.display(), "Settings saved to disk");
        Ok(())
    }
}

impl SettingsSource for JsonSettingsFile {
    /// A missing file yields defaults; an unreadable or malformed file is an error
    fn load(&self) -> Result<Settings, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let settings = serde_json::from_str(&contents)?;
                tracing::debug!(path = %self.path.display(), "Loaded settings from disk");
                Ok(settings)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No settings file found, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TriggerMode;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonSettingsFile::new(dir.path().join("absent.json"));
        assert_eq!(file.load().unwrap(), Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonSettingsFile::new(dir.path().join("nested").join("settings.json"));

        let settings = Settings {
            trigger_mode: TriggerMode::Freerun,
            sample_rate: 1000.0,
            ..Settings::default()
        };
        file.save(&settings).unwrap();

        assert_eq!(file.load().unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let file = JsonSettingsFile::new(&path);
        assert!(matches!(file.load(), Err(SettingsError::Json(_))));
        assert_eq!(file.load_or_default(), Settings::default());
    }

    #[test]
    fn test_default_path_file_name() {
        let path = JsonSettingsFile::default_path();
        assert!(path.ends_with("pqscope/settings.json"));
    }
}
