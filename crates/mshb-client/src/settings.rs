//! Local UI settings, stored as JSON next to the database.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

pub const MIN_ZOOM: u16 = 50;
pub const MAX_ZOOM: u16 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub theme: String,
    /// Percent.
    pub zoom: u16,
    pub language: String,
    pub notifications_enabled: bool,
    pub notification_sounds: bool,
    pub start_minimised: bool,
    pub audio_input_device: String,
    pub audio_output_device: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: "dark".into(),
            zoom: 100,
            language: "en".into(),
            notifications_enabled: true,
            notification_sounds: true,
            start_minimised: false,
            audio_input_device: "default".into(),
            audio_output_device: "default".into(),
        }
    }
}

impl AppSettings {
    /// Read settings, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<AppSettings>(&json) {
                Ok(settings) => settings.normalized(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt settings file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    pub fn normalized(mut self) -> Self {
        self.zoom = self.zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        if !matches!(self.theme.as_str(), "dark" | "light") {
            self.theme = "dark".into();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(AppSettings::load(&dir.path().join("nope.json")), AppSettings::default());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let settings = AppSettings {
            theme: "light".into(),
            zoom: 150,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(AppSettings::load(&path), settings);
    }

    #[test]
    fn zoom_is_clamped_and_partial_files_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"zoom": 400, "theme": "neon"}"#).unwrap();

        let loaded = AppSettings::load(&path);
        assert_eq!(loaded.zoom, MAX_ZOOM);
        assert_eq!(loaded.theme, "dark");
        assert!(loaded.notifications_enabled);
    }
}
