//! Persisted user settings
//!
//! The settings file is owned by the presentation layer; the update core only
//! receives paths derived from it. `SettingsStore` is constructed once at
//! startup and passed by reference. It caches the parsed document until
//! [`SettingsStore::invalidate`] is called.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory downloads are written to (empty when not chosen yet)
    pub download_path: String,
    pub first_run_complete: bool,
    /// Keys written by other versions of the app, preserved on save
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct SettingsStore {
    path: PathBuf,
    cached: Option<Settings>,
}

impl SettingsStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            cached: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, reading the file only on first access.
    ///
    /// A missing or corrupt file yields default settings.
    pub fn load(&mut self) -> &Settings {
        let path = &self.path;
        self.cached.get_or_insert_with(|| read_settings(path))
    }

    /// Write settings to disk and replace the cached copy
    pub fn save(&mut self, settings: Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, json)?;
        info!("Saved settings to {:?}", self.path);
        self.cached = Some(settings);
        Ok(())
    }

    /// Store the download directory and mark first run as complete
    pub fn save_download_path(&mut self, download_path: &str) -> Result<(), SettingsError> {
        let mut settings = self.load().clone();
        settings.download_path = download_path.to_string();
        settings.first_run_complete = true;
        self.save(settings)
    }

    /// Forget the download directory (session-only mode)
    pub fn clear_download_path(&mut self) -> Result<(), SettingsError> {
        let mut settings = self.load().clone();
        settings.download_path.clear();
        self.save(settings)
    }

    pub fn mark_first_run_complete(&mut self) -> Result<(), SettingsError> {
        if self.load().first_run_complete {
            return Ok(());
        }
        let mut settings = self.load().clone();
        settings.first_run_complete = true;
        self.save(settings)
    }

    pub fn download_path(&mut self) -> String {
        self.load().download_path.clone()
    }

    pub fn has_saved_path(&mut self) -> bool {
        !self.load().download_path.is_empty()
    }

    pub fn is_first_run(&mut self) -> bool {
        !self.load().first_run_complete
    }

    /// Drop the cached copy so the next access reads the file again
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

fn read_settings(path: &Path) -> Settings {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
        Err(e) => {
            warn!("Failed to read settings {:?}: {}", path, e);
            return Settings::default();
        }
    };

    serde_json::from_str::<Settings>(&content)
        .inspect(|_| info!("Loaded settings from {:?}", path))
        .unwrap_or_else(|e| {
            warn!("Failed to parse settings {:?}: {}", path, e);
            Settings::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(temp_dir: &TempDir) -> SettingsStore {
        SettingsStore::new(&temp_dir.path().join("settings.json"))
    }

    #[test]
    fn load_returns_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_in(&temp_dir);

        assert_eq!(store.load(), &Settings::default());
        assert!(store.is_first_run());
        assert!(!store.has_saved_path());
    }

    #[test]
    fn load_returns_defaults_for_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_in(&temp_dir);
        std::fs::write(store.path(), "{ broken").unwrap();

        assert_eq!(store.load(), &Settings::default());
    }

    #[test]
    fn save_download_path_marks_first_run_complete() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_in(&temp_dir);

        store.save_download_path("/music").unwrap();

        let mut reopened = store_in(&temp_dir);
        assert_eq!(reopened.download_path(), "/music");
        assert!(!reopened.is_first_run());
    }

    #[test]
    fn clear_download_path_keeps_first_run_flag() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_in(&temp_dir);
        store.save_download_path("/music").unwrap();

        store.clear_download_path().unwrap();

        assert!(!store.has_saved_path());
        assert!(!store.is_first_run());
    }

    #[test]
    fn load_uses_cache_until_invalidated() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_in(&temp_dir);
        assert!(store.is_first_run());

        std::fs::write(
            store.path(),
            json!({"download_path": "/x", "first_run_complete": true}).to_string(),
        )
        .unwrap();
        assert!(store.is_first_run());

        store.invalidate();
        assert!(!store.is_first_run());
        assert_eq!(store.download_path(), "/x");
    }

    #[test]
    fn save_preserves_unknown_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_in(&temp_dir);
        std::fs::write(
            store.path(),
            json!({"download_path": "", "theme": "dark"}).to_string(),
        )
        .unwrap();

        store.mark_first_run_complete().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["first_run_complete"], true);
    }
}
