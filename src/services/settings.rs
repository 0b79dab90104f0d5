use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR_NAME: &str = "earprint-control";
const SETTINGS_FILE: &str = "settings.json";

pub const ENV_PYTHON: &str = "EARPRINT_PYTHON";
pub const ENV_EMBEDDED_PYTHON: &str = "EARPRINT_EMBEDDED_PYTHON";
pub const ENV_SCRIPTS_DIR: &str = "EARPRINT_SCRIPTS_DIR";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Config directory not found")]
    ConfigDirNotFound,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where the external toolchain lives and what its scripts are called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Interpreter used when no embedded one is configured.
    pub python: PathBuf,
    /// Bundled interpreter (`.../Python.framework/Versions/Current/bin/python3`).
    pub embedded_python: Option<PathBuf>,
    /// Directory holding the toolchain scripts; falls back to the current directory.
    pub scripts_dir: Option<PathBuf>,
    pub processing_script: String,
    pub recorder_script: String,
    pub capture_wizard_script: String,
    pub layout_wizard_script: String,
    pub level_meter_script: String,
    /// Try the native (cpal) device query before the scripted one.
    pub native_device_query: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            embedded_python: None,
            scripts_dir: None,
            processing_script: "earprint.py".to_string(),
            recorder_script: "recorder.py".to_string(),
            capture_wizard_script: "capture_wizard.py".to_string(),
            layout_wizard_script: "generate_layout.py".to_string(),
            level_meter_script: "level_meter.py".to_string(),
            native_device_query: true,
        }
    }
}

impl AppSettings {
    /// `<config dir>/earprint-control/settings.json`
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let dir = dirs::config_dir().ok_or(SettingsError::ConfigDirNotFound)?;
        Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE))
    }

    /// Load settings from `path`, using defaults when the file is missing or
    /// unreadable, then apply environment overrides.
    pub fn load(path: &Path) -> Self {
        let settings = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AppSettings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Failed to parse settings {:?}, using defaults: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                log::debug!("No settings at {:?} ({}), using defaults", path, e);
                Self::default()
            }
        };
        settings.with_env_overrides(|key| std::env::var_os(key).map(PathBuf::from))
    }

    /// Load from the default location, or plain defaults when there is no config dir.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Ok(path) => Self::load(&path),
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default().with_env_overrides(|key| std::env::var_os(key).map(PathBuf::from))
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        log::info!("Settings saved to {:?}", path);
        Ok(())
    }

    fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        if let Some(python) = lookup(ENV_PYTHON) {
            self.python = python;
        }
        if let Some(embedded) = lookup(ENV_EMBEDDED_PYTHON) {
            self.embedded_python = Some(embedded);
        }
        if let Some(scripts) = lookup(ENV_SCRIPTS_DIR) {
            self.scripts_dir = Some(scripts);
        }
        self
    }
}
