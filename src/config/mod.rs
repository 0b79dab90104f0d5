//! User configuration for a measurement / processing session.
//!
//! A [`Configuration`] is a plain snapshot: callers build a new one on every
//! edit and derive argument vectors from it per launch. Each optional group
//! carries its own `enabled` flag; fields behind a disabled flag are kept (so
//! toggling back restores them) but never reach the external tool.

pub mod args;
pub mod validate;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use args::{build, build_with_probe, ArgumentVector};
pub use validate::ValidationIssue;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub measurement_dir: String,
    pub test_signal: String,
    pub layout: String,

    pub channel_balance_enabled: bool,
    pub channel_balance: String,
    pub target_level_enabled: bool,
    pub target_level: String,
    pub decay_enabled: bool,
    pub decay_time: String,

    /// Device ids as shown in the device pickers (`DeviceInfo::id`).
    pub playback_device: String,
    pub recording_device: String,
    pub channel_mapping: ChannelMapping,

    pub room_correction: RoomCorrection,
    pub compensation: Compensation,
    pub diffuse_field: bool,
    pub x_curve: XCurve,

    /// Ask for delays interactively instead of using a saved delay table.
    pub interactive_delays: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMapping {
    pub output_channels: Vec<u32>,
    pub input_channels: Vec<u32>,
}

impl ChannelMapping {
    /// `[0, 1, 4]` -> `"0,1,4"`
    pub fn join(channels: &[u32]) -> String {
        channels
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomCorrection {
    pub enabled: bool,
    pub target: String,
    pub mic_calibration: String,
    pub specific_limit_enabled: bool,
    pub specific_limit: String,
    pub generic_limit_enabled: bool,
    pub generic_limit: String,
    pub fr_combination_enabled: bool,
    pub fr_combination_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compensation {
    pub enabled: bool,
    pub headphone_eq_enabled: bool,
    pub headphone_file: String,
    /// Compensation curve name (`diffuse`, `free-field`, ...) or `custom`.
    pub compensation_type: String,
    /// Curve file used when `compensation_type` is `custom`.
    pub custom_file: String,
}

impl Default for Compensation {
    fn default() -> Self {
        Self {
            enabled: false,
            headphone_eq_enabled: false,
            headphone_file: String::new(),
            compensation_type: "diffuse".to_string(),
            custom_file: String::new(),
        }
    }
}

impl Compensation {
    /// Token passed to the tool for the selected curve: the custom file path
    /// for `custom`, otherwise the lower-cased name without a `-field` suffix.
    pub fn type_token(&self) -> Option<String> {
        let kind = self.compensation_type.trim();
        if kind.eq_ignore_ascii_case("custom") {
            let file = self.custom_file.trim();
            return (!file.is_empty()).then(|| file.to_string());
        }
        if kind.is_empty() {
            return None;
        }
        Some(kind.to_lowercase().replace("-field", ""))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XCurveAction {
    #[default]
    #[serde(rename = "None", alias = "none")]
    None,
    #[serde(rename = "Apply X-Curve", alias = "apply")]
    Apply,
    #[serde(rename = "Remove X-Curve", alias = "remove")]
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XCurve {
    pub action: XCurveAction,
    pub curve_type: String,
    pub in_capture: bool,
}

impl Default for XCurve {
    fn default() -> Self {
        Self {
            action: XCurveAction::None,
            curve_type: "minus3db_oct".to_string(),
            in_capture: false,
        }
    }
}

impl Configuration {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn measurement_path(&self) -> PathBuf {
        PathBuf::from(self.measurement_dir.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compensation_token_normalizes_names() {
        let mut comp = Compensation::default();
        assert_eq!(comp.type_token().as_deref(), Some("diffuse"));

        comp.compensation_type = "Free-field".to_string();
        assert_eq!(comp.type_token().as_deref(), Some("free"));

        comp.compensation_type = "Diffuse-field".to_string();
        assert_eq!(comp.type_token().as_deref(), Some("diffuse"));

        comp.compensation_type = "   ".to_string();
        assert_eq!(comp.type_token(), None);
    }

    #[test]
    fn custom_compensation_collapses_to_file() {
        let comp = Compensation {
            compensation_type: "Custom".to_string(),
            custom_file: "/curves/harman.csv".to_string(),
            ..Compensation::default()
        };
        assert_eq!(comp.type_token().as_deref(), Some("/curves/harman.csv"));

        let without_file = Compensation {
            compensation_type: "custom".to_string(),
            ..Compensation::default()
        };
        assert_eq!(without_file.type_token(), None);
    }

    #[test]
    fn x_curve_action_accepts_display_names() {
        let action: XCurveAction = serde_json::from_str(r#""Apply X-Curve""#).unwrap();
        assert_eq!(action, XCurveAction::Apply);
        let action: XCurveAction = serde_json::from_str(r#""remove""#).unwrap();
        assert_eq!(action, XCurveAction::Remove);
        assert_eq!(serde_json::to_string(&XCurveAction::None).unwrap(), r#""None""#);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Configuration =
            serde_json::from_str(r#"{"measurement_dir": "/data/session1", "room_correction": {"enabled": true}}"#)
                .unwrap();
        assert_eq!(config.measurement_dir, "/data/session1");
        assert!(config.room_correction.enabled);
        assert_eq!(config.compensation.compensation_type, "diffuse");
        assert_eq!(config.x_curve.curve_type, "minus3db_oct");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles").join("session.json");
        let config = Configuration {
            measurement_dir: "/data/s1".to_string(),
            test_signal: "sweep.wav".to_string(),
            channel_mapping: ChannelMapping {
                output_channels: vec![0, 1, 2],
                input_channels: vec![0, 1],
            },
            x_curve: XCurve {
                action: XCurveAction::Remove,
                ..XCurve::default()
            },
            ..Configuration::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Configuration::load(&path).unwrap(), config);
    }

    #[test]
    fn channel_join() {
        assert_eq!(ChannelMapping::join(&[0, 1, 4]), "0,1,4");
        assert_eq!(ChannelMapping::join(&[]), "");
    }
}
