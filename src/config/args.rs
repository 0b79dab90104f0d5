//! Configuration -> command-line arguments for the external tools.
//!
//! The token order is part of the contract with the tool's parser. Anything
//! behind a disabled toggle, or with an empty value, contributes nothing.

use std::fmt;
use std::path::Path;

use super::{ChannelMapping, Configuration, XCurveAction};

/// Written by the layout editor next to the captures.
pub const SPEAKER_POSITIONS_FILE: &str = "speaker_positions.json";
/// Delay table derived from [`SPEAKER_POSITIONS_FILE`].
pub const SPEAKER_DELAYS_FILE: &str = "speaker_delays.json";
pub const HEADPHONES_CAPTURE_FILE: &str = "headphones.wav";
pub const ROOM_CAPTURE_FILE: &str = "room.wav";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArgumentVector(Vec<String>);

impl ArgumentVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&mut self, flag: &str) {
        self.0.push(flag.to_string());
    }

    /// A positional token with no flag in front of it.
    pub fn bare(&mut self, token: impl Into<String>) {
        self.0.push(token.into());
    }

    pub fn pair(&mut self, flag: &str, value: impl Into<String>) {
        self.0.push(flag.to_string());
        self.0.push(value.into());
    }

    /// Push `flag value` only when `value` is non-blank.
    pub fn pair_if_set(&mut self, flag: &str, value: &str) {
        if let Some(value) = non_blank(value) {
            self.pair(flag, value);
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Index of the first occurrence of `token`.
    pub fn position(&self, token: &str) -> Option<usize> {
        self.0.iter().position(|t| t == token)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for ArgumentVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl IntoIterator for ArgumentVector {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ArgumentVector {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Arguments for the main processing tool.
pub fn build(config: &Configuration) -> ArgumentVector {
    build_with_probe(config, |path| path.is_file())
}

/// [`build`] with the side-file existence check injected.
pub fn build_with_probe<F>(config: &Configuration, file_exists: F) -> ArgumentVector
where
    F: Fn(&Path) -> bool,
{
    let mut args = ArgumentVector::new();

    args.pair("--dir_path", config.measurement_dir.trim());
    args.pair("--test_signal", config.test_signal.trim());

    if config.channel_balance_enabled {
        args.pair_if_set("--channel_balance", &config.channel_balance);
    }
    if config.target_level_enabled {
        args.pair_if_set("--target_level", &config.target_level);
    }
    if config.decay_enabled {
        args.pair_if_set("--decay", &config.decay_time);
    }

    push_devices(&mut args, config);
    push_channel_maps(&mut args, &config.channel_mapping);

    let room = &config.room_correction;
    if room.enabled {
        args.pair("--room_target", room.target.trim());
        args.pair_if_set("--room_mic_calibration", &room.mic_calibration);
        if room.specific_limit_enabled {
            args.pair_if_set("--specific_limit", &room.specific_limit);
        }
        if room.generic_limit_enabled {
            args.pair_if_set("--generic_limit", &room.generic_limit);
        }
        if room.fr_combination_enabled {
            args.pair_if_set("--fr_combination_method", &room.fr_combination_method);
        }
    }

    let comp = &config.compensation;
    if comp.enabled {
        args.flag("--compensation");
        match non_blank(&comp.headphone_file) {
            Some(file) if comp.headphone_eq_enabled => args.pair("--headphones", file),
            _ => args.flag("--no_headphone_compensation"),
        }
        if let Some(token) = comp.type_token() {
            args.bare(token);
        }
    }

    if config.diffuse_field {
        args.flag("--diffuse_field_compensation");
    }

    let x_curve = &config.x_curve;
    match x_curve.action {
        XCurveAction::None => {}
        action => {
            args.flag(match action {
                XCurveAction::Apply => "--apply_x_curve",
                _ => "--remove_x_curve",
            });
            args.pair_if_set("--x_curve_type", &x_curve.curve_type);
        }
    }
    if x_curve.in_capture {
        args.flag("--x_curve_in_capture");
    }

    let measurement_dir = config.measurement_path();
    let positions = measurement_dir.join(SPEAKER_POSITIONS_FILE);
    if !config.interactive_delays && file_exists(&positions) {
        let delays = measurement_dir.join(SPEAKER_DELAYS_FILE);
        args.pair("--delay-file", delays.to_string_lossy().into_owned());
    } else {
        args.flag("--interactive_delays");
    }

    args
}

/// Arguments for the capture recorder. `output_file` names the capture inside
/// the measurement directory (headphone / room responses); `None` records the
/// regular speaker captures.
pub fn build_recorder(config: &Configuration, output_file: Option<&str>) -> ArgumentVector {
    let mut args = ArgumentVector::new();
    push_channel_maps(&mut args, &config.channel_mapping);
    push_devices(&mut args, config);
    args.pair("--output_dir", config.measurement_dir.trim());
    args.pair("--test_signal", config.test_signal.trim());
    if let Some(name) = output_file {
        let path = config.measurement_path().join(name);
        args.pair("--output_file", path.to_string_lossy().into_owned());
    }
    args
}

/// Arguments shared by the capture and layout wizards.
pub fn build_wizard(config: &Configuration) -> ArgumentVector {
    let mut args = ArgumentVector::new();
    args.pair("--layout", config.layout.trim());
    args.pair("--dir", config.measurement_dir.trim());
    args
}

fn push_devices(args: &mut ArgumentVector, config: &Configuration) {
    args.pair_if_set("--playback_device", &config.playback_device);
    args.pair_if_set("--recording_device", &config.recording_device);
}

fn push_channel_maps(args: &mut ArgumentVector, mapping: &ChannelMapping) {
    if !mapping.output_channels.is_empty() {
        args.pair("--output_channels", ChannelMapping::join(&mapping.output_channels));
    }
    if !mapping.input_channels.is_empty() {
        args.pair("--input_channels", ChannelMapping::join(&mapping.input_channels));
    }
}
