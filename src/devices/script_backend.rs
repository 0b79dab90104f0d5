//! Device query through the toolchain's Python `sounddevice` module.

use serde::Deserialize;

use crate::services::{run_json_query, CommandSpec, Toolchain};

use super::backend::{BackendKind, DeviceQueryBackend};
use super::error::DeviceError;
use super::types::{RawDevice, RawDeviceQuery};

const DEVICE_QUERY_CODE: &str = "import json, sys, sounddevice as sd; \
json.dump({'devices': sd.query_devices(), 'default': list(sd.default.device)}, sys.stdout)";

#[derive(Debug, Deserialize)]
struct ScriptedQuery {
    devices: Vec<ScriptedDevice>,
    /// `[input, output]`, `-1` for none.
    #[serde(default)]
    default: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct ScriptedDevice {
    /// Present in `sounddevice` output; the list position otherwise.
    index: Option<usize>,
    name: String,
    #[serde(default)]
    max_output_channels: u32,
    #[serde(default)]
    max_input_channels: u32,
}

impl From<ScriptedQuery> for RawDeviceQuery {
    fn from(query: ScriptedQuery) -> Self {
        let default_at = |slot: usize| {
            query
                .default
                .get(slot)
                .and_then(|&index| usize::try_from(index).ok())
        };
        let default_input = default_at(0);
        let default_output = default_at(1);

        let devices = query
            .devices
            .into_iter()
            .enumerate()
            .map(|(position, device)| RawDevice {
                index: device.index.unwrap_or(position),
                name: device.name,
                max_output_channels: device.max_output_channels,
                max_input_channels: device.max_input_channels,
            })
            .collect();

        RawDeviceQuery {
            devices,
            default_input,
            default_output,
        }
    }
}

pub struct ScriptedBackend {
    command: CommandSpec,
}

impl ScriptedBackend {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }

    pub fn from_toolchain(toolchain: &Toolchain) -> Self {
        Self::new(toolchain.inline_command(DEVICE_QUERY_CODE, Vec::<String>::new()))
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

impl DeviceQueryBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scripted
    }

    fn query(&self) -> Result<RawDeviceQuery, DeviceError> {
        let query: ScriptedQuery = run_json_query(&self.command)?;
        Ok(query.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::types::DeviceList;

    fn backend(json: &str) -> ScriptedBackend {
        ScriptedBackend::new(CommandSpec::new("sh").arg("-c").arg(format!("printf '%s' '{}'", json)))
    }

    #[test]
    fn decodes_sounddevice_output() {
        let query = backend(
            r#"{"devices": [
                {"name": "MacBook Pro Microphone", "index": 0, "hostapi": 0, "max_input_channels": 1, "max_output_channels": 0, "default_samplerate": 48000.0},
                {"name": "MacBook Pro Speakers", "index": 1, "hostapi": 0, "max_input_channels": 0, "max_output_channels": 2, "default_samplerate": 48000.0}
            ], "default": [0, 1]}"#,
        )
        .query()
        .unwrap();

        assert_eq!(query.devices.len(), 2);
        assert_eq!(query.devices[1].name, "MacBook Pro Speakers");
        assert_eq!(query.default_input, Some(0));
        assert_eq!(query.default_output, Some(1));
    }

    #[test]
    fn negative_default_means_none() {
        let query = backend(r#"{"devices": [{"name": "Mic", "max_input_channels": 2}], "default": [-1, -1]}"#)
            .query()
            .unwrap();
        assert_eq!(query.devices[0].index, 0);
        assert_eq!(query.devices[0].max_output_channels, 0);
        assert_eq!(query.default_input, None);
        assert_eq!(query.default_output, None);
    }

    #[test]
    fn removed_default_output_is_not_selected() {
        let query = backend(
            r#"{"devices": [
                {"name": "Speakers", "max_output_channels": 2, "max_input_channels": 0},
                {"name": "Headset Mic", "max_output_channels": 0, "max_input_channels": 1},
                {"name": "Interface", "max_output_channels": 4, "max_input_channels": 4}
            ], "default": [1, 1]}"#,
        )
        .query()
        .unwrap();

        let list = DeviceList::from_query(query);
        assert_eq!(list.playback.len(), 2);
        assert_eq!(list.default_playback, None);
        assert_eq!(list.default_recording, Some(1));
    }

    #[test]
    fn traceback_is_kept_as_diagnostic() {
        let backend = ScriptedBackend::new(
            CommandSpec::new("sh")
                .arg("-c")
                .arg("echo \"ModuleNotFoundError: No module named 'sounddevice'\" >&2; exit 1"),
        );
        let err = backend.query().unwrap_err();
        assert!(err.raw_output().unwrap().contains("sounddevice"));
    }

    #[test]
    fn toolchain_command_is_inline_python() {
        let toolchain = Toolchain::new(Default::default());
        let backend = ScriptedBackend::from_toolchain(&toolchain);
        assert_eq!(backend.command().args[0], "-c");
        assert!(backend.command().args[1].contains("sd.query_devices()"));
    }
}
