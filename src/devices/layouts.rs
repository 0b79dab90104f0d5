//! Speaker layouts known to the toolchain and channel auto-mapping.

use crate::config::ChannelMapping;
use crate::services::{run_json_query, QueryError, Toolchain};

use super::error::DeviceError;
use super::types::DeviceInfo;

const LIST_LAYOUTS_CODE: &str = "import json, sys, constants; \
json.dump(sorted(constants.SPEAKER_LAYOUTS.keys()), sys.stdout)";

/// Layout name arrives as `sys.argv[1]`; unknown layouts print `[]`.
const LAYOUT_LABELS_CODE: &str = "import json, sys, constants; \
json.dump([c for g in constants.SPEAKER_LAYOUTS.get(sys.argv[1], []) for c in g], sys.stdout)";

/// Recording inputs used by auto-mapping (a binaural mic pair).
const AUTO_MAP_INPUTS: u32 = 2;

pub fn list_layouts(toolchain: &Toolchain) -> Result<Vec<String>, QueryError> {
    run_json_query(&toolchain.inline_command(LIST_LAYOUTS_CODE, Vec::<String>::new()))
}

/// Channel labels of `layout`, flattened in group order.
pub fn layout_labels(toolchain: &Toolchain, layout: &str) -> Result<Vec<String>, QueryError> {
    run_json_query(&toolchain.inline_command(LAYOUT_LABELS_CODE, [layout]))
}

/// Sequential mapping: one output per speaker up to the playback device's
/// width, and the first two recording inputs.
pub fn auto_map_channels(
    playback: &DeviceInfo,
    recording: &DeviceInfo,
    layout: &str,
    speaker_count: usize,
) -> Result<ChannelMapping, DeviceError> {
    if speaker_count == 0 {
        return Err(DeviceError::EmptyLayout(layout.to_string()));
    }
    let speakers = u32::try_from(speaker_count).unwrap_or(u32::MAX);
    let outputs = playback.max_output_channels.min(speakers);
    let inputs = recording.max_input_channels.min(AUTO_MAP_INPUTS);
    log::debug!(
        "Auto map for {}: {} outputs on {}, {} inputs on {}",
        layout,
        outputs,
        playback.name,
        inputs,
        recording.name
    );
    Ok(ChannelMapping {
        output_channels: (0..outputs).collect(),
        input_channels: (0..inputs).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::AppSettings;

    fn device(outputs: u32, inputs: u32) -> DeviceInfo {
        DeviceInfo {
            id: 3,
            name: "Interface".to_string(),
            max_output_channels: outputs,
            max_input_channels: inputs,
        }
    }

    #[test]
    fn maps_up_to_device_width() {
        let mapping = auto_map_channels(&device(8, 0), &device(0, 4), "7.1", 8).unwrap();
        assert_eq!(mapping.output_channels, (0..8).collect::<Vec<_>>());
        assert_eq!(mapping.input_channels, vec![0, 1]);

        let mapping = auto_map_channels(&device(2, 0), &device(0, 1), "7.1.4", 12).unwrap();
        assert_eq!(mapping.output_channels, vec![0, 1]);
        assert_eq!(mapping.input_channels, vec![0]);
    }

    #[test]
    fn empty_layout_is_refused() {
        let err = auto_map_channels(&device(2, 0), &device(0, 2), "9.9", 0).unwrap_err();
        assert!(matches!(err, DeviceError::EmptyLayout(ref name) if name == "9.9"));
    }

    #[test]
    fn layout_name_is_passed_as_argument() {
        let toolchain = Toolchain::new(AppSettings {
            python: "sh".into(),
            ..AppSettings::default()
        });
        let spec = toolchain.inline_command(LAYOUT_LABELS_CODE, ["7.1'; x"]);
        assert_eq!(spec.args.last().map(String::as_str), Some("7.1'; x"));
        assert!(!spec.args[1].contains("7.1"));
    }
}
