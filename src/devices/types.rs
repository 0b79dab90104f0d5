use serde::{Deserialize, Serialize};

/// Normalized audio device. `id` is the backend's device index and is what
/// the recorder and level meter take as `--*_device`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    pub max_output_channels: u32,
    pub max_input_channels: u32,
}

impl DeviceInfo {
    pub fn is_playback_candidate(&self) -> bool {
        self.max_output_channels > 0
    }

    pub fn is_recording_candidate(&self) -> bool {
        self.max_input_channels > 0
    }
}

/// A device as reported by a backend, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    /// Backend identity; defaults refer to this, not to list position.
    pub index: usize,
    pub name: String,
    pub max_output_channels: u32,
    pub max_input_channels: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDeviceQuery {
    pub devices: Vec<RawDevice>,
    pub default_input: Option<usize>,
    pub default_output: Option<usize>,
}

/// Playback and recording candidates plus the defaults that survived filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceList {
    pub playback: Vec<DeviceInfo>,
    pub recording: Vec<DeviceInfo>,
    pub default_playback: Option<usize>,
    pub default_recording: Option<usize>,
}

impl DeviceList {
    pub fn from_query(query: RawDeviceQuery) -> Self {
        let devices: Vec<DeviceInfo> = query
            .devices
            .into_iter()
            .map(|raw| DeviceInfo {
                id: raw.index,
                name: raw.name,
                max_output_channels: raw.max_output_channels,
                max_input_channels: raw.max_input_channels,
            })
            .collect();

        let playback: Vec<DeviceInfo> = devices
            .iter()
            .filter(|d| d.is_playback_candidate())
            .cloned()
            .collect();
        let recording: Vec<DeviceInfo> = devices
            .into_iter()
            .filter(DeviceInfo::is_recording_candidate)
            .collect();

        let default_playback = query
            .default_output
            .filter(|id| playback.iter().any(|d| d.id == *id));
        let default_recording = query
            .default_input
            .filter(|id| recording.iter().any(|d| d.id == *id));

        Self {
            playback,
            recording,
            default_playback,
            default_recording,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.playback.is_empty() && self.recording.is_empty()
    }

    pub fn playback_device(&self, id: usize) -> Option<&DeviceInfo> {
        self.playback.iter().find(|d| d.id == id)
    }

    pub fn recording_device(&self, id: usize) -> Option<&DeviceInfo> {
        self.recording.iter().find(|d| d.id == id)
    }
}
