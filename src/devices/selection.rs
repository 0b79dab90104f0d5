use crate::config::Configuration;

use super::types::DeviceList;

/// Copy of `config` with empty device choices filled from the discovered
/// defaults. A choice the user already made is kept even if the device is
/// gone.
pub fn apply_default_devices(config: &Configuration, devices: &DeviceList) -> Configuration {
    let mut next = config.clone();
    if next.playback_device.trim().is_empty() {
        if let Some(id) = devices.default_playback {
            log::debug!("Selecting default playback device {}", id);
            next.playback_device = id.to_string();
        }
    }
    if next.recording_device.trim().is_empty() {
        if let Some(id) = devices.default_recording {
            log::debug!("Selecting default recording device {}", id);
            next.recording_device = id.to_string();
        }
    }
    next
}
