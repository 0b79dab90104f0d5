use std::panic;

use cpal::traits::{DeviceTrait, HostTrait};

use super::backend::{BackendKind, DeviceQueryBackend};
use super::error::DeviceError;
use super::types::{RawDevice, RawDeviceQuery};

/// Native enumeration through the default cpal host.
pub struct CpalBackend;

/// ALSA plugin and pseudo devices that cannot be opened for measurement.
pub(crate) fn is_pseudo_device(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    name_lower.contains("dmix")
        || name_lower.contains("surround")
        || name_lower.contains("iec958")
        || name_lower.contains("spdif")
        || name == "null"
}

fn max_channels<I>(configs: Result<I, cpal::SupportedStreamConfigsError>) -> u32
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    configs
        .map(|configs| configs.map(|c| u32::from(c.channels())).max().unwrap_or(0))
        .unwrap_or(0)
}

fn enumerate() -> Result<RawDeviceQuery, DeviceError> {
    let host = cpal::default_host();
    log::debug!("CpalBackend: host {:?}", host.id());

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .devices()
        .map_err(|e| DeviceError::BackendUnavailable(e.to_string()))?;

    let mut query = RawDeviceQuery::default();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        if is_pseudo_device(&name) {
            log::debug!("CpalBackend: skipping pseudo device {}", name);
            continue;
        }

        let max_input_channels = max_channels(device.supported_input_configs());
        let max_output_channels = max_channels(device.supported_output_configs());
        if max_input_channels == 0 && max_output_channels == 0 {
            continue;
        }

        let index = query.devices.len();
        if query.default_input.is_none() && default_input_name.as_deref() == Some(name.as_str()) {
            query.default_input = Some(index);
        }
        if query.default_output.is_none() && default_output_name.as_deref() == Some(name.as_str()) {
            query.default_output = Some(index);
        }
        query.devices.push(RawDevice {
            index,
            name,
            max_output_channels,
            max_input_channels,
        });
    }

    Ok(query)
}

impl DeviceQueryBackend for CpalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn query(&self) -> Result<RawDeviceQuery, DeviceError> {
        // Some ALSA drivers panic inside cpal while probing configs.
        panic::catch_unwind(enumerate).unwrap_or_else(|_| {
            Err(DeviceError::BackendUnavailable(
                "native device enumeration panicked".to_string(),
            ))
        })
    }
}
