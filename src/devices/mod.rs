//! Audio device discovery.
//!
//! Two interchangeable query backends (native cpal enumeration and a
//! scripted `sounddevice` query) feed one [`DeviceList`] model. The
//! [`DeviceDiscovery`] service owns the fallback policy and publishes each
//! new list atomically.

pub mod backend;
#[cfg(feature = "native-audio")]
pub mod cpal_backend;
pub mod error;
pub mod layouts;
pub mod script_backend;
pub mod selection;
pub mod types;

pub use backend::{BackendKind, DeviceDiscovery, DeviceQueryBackend, DiscoveryReport};
#[cfg(feature = "native-audio")]
pub use cpal_backend::CpalBackend;
pub use error::DeviceError;
pub use layouts::{auto_map_channels, layout_labels, list_layouts};
pub use script_backend::ScriptedBackend;
pub use selection::apply_default_devices;
pub use types::{DeviceInfo, DeviceList, RawDevice, RawDeviceQuery};
