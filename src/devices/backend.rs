use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::services::Toolchain;

use super::error::DeviceError;
use super::script_backend::ScriptedBackend;
use super::types::{DeviceList, RawDeviceQuery};

// ── Backend kind ──

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process cpal enumeration.
    Native,
    /// `sounddevice` query run through the toolchain interpreter.
    Scripted,
}

// ── DeviceQueryBackend trait ──

/// One way of asking the system which audio devices exist. Implementations
/// are blocking; [`DeviceDiscovery::discover_async`] moves them off the
/// async runtime.
pub trait DeviceQueryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Enumerate devices. An empty list is a valid answer and makes
    /// discovery try the next backend.
    fn query(&self) -> Result<RawDeviceQuery, DeviceError>;
}

// ── DeviceDiscovery ──

/// Outcome of one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// The published list after this pass (the previous one if nothing answered).
    pub devices: Arc<DeviceList>,
    /// Backend whose answer was published.
    pub backend: Option<BackendKind>,
    /// One entry per failed backend, including raw query output when there was any.
    pub diagnostics: Vec<String>,
    pub updated: bool,
}

/// Tries backends in order and publishes the first non-empty answer. A
/// backend error never clears the current list.
pub struct DeviceDiscovery {
    backends: Vec<Arc<dyn DeviceQueryBackend>>,
    current: Mutex<Arc<DeviceList>>,
}

impl DeviceDiscovery {
    pub fn new(backends: Vec<Arc<dyn DeviceQueryBackend>>) -> Self {
        Self {
            backends,
            current: Mutex::new(Arc::new(DeviceList::default())),
        }
    }

    /// Native backend first (when built in and enabled), scripted query second.
    pub fn with_toolchain(toolchain: &Toolchain) -> Self {
        let mut backends: Vec<Arc<dyn DeviceQueryBackend>> = Vec::with_capacity(2);

        #[cfg(feature = "native-audio")]
        if toolchain.settings().native_device_query {
            backends.push(Arc::new(super::cpal_backend::CpalBackend));
        }

        backends.push(Arc::new(ScriptedBackend::from_toolchain(toolchain)));
        log::info!(
            "DeviceDiscovery: backends {:?}",
            backends.iter().map(|b| b.kind()).collect::<Vec<_>>()
        );
        Self::new(backends)
    }

    /// The last published list. Never partially updated.
    pub fn devices(&self) -> Arc<DeviceList> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn discover(&self) -> DiscoveryReport {
        let mut diagnostics = Vec::new();
        let mut answer = None;

        for backend in &self.backends {
            let kind = backend.kind();
            match backend.query() {
                Ok(query) if query.devices.is_empty() => {
                    log::warn!("DeviceDiscovery: {:?} backend found no devices, trying next", kind);
                    answer = Some((kind, query));
                }
                Ok(query) => {
                    log::info!(
                        "DeviceDiscovery: {:?} backend found {} devices",
                        kind,
                        query.devices.len()
                    );
                    answer = Some((kind, query));
                    break;
                }
                Err(e) => {
                    log::warn!("DeviceDiscovery: {:?} backend failed: {}", kind, e);
                    let mut message = format!("{:?} device query failed: {}", kind, e);
                    if let Some(raw) = e.raw_output().filter(|raw| !raw.trim().is_empty()) {
                        message.push('\n');
                        message.push_str(raw.trim_end());
                    }
                    diagnostics.push(message);
                }
            }
        }

        // An empty answer only replaces the list if no later backend failed.
        let answer = answer.filter(|(_, query)| !query.devices.is_empty() || diagnostics.is_empty());
        let Some((kind, query)) = answer else {
            return DiscoveryReport {
                devices: self.devices(),
                backend: None,
                diagnostics,
                updated: false,
            };
        };

        let list = Arc::new(DeviceList::from_query(query));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = list.clone();
        DiscoveryReport {
            devices: list,
            backend: Some(kind),
            diagnostics,
            updated: true,
        }
    }

    /// [`discover`](Self::discover) on the blocking pool.
    pub async fn discover_async(self: &Arc<Self>) -> DiscoveryReport {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.discover()).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("DeviceDiscovery: discovery task failed: {}", e);
                DiscoveryReport {
                    devices: self.devices(),
                    backend: None,
                    diagnostics: vec![format!("Device discovery failed: {}", e)],
                    updated: false,
                }
            }
        }
    }
}
