use crate::services::QueryError;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Device query failed: {0}")]
    Query(#[from] QueryError),
    #[error("No speaker labels for layout {0}")]
    EmptyLayout(String),
}

impl DeviceError {
    /// Raw text a failed scripted query printed, for display as a diagnostic.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            DeviceError::Query(e) => e.raw_output(),
            _ => None,
        }
    }
}
