//! Application services shared by the jobs, device and monitor layers.

pub mod query;
pub mod settings;
pub mod toolchain;

pub use query::{run_json_query, QueryError};
pub use settings::{AppSettings, SettingsError};
pub use toolchain::{CommandSpec, Toolchain};
