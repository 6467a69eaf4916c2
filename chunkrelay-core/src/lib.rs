//! chunkrelay-core: identifiers, structured errors and configuration shared by
//! every chunkrelay crate.

pub mod config;
pub mod errors;
pub mod ids;
pub mod launcher;

pub use config::{RelayConfig, RelayConfigSnapshot};
pub use errors::{ErrorKind, RelayError, RelayResult};
pub use ids::{RunId, UploadIdentifier};
pub use launcher::PipelineLauncher;
