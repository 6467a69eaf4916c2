//! chunkrelay-axum: HTTP surface for chunkrelay.
//!
//! Builds the Axum router for resumable chunk uploads, finalize retries,
//! pipeline status and result paging on top of a [`RelayState`].

pub mod app;
pub mod multipart;
pub mod routes;
pub mod state;
mod error;

pub use app::{relay, RelayApp};
pub use error::RelayAxumError;
pub use state::RelayState;
