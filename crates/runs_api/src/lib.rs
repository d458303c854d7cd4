//! Transport-only client for the run streaming endpoints.
//!
//! This crate owns request building, response decoding, and error
//! classification for the run endpoints only. It holds no polling state and
//! no retry loop: callers decide when to poll and how to back off.
//!
//! Run-not-found is reported as [`RunsApiError::NotFound`] whether the server
//! answers `404` or embeds a "stream not found" marker in an otherwise
//! successful body.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod url;

pub use client::{CancellationSignal, RunsApiClient};
pub use config::RunsApiConfig;
pub use error::RunsApiError;
pub use payload::{
    ActiveRun, RunChunk, SavedMessage, SessionSummary, StartedRun, StopRunResponse,
};
pub use reqwest::StatusCode;
pub use url::{normalize_base_url, DEFAULT_BASE_URL};
