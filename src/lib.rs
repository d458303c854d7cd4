//! Client-side reconciliation of server-executed streaming runs.
//!
//! A [`Reconciler`] polls runs this client started or resumed, merging text
//! by offset and backing off on transient failures. A [`RemoteMonitor`]
//! lists runs started elsewhere and can follow one read-only. Both feed the
//! [`ActivityProjector`], which is what a presentation layer reads.

pub mod activity;
pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod logging;
pub mod reconciler;
pub mod remote;
pub mod run_state;
pub mod transport;

pub use activity::{ActivityProjector, SessionActivity, SessionStatus, StatusLevel};
pub use backoff::BackoffPolicy;
pub use config::EngineConfig;
pub use engine::StreamEngine;
pub use error::ReconcileError;
pub use host::{ObserverSink, ObserverState, ObserverView, SessionHost, ViewId};
pub use reconciler::{
    FinalRun, PollOutcome, PromptSubmission, Reconciler, ReconcilerConfig, ResumeOutcome,
    RunResult, SendOutcome, StopOutcome,
};
pub use remote::{RemoteMonitor, RemoteMonitorConfig};
pub use run_state::{format_duration, ContentKind, RenderedContent, RunPhase, RunState};
pub use transport::RunsTransport;
