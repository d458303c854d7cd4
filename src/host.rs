//! Presentation seams the engine calls into.
//!
//! Hosts are invoked outside engine locks and may call back into the engine.

use crate::run_state::RenderedContent;

pub type ViewId = u64;

pub trait SessionHost: Send + Sync {
    /// Create the view that will show `run_id`'s content in `session_id`.
    fn attach_view(&self, session_id: &str, run_id: &str) -> ViewId;

    /// Replace the view's content. Called with streaming content while a
    /// run is live and once more with its final content.
    fn render_view(&self, view: ViewId, content: &RenderedContent);

    /// Re-fetch the full session transcript from the server.
    fn reload_session(&self, session_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Streaming,
    Reconnecting { attempt: u32 },
    Finished { exit_code: Option<i32> },
    /// The server no longer knows the run.
    Gone,
    /// A poll failed in a way retrying cannot fix; the observer stopped.
    Failed,
}

/// Snapshot delivered to the read-only observer view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverView {
    pub run_id: String,
    pub session_id: String,
    pub content: String,
    pub state: ObserverState,
}

pub trait ObserverSink: Send + Sync {
    fn render_observer(&self, view: &ObserverView);
}
