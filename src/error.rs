use pointer_store::PointerStoreError;
use runs_api::RunsApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("session {session_id} already has run {run_id} attached")]
    RunAlreadyAttached { session_id: String, run_id: String },

    #[error("session {session_id} has no active run")]
    NoActiveRun { session_id: String },

    #[error("session {session_id} is already sending a prompt")]
    SendInProgress { session_id: String },

    #[error("run {run_id} is already stopping")]
    StopInProgress { run_id: String },

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("prompt is {length} characters; the limit is {limit}")]
    PromptTooLong { length: usize, limit: usize },

    #[error("pending send for session {session_id} was cancelled")]
    SendCancelled { session_id: String },

    #[error(transparent)]
    Transport(#[from] RunsApiError),

    #[error(transparent)]
    Pointers(#[from] PointerStoreError),
}
