//! Seam between the engine and the run endpoints.

use async_trait::async_trait;
use runs_api::{
    ActiveRun, CancellationSignal, RunChunk, RunsApiClient, RunsApiError, SessionSummary,
    StartedRun, StopRunResponse,
};

/// Everything the engine asks of the server.
///
/// [`RunsApiClient`] is the production implementation; tests substitute a
/// scripted in-memory server.
#[async_trait]
pub trait RunsTransport: Send + Sync {
    async fn start_run(
        &self,
        session_id: &str,
        prompt: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StartedRun, RunsApiError>;

    async fn poll_run(
        &self,
        run_id: &str,
        output_offset: usize,
        error_offset: usize,
    ) -> Result<RunChunk, RunsApiError>;

    async fn stop_run(&self, run_id: &str) -> Result<StopRunResponse, RunsApiError>;

    async fn list_active_runs(&self) -> Result<Vec<ActiveRun>, RunsApiError>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, RunsApiError>;
}

#[async_trait]
impl RunsTransport for RunsApiClient {
    async fn start_run(
        &self,
        session_id: &str,
        prompt: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StartedRun, RunsApiError> {
        RunsApiClient::start_run(self, session_id, prompt, cancellation).await
    }

    async fn poll_run(
        &self,
        run_id: &str,
        output_offset: usize,
        error_offset: usize,
    ) -> Result<RunChunk, RunsApiError> {
        RunsApiClient::poll_run(self, run_id, output_offset, error_offset).await
    }

    async fn stop_run(&self, run_id: &str) -> Result<StopRunResponse, RunsApiError> {
        RunsApiClient::stop_run(self, run_id).await
    }

    async fn list_active_runs(&self) -> Result<Vec<ActiveRun>, RunsApiError> {
        RunsApiClient::list_active_runs(self).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, RunsApiError> {
        RunsApiClient::list_sessions(self).await
    }
}
