use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::config::RunsApiConfig;
use crate::error::{classify_error_response, embedded_not_found, RunsApiError};
use crate::headers::build_headers;
use crate::payload::{
    ActiveRun, ActiveRunsResponse, RunChunk, SessionSummary, SessionsResponse, StartRunRequest,
    StartRunResponse, StartedRun, StopRunResponse,
};
use crate::url::{active_runs_url, poll_run_url, sessions_url, start_run_url, stop_run_url};

/// Optional cancellation signal shared between a caller and an in-flight request.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct RunsApiClient {
    http: Client,
    config: RunsApiConfig,
}

impl RunsApiClient {
    pub fn new(config: RunsApiConfig) -> Result<Self, RunsApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(RunsApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RunsApiConfig {
        &self.config
    }

    pub fn build_headers(&self) -> Result<HeaderMap, RunsApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| RunsApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    RunsApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_start_request(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<RequestBuilder, RunsApiError> {
        let url = start_run_url(&self.config.base_url, session_id)?;
        Ok(self
            .http
            .post(url)
            .headers(self.build_headers()?)
            .json(&StartRunRequest::new(prompt)))
    }

    pub fn build_poll_request(
        &self,
        run_id: &str,
        output_offset: usize,
        error_offset: usize,
    ) -> Result<RequestBuilder, RunsApiError> {
        let url = poll_run_url(&self.config.base_url, run_id)?;
        Ok(self
            .http
            .get(url)
            .headers(self.build_headers()?)
            .query(&[("offset", output_offset), ("error_offset", error_offset)]))
    }

    pub fn build_stop_request(&self, run_id: &str) -> Result<RequestBuilder, RunsApiError> {
        let url = stop_run_url(&self.config.base_url, run_id)?;
        Ok(self.http.post(url).headers(self.build_headers()?))
    }

    pub fn build_active_runs_request(&self) -> Result<RequestBuilder, RunsApiError> {
        let url = active_runs_url(&self.config.base_url)?;
        Ok(self.http.get(url).headers(self.build_headers()?))
    }

    pub fn build_sessions_request(&self) -> Result<RequestBuilder, RunsApiError> {
        let url = sessions_url(&self.config.base_url)?;
        Ok(self.http.get(url).headers(self.build_headers()?))
    }

    /// Submit a prompt; the returned id is the run to poll.
    ///
    /// A `409` from the server surfaces as [`RunsApiError::AlreadyRunning`]
    /// carrying the id of the run that already owns the session.
    pub async fn start_run(
        &self,
        session_id: &str,
        prompt: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StartedRun, RunsApiError> {
        let request = self.build_start_request(session_id, prompt)?;
        let response: StartRunResponse = self.execute(request, cancellation).await?;
        let stream_id = response
            .stream_id
            .filter(|value| !value.trim().is_empty())
            .ok_or(RunsApiError::MissingStreamId)?;

        Ok(StartedRun {
            stream_id,
            user_message: response.user_message,
        })
    }

    /// Fetch output and error text strictly beyond the given offsets.
    pub async fn poll_run(
        &self,
        run_id: &str,
        output_offset: usize,
        error_offset: usize,
    ) -> Result<RunChunk, RunsApiError> {
        let request = self.build_poll_request(run_id, output_offset, error_offset)?;
        self.execute(request, None).await
    }

    pub async fn stop_run(&self, run_id: &str) -> Result<StopRunResponse, RunsApiError> {
        let request = self.build_stop_request(run_id)?;
        self.execute(request, None).await
    }

    /// List runs the server currently considers active, across all clients.
    pub async fn list_active_runs(&self) -> Result<Vec<ActiveRun>, RunsApiError> {
        let request = self.build_active_runs_request()?;
        let response: ActiveRunsResponse = self.execute(request, None).await?;
        Ok(response
            .streams
            .into_iter()
            .filter(ActiveRun::is_active)
            .collect())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, RunsApiError> {
        let request = self.build_sessions_request()?;
        let response: SessionsResponse = self.execute(request, None).await?;
        Ok(response.sessions)
    }

    async fn execute<T>(
        &self,
        request: RequestBuilder,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<T, RunsApiError>
    where
        T: DeserializeOwned,
    {
        if is_cancelled(cancellation) {
            return Err(RunsApiError::Cancelled);
        }

        let response = await_or_cancel(request.send(), cancellation)
            .await?
            .map_err(RunsApiError::from)?;
        let status = response.status();
        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .map_err(RunsApiError::from)?;

        if !status.is_success() {
            return Err(classify_error_response(status, &body));
        }
        if let Some(error) = embedded_not_found(&body) {
            return Err(error);
        }

        serde_json::from_str(&body).map_err(RunsApiError::from)
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, RunsApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(RunsApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(RunsApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
