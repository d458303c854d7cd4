use reqwest::Url;

use crate::error::RunsApiError;

/// Default base URL for run endpoint requests.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/api/codex";

/// Normalize a base URL before endpoint segments are appended.
///
/// Blank input falls back to [`DEFAULT_BASE_URL`]; trailing slashes are
/// dropped so `/api/codex/` and `/api/codex` resolve to the same endpoints.
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    base.trim_end_matches('/').to_string()
}

/// Append percent-encoded path segments to the normalized base URL.
pub fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, RunsApiError> {
    let normalized = normalize_base_url(base_url);
    let mut url = Url::parse(&normalized)
        .map_err(|error| RunsApiError::InvalidBaseUrl(format!("{normalized}: {error}")))?;

    url.path_segments_mut()
        .map_err(|_| RunsApiError::InvalidBaseUrl(normalized.clone()))?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}

/// `POST {base}/sessions/{session_id}/message/stream`
pub fn start_run_url(base_url: &str, session_id: &str) -> Result<Url, RunsApiError> {
    endpoint(base_url, &["sessions", session_id, "message", "stream"])
}

/// `GET {base}/streams/{run_id}`; offsets travel as query parameters.
pub fn poll_run_url(base_url: &str, run_id: &str) -> Result<Url, RunsApiError> {
    endpoint(base_url, &["streams", run_id])
}

/// `POST {base}/streams/{run_id}/stop`
pub fn stop_run_url(base_url: &str, run_id: &str) -> Result<Url, RunsApiError> {
    endpoint(base_url, &["streams", run_id, "stop"])
}

/// `GET {base}/streams`
pub fn active_runs_url(base_url: &str) -> Result<Url, RunsApiError> {
    endpoint(base_url, &["streams"])
}

/// `GET {base}/sessions`
pub fn sessions_url(base_url: &str) -> Result<Url, RunsApiError> {
    endpoint(base_url, &["sessions"])
}
