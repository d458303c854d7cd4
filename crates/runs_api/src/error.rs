use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum RunsApiError {
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    NotFound(String),
    AlreadyRunning {
        active_stream_id: Option<String>,
        message: String,
    },
    MissingStreamId,
    Serde(JsonError),
    Cancelled,
}

impl RunsApiError {
    /// True when the server no longer knows the run (or session) addressed.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Failures a poller should retry with backoff rather than surface.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Serde(_) => true,
            Self::Status(status, _) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub active_stream_id: Option<String>,
    #[serde(default)]
    pub already_running: bool,
}

impl fmt::Display for RunsApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::NotFound(message) => write!(f, "not found: {message}"),
            Self::AlreadyRunning {
                active_stream_id,
                message,
            } => match active_stream_id {
                Some(id) => write!(f, "{message} (active stream: {id})"),
                None => write!(f, "{message}"),
            },
            Self::MissingStreamId => write!(f, "start response did not include a stream id"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for RunsApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RunsApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for RunsApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

fn not_found_marker_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)stream.?not.?found|unknown.?stream|스트림을 찾을 수 없습니다")
            .expect("not-found regex must compile")
    })
}

/// Whether an error message is the server's "run not found" marker.
pub fn is_not_found_message(text: &str) -> bool {
    not_found_marker_regex().is_match(text)
}

/// Extract a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.as_deref().and_then(non_empty_string) {
            return message.to_string();
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

/// Classify a non-success response into the error taxonomy callers act on.
pub fn classify_error_response(status: StatusCode, body: &str) -> RunsApiError {
    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    let message = parse_error_message(status, body);

    if status == StatusCode::CONFLICT || parsed.already_running {
        return RunsApiError::AlreadyRunning {
            active_stream_id: parsed
                .active_stream_id
                .filter(|value| !value.trim().is_empty()),
            message,
        };
    }

    if status == StatusCode::NOT_FOUND || is_not_found_message(&message) {
        return RunsApiError::NotFound(message);
    }

    RunsApiError::Status(status, message)
}

/// `2xx` body fields that mark it as a run chunk, whose `error` is stderr.
#[derive(Debug, Default, Deserialize)]
struct SuccessBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    output_length: Option<usize>,
    #[serde(default)]
    error_length: Option<usize>,
}

impl SuccessBody {
    fn is_chunk(&self) -> bool {
        self.done.is_some() || self.output_length.is_some() || self.error_length.is_some()
    }
}

/// Detect a not-found marker embedded in a `2xx` body.
///
/// Only error-shaped bodies qualify. A chunk's `error` field carries the
/// run's own stderr and is never read as a marker.
pub fn embedded_not_found(body: &str) -> Option<RunsApiError> {
    let parsed = serde_json::from_str::<SuccessBody>(body).ok()?;
    if parsed.is_chunk() {
        return None;
    }
    let message = parsed.error?;
    is_not_found_message(&message).then_some(RunsApiError::NotFound(message))
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_404_is_not_found() {
        let error = classify_error_response(StatusCode::NOT_FOUND, "");
        assert!(error.is_not_found());
    }

    #[test]
    fn localized_marker_is_not_found_even_without_404() {
        let body = r#"{"error":"스트림을 찾을 수 없습니다."}"#;
        let error = classify_error_response(StatusCode::BAD_REQUEST, body);
        assert!(error.is_not_found());
    }

    #[test]
    fn conflict_carries_active_stream_id() {
        let body = r#"{"error":"busy","active_stream_id":"abc","already_running":true}"#;
        match classify_error_response(StatusCode::CONFLICT, body) {
            RunsApiError::AlreadyRunning {
                active_stream_id,
                message,
            } => {
                assert_eq!(active_stream_id.as_deref(), Some("abc"));
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_transient_but_bad_requests_are_not() {
        assert!(classify_error_response(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_error_response(StatusCode::BAD_REQUEST, "nope").is_transient());
    }

    #[test]
    fn embedded_marker_is_detected_in_success_body() {
        assert!(embedded_not_found(r#"{"error":"Stream not found"}"#).is_some());
        assert!(embedded_not_found(r#"{"output":"stream not found"}"#).is_none());
    }

    #[test]
    fn chunk_stderr_mentioning_a_marker_is_not_a_miss() {
        let body = r#"{"output":"","error":"unknown stream id in config","error_length":28,"done":false}"#;
        assert!(embedded_not_found(body).is_none());
    }

    #[test]
    fn undecodable_body_is_retried() {
        let error = RunsApiError::from(
            serde_json::from_str::<serde_json::Value>("{\"output\":").unwrap_err(),
        );
        assert!(error.is_transient());
        assert!(!error.is_not_found());
    }
}
