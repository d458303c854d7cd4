use serde::{Deserialize, Serialize};

/// Body of `POST /sessions/{sid}/message/stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartRunRequest {
    pub prompt: String,
}

impl StartRunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct StartRunResponse {
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub user_message: Option<SavedMessage>,
}

/// A run the server accepted: its id plus the persisted user message, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRun {
    pub stream_id: String,
    pub user_message: Option<SavedMessage>,
}

/// A transcript message the server persisted on behalf of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl SavedMessage {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.role.eq_ignore_ascii_case("error")
    }
}

/// Incremental poll response for one run.
///
/// Every field is optional on the wire; a body missing its length counters is
/// still a usable chunk and callers fall back to their own buffer lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunChunk {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output_length: Option<usize>,
    #[serde(default)]
    pub error_length: Option<usize>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub saved_message: Option<SavedMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl RunChunk {
    #[must_use]
    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn error(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

/// Response to `POST /streams/{id}/stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StopRunResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub saved_message: Option<SavedMessage>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// One entry of `GET /streams`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub id: String,
    pub session_id: String,
    /// Last server-side write, in epoch milliseconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub output_length: Option<usize>,
    #[serde(default)]
    pub error_length: Option<usize>,
}

impl ActiveRun {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            updated_at: None,
            created_at: None,
            done: false,
            cancelled: false,
            output_length: None,
            error_length: None,
        }
    }

    /// Listed entries may include finished runs when the server is asked to.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.done && !self.cancelled
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ActiveRunsResponse {
    #[serde(default)]
    pub streams: Vec<ActiveRun>,
}

/// One entry of `GET /sessions`; only the id matters to run reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub message_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SessionsResponse {
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_tolerates_missing_and_null_fields() {
        let chunk: RunChunk =
            serde_json::from_str(r#"{"output":"hi","error":null,"done":false}"#).expect("chunk");
        assert_eq!(chunk.output(), "hi");
        assert_eq!(chunk.error(), "");
        assert_eq!(chunk.output_length, None);
        assert_eq!(chunk.exit_code, None);
    }

    #[test]
    fn done_chunk_carries_saved_message() {
        let chunk: RunChunk = serde_json::from_str(
            r#"{"output":"","error":"","output_length":5,"error_length":0,"done":true,
                "exit_code":0,"saved":true,"session_id":"s1",
                "saved_message":{"id":"m1","role":"assistant","content":"hello","duration_ms":1200}}"#,
        )
        .expect("chunk");
        let saved = chunk.saved_message.expect("saved message");
        assert_eq!(saved.content, "hello");
        assert!(!saved.is_error());
        assert_eq!(saved.duration_ms, Some(1200));
    }

    #[test]
    fn finished_listed_runs_are_not_active() {
        let listed: ActiveRunsResponse = serde_json::from_str(
            r#"{"streams":[{"id":"r1","session_id":"s1","updated_at":10},
                           {"id":"r2","session_id":"s2","done":true}]}"#,
        )
        .expect("listing");
        let active: Vec<_> = listed.streams.iter().filter(|run| run.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "r1");
    }
}
