//! Client-side record of one run: buffers, offsets, and polling status.

use std::time::Duration;

use runs_api::{RunChunk, SavedMessage};
use time::OffsetDateTime;

use crate::host::ViewId;

pub const STOPPED_MARKER: &str = "[Stopped by user]";
pub const FAILED_FALLBACK: &str = "Run failed.";

/// Accumulated text for one of a run's two streams.
///
/// `offset` counts characters, matching the server's length counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBuffer {
    text: String,
    chars: usize,
    offset: usize,
}

impl StreamBuffer {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn char_len(&self) -> usize {
        self.chars
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append `chunk`; returns whether any text arrived.
    ///
    /// The offset moves to the server-reported length when present, else to
    /// the local character count, and never moves backwards.
    pub fn merge(&mut self, chunk: &str, reported_len: Option<usize>) -> bool {
        if chunk.is_empty() {
            return false;
        }

        self.text.push_str(chunk);
        self.chars += chunk.chars().count();
        self.offset = reported_len.unwrap_or(self.chars).max(self.offset);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    Polling,
    BackoffWait,
    Stopping,
    Finishing,
    Cleared,
}

impl RunPhase {
    /// Backoff-wait is a polling sub-state, so it may also begin a stop.
    #[must_use]
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;

        match (self, next) {
            (Starting, Polling | Cleared) => true,
            (Polling | BackoffWait, Polling | BackoffWait | Stopping | Finishing | Cleared) => {
                true
            }
            (Stopping, Polling | BackoffWait | Finishing | Cleared) => true,
            (Finishing, Cleared) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_polling(self) -> bool {
        matches!(self, Self::Polling | Self::BackoffWait)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub run_id: String,
    pub session_id: String,
    pub output: StreamBuffer,
    pub error: StreamBuffer,
    pub started_at_ms: i64,
    pub consecutive_failures: u32,
    pub next_poll_delay: Duration,
    pub attached_view: Option<ViewId>,
    pub phase: RunPhase,
    pub poll_in_flight: bool,
}

impl RunState {
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        started_at_ms: i64,
        base_delay: Duration,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            output: StreamBuffer::default(),
            error: StreamBuffer::default(),
            started_at_ms,
            consecutive_failures: 0,
            next_poll_delay: base_delay,
            attached_view: None,
            phase: RunPhase::Starting,
            poll_in_flight: false,
        }
    }

    /// Move to `next` if the run state machine allows it.
    pub fn transition(&mut self, next: RunPhase) -> bool {
        if self.phase == next || self.phase.can_transition_to(next) {
            self.phase = next;
            true
        } else {
            false
        }
    }

    /// Merge a poll response; returns whether any text arrived.
    pub fn apply_chunk(&mut self, chunk: &RunChunk) -> bool {
        let output = self.output.merge(chunk.output(), chunk.output_length);
        let error = self.error.merge(chunk.error(), chunk.error_length);
        output || error
    }

    #[must_use]
    pub fn live_content(&self) -> String {
        combined_text(self.output.text(), self.error.text())
    }

    #[must_use]
    pub fn elapsed(&self, now_ms: i64) -> Duration {
        elapsed_since(self.started_at_ms, now_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Streaming,
    Completed,
    Failed,
    Stopped,
}

/// What a view should currently display for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub text: String,
    pub kind: ContentKind,
    pub duration: Option<Duration>,
}

impl RenderedContent {
    #[must_use]
    pub fn streaming(text: String) -> Self {
        Self {
            text,
            kind: ContentKind::Streaming,
            duration: None,
        }
    }

    /// Final content for a finished run.
    ///
    /// A saved message wins over local buffers. Without one, exit code `0`
    /// keeps the combined buffers and anything else is a failure.
    #[must_use]
    pub fn finished(
        state: &RunState,
        exit_code: Option<i32>,
        saved_message: Option<&SavedMessage>,
        duration: Duration,
    ) -> Self {
        let duration = saved_message
            .and_then(|message| message.duration_ms)
            .map(Duration::from_millis)
            .or(Some(duration));

        if let Some(message) = saved_message {
            let kind = if message.is_error() {
                ContentKind::Failed
            } else {
                ContentKind::Completed
            };
            return Self {
                text: message.content.clone(),
                kind,
                duration,
            };
        }

        if exit_code == Some(0) {
            return Self {
                text: state.live_content(),
                kind: ContentKind::Completed,
                duration,
            };
        }

        let text = [state.error.text(), state.output.text()]
            .into_iter()
            .find(|text| !text.is_empty())
            .unwrap_or(FAILED_FALLBACK)
            .to_string();
        Self {
            text,
            kind: ContentKind::Failed,
            duration,
        }
    }

    #[must_use]
    pub fn stopped(state: &RunState, duration: Duration) -> Self {
        let combined = state.live_content();
        let text = if combined.is_empty() {
            STOPPED_MARKER.to_string()
        } else {
            format!("{combined}\n\n{STOPPED_MARKER}")
        };
        Self {
            text,
            kind: ContentKind::Stopped,
            duration: Some(duration),
        }
    }

    #[must_use]
    pub fn duration_label(&self) -> Option<String> {
        self.duration.map(format_duration)
    }
}

/// `output`, plus `"\n" + error` when the error stream is non-empty.
#[must_use]
pub fn combined_text(output: &str, error: &str) -> String {
    if error.is_empty() {
        output.to_string()
    } else {
        format!("{output}\n{error}")
    }
}

/// `4.2s` under ten seconds, `42s` under a minute, then `3m 07s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 10.0 {
        return format!("{seconds:.1}s");
    }

    let rounded = seconds.round() as u64;
    if rounded < 60 {
        return format!("{rounded}s");
    }

    format!("{}m {:02}s", rounded / 60, rounded % 60)
}

#[must_use]
pub fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[must_use]
pub fn elapsed_since(started_at_ms: i64, now_ms: i64) -> Duration {
    let elapsed = now_ms.saturating_sub(started_at_ms).max(0);
    Duration::from_millis(u64::try_from(elapsed).unwrap_or(0))
}
