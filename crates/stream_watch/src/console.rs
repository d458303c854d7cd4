use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use stream_reconcile::{
    ContentKind, ObserverSink, ObserverState, ObserverView, RenderedContent, SessionHost, ViewId,
};

/// Prints run content to stdout as it grows.
///
/// Streaming renders replace the whole view, so only the suffix beyond what
/// was already printed is written. Content that no longer extends the printed
/// prefix (a saved message, a stop marker) is printed in full on a new line.
#[derive(Default)]
pub struct ConsoleHost {
    next_view: AtomicU64,
    printed: Mutex<HashMap<ViewId, String>>,
    observed: Mutex<String>,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_delta(printed: &mut String, next: &str) -> String {
        let delta = match next.strip_prefix(printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None if printed.is_empty() => next.to_string(),
            None => format!("\n{next}"),
        };
        *printed = next.to_string();
        delta
    }
}

impl SessionHost for ConsoleHost {
    fn attach_view(&self, session_id: &str, run_id: &str) -> ViewId {
        let view = self.next_view.fetch_add(1, Ordering::Relaxed) + 1;
        lock_unpoisoned(&self.printed).insert(view, String::new());
        eprintln!("[{session_id}] following run {run_id}");
        view
    }

    fn render_view(&self, view: ViewId, content: &RenderedContent) {
        let delta = {
            let mut printed = lock_unpoisoned(&self.printed);
            let entry = printed.entry(view).or_default();
            Self::write_delta(entry, &content.text)
        };
        print_flush(&delta);

        if content.kind != ContentKind::Streaming {
            let label = match content.kind {
                ContentKind::Completed => "done",
                ContentKind::Failed => "failed",
                ContentKind::Stopped => "stopped",
                ContentKind::Streaming => "streaming",
            };
            match content.duration_label() {
                Some(duration) => eprintln!("\n[{label} in {duration}]"),
                None => eprintln!("\n[{label}]"),
            }
        }
    }

    fn reload_session(&self, session_id: &str) {
        tracing::debug!(session_id, "session reload requested");
    }
}

impl ObserverSink for ConsoleHost {
    fn render_observer(&self, view: &ObserverView) {
        let delta = Self::write_delta(&mut lock_unpoisoned(&self.observed), &view.content);
        print_flush(&delta);

        match view.state {
            ObserverState::Streaming => {}
            ObserverState::Reconnecting { attempt } => {
                eprintln!("\n[{}] reconnecting (attempt {attempt})", view.run_id);
            }
            ObserverState::Finished { exit_code } => {
                eprintln!("\n[{}] finished with exit code {exit_code:?}", view.run_id);
            }
            ObserverState::Gone => eprintln!("\n[{}] run is gone", view.run_id),
            ObserverState::Failed => {
                eprintln!("\n[{}] observer stopped after an error", view.run_id);
            }
        }
    }
}

fn print_flush(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
