//! Per-session activity derived from local sends, local runs, and the remote
//! active-run snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use runs_api::{ActiveRun, CancellationSignal};
use tokio::sync::watch;

pub const STATUS_IDLE: &str = "Idle";
pub const STATUS_SENDING: &str = "Waiting for response...";
pub const STATUS_RECEIVING: &str = "Receiving response...";
pub const STATUS_RECONNECTING: &str = "Reconnecting...";
pub const STATUS_RETRYING: &str = "Connection lost, retrying...";
pub const STATUS_STOPPING: &str = "Stopping...";
pub const STATUS_STOPPED: &str = "Stopped";
pub const STATUS_FAILED: &str = "Failed";
pub const STATUS_CANCELLED: &str = "Cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionActivity {
    Idle,
    Sending,
    StreamingLocal,
    StreamingRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    /// Shown while retrying; never counts as an error.
    Transient,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub text: String,
    pub level: StatusLevel,
}

impl SessionStatus {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: StatusLevel::Info,
        }
    }

    pub fn transient(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: StatusLevel::Transient,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: StatusLevel::Error,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

/// Created lazily per session and never removed.
#[derive(Debug, Default)]
struct SessionActivityRecord {
    sending: bool,
    pending_cancel: Option<CancellationSignal>,
    attached_run_id: Option<String>,
    status: Option<SessionStatus>,
}

#[derive(Debug, Default)]
struct ProjectorState {
    records: HashMap<String, SessionActivityRecord>,
    /// Session id to remote run ids, from the last successful listing.
    remote: BTreeMap<String, Vec<String>>,
}

impl ProjectorState {
    fn record(&mut self, session_id: &str) -> &mut SessionActivityRecord {
        self.records.entry(session_id.to_string()).or_default()
    }

    fn activity(&self, session_id: &str) -> SessionActivity {
        let record = self.records.get(session_id);
        if record.is_some_and(|record| record.sending) {
            return SessionActivity::Sending;
        }
        if record.is_some_and(|record| record.attached_run_id.is_some()) {
            return SessionActivity::StreamingLocal;
        }
        if self.remote.contains_key(session_id) {
            return SessionActivity::StreamingRemote;
        }
        SessionActivity::Idle
    }
}

/// Single source of truth for what each session is doing.
///
/// Every mutation bumps a version published on a `watch` channel so a
/// presentation layer can re-read after any input change.
#[derive(Debug)]
pub struct ActivityProjector {
    state: Mutex<ProjectorState>,
    version: watch::Sender<u64>,
}

impl Default for ActivityProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityProjector {
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            state: Mutex::new(ProjectorState::default()),
            version,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Mark a send as pending. Returns its cancel signal, or `None` if the
    /// session is already sending.
    pub fn begin_send(&self, session_id: &str) -> Option<CancellationSignal> {
        let signal = {
            let mut state = self.lock_state();
            let record = state.record(session_id);
            if record.sending {
                return None;
            }
            let signal = Arc::new(AtomicBool::new(false));
            record.sending = true;
            record.pending_cancel = Some(Arc::clone(&signal));
            record.status = Some(SessionStatus::info(STATUS_SENDING));
            signal
        };
        self.bump();
        Some(signal)
    }

    pub fn end_send(&self, session_id: &str) {
        {
            let mut state = self.lock_state();
            let record = state.record(session_id);
            record.sending = false;
            record.pending_cancel = None;
        }
        self.bump();
    }

    /// Raise the pending send's cancel signal, if there is one.
    pub fn cancel_pending_send(&self, session_id: &str) -> bool {
        let state = self.lock_state();
        let Some(signal) = state
            .records
            .get(session_id)
            .and_then(|record| record.pending_cancel.as_ref())
        else {
            return false;
        };
        signal.store(true, Ordering::Release);
        true
    }

    pub fn attach_run(&self, session_id: &str, run_id: &str) {
        self.lock_state().record(session_id).attached_run_id = Some(run_id.to_string());
        self.bump();
    }

    /// Detach `run_id` only if it is still the session's attached run.
    pub fn detach_run(&self, session_id: &str, run_id: &str) -> bool {
        let detached = {
            let mut state = self.lock_state();
            let record = state.record(session_id);
            if record.attached_run_id.as_deref() == Some(run_id) {
                record.attached_run_id = None;
                true
            } else {
                false
            }
        };
        if detached {
            self.bump();
        }
        detached
    }

    #[must_use]
    pub fn attached_run(&self, session_id: &str) -> Option<String> {
        self.lock_state()
            .records
            .get(session_id)
            .and_then(|record| record.attached_run_id.clone())
    }

    #[must_use]
    pub fn is_sending(&self, session_id: &str) -> bool {
        self.lock_state()
            .records
            .get(session_id)
            .is_some_and(|record| record.sending)
    }

    pub fn set_status(&self, session_id: &str, status: SessionStatus) {
        {
            let mut state = self.lock_state();
            let record = state.record(session_id);
            if record.status.as_ref() == Some(&status) {
                return;
            }
            record.status = Some(status);
        }
        self.bump();
    }

    #[must_use]
    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.lock_state()
            .records
            .get(session_id)
            .and_then(|record| record.status.clone())
    }

    #[must_use]
    pub fn has_error(&self, session_id: &str) -> bool {
        self.status(session_id)
            .is_some_and(|status| status.is_error())
    }

    /// Replace the remote set with a fresh listing.
    ///
    /// Only successful fetches reach here, so a session leaves the remote
    /// set solely because the server stopped listing it.
    pub fn apply_remote_snapshot(&self, runs: &[ActiveRun]) -> bool {
        let mut next: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for run in runs.iter().filter(|run| run.is_active()) {
            next.entry(run.session_id.clone())
                .or_default()
                .push(run.id.clone());
        }

        let changed = {
            let mut state = self.lock_state();
            if state.remote == next {
                false
            } else {
                state.remote = next;
                true
            }
        };
        if changed {
            tracing::debug!(sessions = runs.len(), "remote active-run set changed");
            self.bump();
        }
        changed
    }

    #[must_use]
    pub fn remote_runs(&self, session_id: &str) -> Vec<String> {
        self.lock_state()
            .remote
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn activity(&self, session_id: &str) -> SessionActivity {
        self.lock_state().activity(session_id)
    }

    #[must_use]
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.activity(session_id) != SessionActivity::Idle
    }

    /// Activity of every session the projector has seen.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, SessionActivity> {
        let state = self.lock_state();
        state
            .records
            .keys()
            .chain(state.remote.keys())
            .map(|session_id| (session_id.clone(), state.activity(session_id)))
            .collect()
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    fn lock_state(&self) -> MutexGuard<'_, ProjectorState> {
        lock_unpoisoned(&self.state)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
