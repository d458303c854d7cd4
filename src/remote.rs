//! Discovery of runs started elsewhere, plus one read-only observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use runs_api::{ActiveRun, RunsApiError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::activity::ActivityProjector;
use crate::backoff::BackoffPolicy;
use crate::config::{DEFAULT_REMOTE_FRESHNESS, DEFAULT_REMOTE_INTERVAL};
use crate::host::{ObserverSink, ObserverState, ObserverView};
use crate::run_state::{combined_text, StreamBuffer};
use crate::transport::RunsTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMonitorConfig {
    pub interval: Duration,
    /// A cached listing younger than this is served without a fetch.
    pub freshness: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RemoteMonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REMOTE_INTERVAL,
            freshness: DEFAULT_REMOTE_FRESHNESS,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    fetched_at: Instant,
    runs: Arc<Vec<ActiveRun>>,
}

struct ObserverSlot {
    id: u64,
    run_id: String,
    handle: Option<JoinHandle<()>>,
}

pub struct RemoteMonitor {
    transport: Arc<dyn RunsTransport>,
    activity: Arc<ActivityProjector>,
    sink: Arc<dyn ObserverSink>,
    config: RemoteMonitorConfig,
    cache: tokio::sync::Mutex<Option<CachedSnapshot>>,
    observer: Mutex<Option<ObserverSlot>>,
    next_observer_id: AtomicU64,
}

impl RemoteMonitor {
    pub fn new(
        transport: Arc<dyn RunsTransport>,
        activity: Arc<ActivityProjector>,
        sink: Arc<dyn ObserverSink>,
        config: RemoteMonitorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            activity,
            sink,
            config,
            cache: tokio::sync::Mutex::new(None),
            observer: Mutex::new(None),
            next_observer_id: AtomicU64::new(1),
        })
    }

    /// Active runs across all clients.
    ///
    /// Concurrent callers queue on the cache lock, so a burst of calls costs
    /// one fetch. A failed fetch leaves both the cache and the projector
    /// untouched.
    pub async fn active_runs(&self) -> Result<Arc<Vec<ActiveRun>>, RunsApiError> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.fetched_at.elapsed() < self.config.freshness {
                return Ok(Arc::clone(&snapshot.runs));
            }
        }

        let runs = Arc::new(self.transport.list_active_runs().await?);
        self.activity.apply_remote_snapshot(&runs);
        *cache = Some(CachedSnapshot {
            fetched_at: Instant::now(),
            runs: Arc::clone(&runs),
        });
        Ok(runs)
    }

    /// Drop the cached listing so the next call fetches.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Run the listing loop until the returned handle is aborted.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(error) = monitor.active_runs().await {
                    tracing::warn!(error = %error, "active run listing failed");
                }
                tokio::time::sleep(monitor.config.interval).await;
            }
        })
    }

    /// Follow `run_id` read-only, replacing any current observer.
    pub fn attach(self: &Arc<Self>, run_id: &str, session_id: &str) {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut slot = self.lock_observer();
            slot.replace(ObserverSlot {
                id,
                run_id: run_id.to_string(),
                handle: None,
            })
        };
        abort_slot(previous);

        let monitor = Arc::clone(self);
        let run_id = run_id.to_string();
        let session_id = session_id.to_string();
        let handle = tokio::spawn(async move { monitor.observe(id, run_id, session_id).await });

        let mut slot = self.lock_observer();
        match slot.as_mut() {
            Some(current) if current.id == id => current.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    pub fn detach(&self) -> bool {
        let previous = self.lock_observer().take();
        let detached = previous.is_some();
        abort_slot(previous);
        detached
    }

    #[must_use]
    pub fn observed_run(&self) -> Option<String> {
        self.lock_observer()
            .as_ref()
            .map(|slot| slot.run_id.clone())
    }

    async fn observe(self: Arc<Self>, id: u64, run_id: String, session_id: String) {
        let mut output = StreamBuffer::default();
        let mut error = StreamBuffer::default();
        let mut failures = 0u32;
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !self.is_current(id) {
                return;
            }

            let result = self
                .transport
                .poll_run(&run_id, output.offset(), error.offset())
                .await;
            if !self.is_current(id) {
                return;
            }

            match result {
                Ok(chunk) => {
                    let arrived = output.merge(chunk.output(), chunk.output_length)
                        | error.merge(chunk.error(), chunk.error_length);
                    let recovered = failures > 0;
                    failures = 0;
                    delay = self.config.backoff.delay(0);

                    if chunk.done {
                        let content = chunk
                            .saved_message
                            .as_ref()
                            .map(|message| message.content.clone())
                            .unwrap_or_else(|| combined_text(output.text(), error.text()));
                        self.emit(
                            &run_id,
                            &session_id,
                            content,
                            ObserverState::Finished {
                                exit_code: chunk.exit_code,
                            },
                        );
                        self.release(id);
                        return;
                    }

                    if arrived || recovered {
                        self.emit(
                            &run_id,
                            &session_id,
                            combined_text(output.text(), error.text()),
                            ObserverState::Streaming,
                        );
                    }
                }
                Err(err) if err.is_not_found() => {
                    self.emit(
                        &run_id,
                        &session_id,
                        combined_text(output.text(), error.text()),
                        ObserverState::Gone,
                    );
                    self.release(id);
                    return;
                }
                Err(err) if !err.is_transient() => {
                    tracing::warn!(run_id = %run_id, error = %err, "observer poll failed permanently");
                    self.emit(
                        &run_id,
                        &session_id,
                        combined_text(output.text(), error.text()),
                        ObserverState::Failed,
                    );
                    self.release(id);
                    return;
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    delay = self.config.backoff.delay(failures);
                    tracing::debug!(run_id = %run_id, attempt = failures, error = %err, "observer poll failed");
                    self.emit(
                        &run_id,
                        &session_id,
                        combined_text(output.text(), error.text()),
                        ObserverState::Reconnecting { attempt: failures },
                    );
                }
            }
        }
    }

    fn emit(&self, run_id: &str, session_id: &str, content: String, state: ObserverState) {
        self.sink.render_observer(&ObserverView {
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
            content,
            state,
        });
    }

    fn is_current(&self, id: u64) -> bool {
        self.lock_observer()
            .as_ref()
            .is_some_and(|slot| slot.id == id)
    }

    /// Clear the slot if `id` still owns it; the task is exiting on its own.
    fn release(&self, id: u64) {
        let mut slot = self.lock_observer();
        if slot.as_ref().is_some_and(|current| current.id == id) {
            *slot = None;
        }
    }

    fn lock_observer(&self) -> MutexGuard<'_, Option<ObserverSlot>> {
        match self.observer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn abort_slot(slot: Option<ObserverSlot>) {
    if let Some(handle) = slot.and_then(|slot| slot.handle) {
        handle.abort();
    }
}
