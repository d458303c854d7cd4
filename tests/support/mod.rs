#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pointer_store::{DurablePointer, MemoryPointerStore, PointerStore};
use runs_api::{
    ActiveRun, CancellationSignal, RunChunk, RunsApiError, SavedMessage, SessionSummary,
    StartedRun, StatusCode, StopRunResponse,
};
use stream_reconcile::{
    ActivityProjector, ObserverSink, ObserverView, Reconciler, ReconcilerConfig, RemoteMonitor,
    RemoteMonitorConfig, RenderedContent, RunsTransport, SessionHost, ViewId,
};
use tokio::sync::Semaphore;

pub enum ScriptedPoll {
    Chunk(RunChunk),
    NotFound,
    Transient,
    /// A rejection retrying cannot fix.
    Fatal,
}

pub enum ScriptedStart {
    Started(&'static str),
    AlreadyRunning(&'static str),
    Fail(&'static str),
    /// Never answers; resolves only when the caller's signal is raised.
    Hang,
}

pub enum ScriptedStop {
    Ack,
    NotFound,
    Transient,
}

/// In-memory server answering each call from a per-endpoint script.
///
/// An exhausted poll script answers with an empty, unfinished chunk; an
/// exhausted listing answers with no runs.
#[derive(Default)]
pub struct ScriptedTransport {
    polls: Mutex<HashMap<String, VecDeque<ScriptedPoll>>>,
    poll_log: Mutex<Vec<(String, usize, usize)>>,
    poll_gate: Option<Arc<Semaphore>>,
    starts: Mutex<VecDeque<ScriptedStart>>,
    start_calls: AtomicUsize,
    stops: Mutex<VecDeque<ScriptedStop>>,
    stop_log: Mutex<Vec<String>>,
    listings: Mutex<VecDeque<Option<Vec<ActiveRun>>>>,
    list_calls: AtomicUsize,
    sessions: Mutex<Option<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Polls wait for a permit from the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                poll_gate: Some(Arc::clone(&gate)),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn script_polls(&self, run_id: &str, polls: Vec<ScriptedPoll>) {
        lock_unpoisoned(&self.polls)
            .entry(run_id.to_string())
            .or_default()
            .extend(polls);
    }

    pub fn script_start(&self, start: ScriptedStart) {
        lock_unpoisoned(&self.starts).push_back(start);
    }

    pub fn script_stop(&self, stop: ScriptedStop) {
        lock_unpoisoned(&self.stops).push_back(stop);
    }

    /// `None` makes that listing fail.
    pub fn script_listing(&self, listing: Option<Vec<ActiveRun>>) {
        lock_unpoisoned(&self.listings).push_back(listing);
    }

    /// `None` makes the session listing fail.
    pub fn set_sessions(&self, sessions: Option<Vec<&str>>) {
        *lock_unpoisoned(&self.sessions) =
            sessions.map(|ids| ids.into_iter().map(str::to_string).collect());
    }

    pub fn poll_log(&self) -> Vec<(String, usize, usize)> {
        lock_unpoisoned(&self.poll_log).clone()
    }

    pub fn poll_count(&self, run_id: &str) -> usize {
        self.poll_log()
            .iter()
            .filter(|(id, _, _)| id == run_id)
            .count()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_log(&self) -> Vec<String> {
        lock_unpoisoned(&self.stop_log).clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunsTransport for ScriptedTransport {
    async fn start_run(
        &self,
        _session_id: &str,
        _prompt: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StartedRun, RunsApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = lock_unpoisoned(&self.starts)
            .pop_front()
            .unwrap_or(ScriptedStart::Fail("no scripted start"));

        match scripted {
            ScriptedStart::Started(run_id) => Ok(StartedRun {
                stream_id: run_id.to_string(),
                user_message: None,
            }),
            ScriptedStart::AlreadyRunning(run_id) => Err(RunsApiError::AlreadyRunning {
                active_stream_id: Some(run_id.to_string()),
                message: "already running".to_string(),
            }),
            ScriptedStart::Fail(message) => Err(RunsApiError::Status(
                StatusCode::BAD_REQUEST,
                message.to_string(),
            )),
            ScriptedStart::Hang => loop {
                if cancellation.is_some_and(|signal| signal.load(Ordering::Acquire)) {
                    return Err(RunsApiError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
        }
    }

    async fn poll_run(
        &self,
        run_id: &str,
        output_offset: usize,
        error_offset: usize,
    ) -> Result<RunChunk, RunsApiError> {
        lock_unpoisoned(&self.poll_log).push((run_id.to_string(), output_offset, error_offset));
        if let Some(gate) = &self.poll_gate {
            gate.acquire().await.expect("poll gate closed").forget();
        }

        let scripted = lock_unpoisoned(&self.polls)
            .get_mut(run_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(ScriptedPoll::Chunk(chunk)) => Ok(chunk),
            Some(ScriptedPoll::NotFound) => Err(not_found()),
            Some(ScriptedPoll::Transient) => Err(transient()),
            Some(ScriptedPoll::Fatal) => Err(fatal()),
            None => Ok(RunChunk::default()),
        }
    }

    async fn stop_run(&self, run_id: &str) -> Result<StopRunResponse, RunsApiError> {
        lock_unpoisoned(&self.stop_log).push(run_id.to_string());
        match lock_unpoisoned(&self.stops).pop_front() {
            Some(ScriptedStop::Ack) | None => Ok(StopRunResponse {
                status: Some("stopped".to_string()),
                ..StopRunResponse::default()
            }),
            Some(ScriptedStop::NotFound) => Err(not_found()),
            Some(ScriptedStop::Transient) => Err(transient()),
        }
    }

    async fn list_active_runs(&self) -> Result<Vec<ActiveRun>, RunsApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match lock_unpoisoned(&self.listings).pop_front() {
            Some(Some(runs)) => Ok(runs.into_iter().filter(ActiveRun::is_active).collect()),
            Some(None) => Err(transient()),
            None => Ok(Vec::new()),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, RunsApiError> {
        match lock_unpoisoned(&self.sessions).clone() {
            Some(ids) => Ok(ids
                .into_iter()
                .map(|id| SessionSummary {
                    id,
                    title: None,
                    updated_at: None,
                    message_count: None,
                })
                .collect()),
            None => Err(transient()),
        }
    }
}

#[derive(Default)]
pub struct RecordingHost {
    next_view: AtomicU64,
    views: Mutex<Vec<(ViewId, String, String)>>,
    renders: Mutex<Vec<(ViewId, RenderedContent)>>,
    reloads: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn view_for_run(&self, run_id: &str) -> Option<ViewId> {
        lock_unpoisoned(&self.views)
            .iter()
            .find(|(_, _, run)| run == run_id)
            .map(|(view, _, _)| *view)
    }

    pub fn renders_for(&self, view: ViewId) -> Vec<RenderedContent> {
        lock_unpoisoned(&self.renders)
            .iter()
            .filter(|(id, _)| *id == view)
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub fn last_render_for_run(&self, run_id: &str) -> Option<RenderedContent> {
        let view = self.view_for_run(run_id)?;
        self.renders_for(view).pop()
    }

    pub fn reloads(&self) -> Vec<String> {
        lock_unpoisoned(&self.reloads).clone()
    }
}

impl SessionHost for RecordingHost {
    fn attach_view(&self, session_id: &str, run_id: &str) -> ViewId {
        let view = self.next_view.fetch_add(1, Ordering::SeqCst) + 1;
        lock_unpoisoned(&self.views).push((view, session_id.to_string(), run_id.to_string()));
        view
    }

    fn render_view(&self, view: ViewId, content: &RenderedContent) {
        lock_unpoisoned(&self.renders).push((view, content.clone()));
    }

    fn reload_session(&self, session_id: &str) {
        lock_unpoisoned(&self.reloads).push(session_id.to_string());
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    views: Mutex<Vec<ObserverView>>,
}

impl RecordingObserver {
    pub fn views(&self) -> Vec<ObserverView> {
        lock_unpoisoned(&self.views).clone()
    }
}

impl ObserverSink for RecordingObserver {
    fn render_observer(&self, view: &ObserverView) {
        lock_unpoisoned(&self.views).push(view.clone());
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub pointers: Arc<MemoryPointerStore>,
    pub host: Arc<RecordingHost>,
    pub activity: Arc<ActivityProjector>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_pointers(transport, Vec::new())
    }

    pub fn with_pointers(transport: ScriptedTransport, pointers: Vec<DurablePointer>) -> Self {
        let transport = Arc::new(transport);
        let pointers = Arc::new(MemoryPointerStore::with_pointers(pointers));
        let host = Arc::new(RecordingHost::default());
        let activity = Arc::new(ActivityProjector::new());
        let reconciler = Reconciler::new(
            Arc::clone(&transport) as Arc<dyn RunsTransport>,
            Arc::clone(&pointers) as Arc<dyn PointerStore>,
            Arc::clone(&host) as Arc<dyn SessionHost>,
            Arc::clone(&activity),
            ReconcilerConfig::default(),
        );

        Self {
            transport,
            pointers,
            host,
            activity,
            reconciler,
        }
    }

    pub fn pointer_ids(&self) -> Vec<String> {
        self.pointers
            .list()
            .expect("memory store never fails")
            .into_iter()
            .map(|pointer| pointer.run_id)
            .collect()
    }
}

pub struct MonitorHarness {
    pub transport: Arc<ScriptedTransport>,
    pub observer: Arc<RecordingObserver>,
    pub activity: Arc<ActivityProjector>,
    pub monitor: Arc<RemoteMonitor>,
}

impl MonitorHarness {
    pub fn new(transport: ScriptedTransport) -> Self {
        let transport = Arc::new(transport);
        let observer = Arc::new(RecordingObserver::default());
        let activity = Arc::new(ActivityProjector::new());
        let monitor = RemoteMonitor::new(
            Arc::clone(&transport) as Arc<dyn RunsTransport>,
            Arc::clone(&activity),
            Arc::clone(&observer) as Arc<dyn ObserverSink>,
            RemoteMonitorConfig::default(),
        );

        Self {
            transport,
            observer,
            activity,
            monitor,
        }
    }
}

pub fn output(text: &str, total: usize) -> RunChunk {
    RunChunk {
        output: Some(text.to_string()),
        output_length: Some(total),
        ..RunChunk::default()
    }
}

pub fn done(exit_code: i32) -> RunChunk {
    RunChunk {
        done: true,
        exit_code: Some(exit_code),
        ..RunChunk::default()
    }
}

pub fn saved(role: &str, content: &str) -> SavedMessage {
    SavedMessage {
        id: Some("m1".to_string()),
        role: role.to_string(),
        content: content.to_string(),
        created_at: None,
        duration_ms: None,
    }
}

pub fn not_found() -> RunsApiError {
    RunsApiError::NotFound("stream not found".to_string())
}

pub fn transient() -> RunsApiError {
    RunsApiError::Status(StatusCode::SERVICE_UNAVAILABLE, "unavailable".to_string())
}

pub fn fatal() -> RunsApiError {
    RunsApiError::Status(StatusCode::BAD_REQUEST, "run id rejected".to_string())
}

/// Let spawned tasks run to their next suspension point.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock by `ms` and let woken tasks run.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
