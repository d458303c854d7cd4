//! Polling loops for runs this client started or resumed.
//!
//! Each tracked run has one [`RunState`] in the registry and one spawned
//! driver task. The driver sleeps, calls [`Reconciler::poll`], and exits once
//! the run is no longer tracked. Completion, stop, and "server forgot the
//! run" all remove the state under the registry lock, so whichever path gets
//! there first is the only one that clears the pointer and reloads.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::join_all;
use pointer_store::{DurablePointer, PointerStore};
use runs_api::{RunChunk, RunsApiError, SavedMessage};

use crate::activity::{
    ActivityProjector, SessionStatus, STATUS_CANCELLED, STATUS_FAILED, STATUS_IDLE,
    STATUS_RECEIVING, STATUS_RECONNECTING, STATUS_RETRYING, STATUS_SENDING, STATUS_STOPPED,
    STATUS_STOPPING,
};
use crate::backoff::BackoffPolicy;
use crate::config::MAX_PROMPT_CHARS;
use crate::error::ReconcileError;
use crate::host::SessionHost;
use crate::run_state::{now_ms, ContentKind, RenderedContent, RunPhase, RunState};
use crate::transport::RunsTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub backoff: BackoffPolicy,
    pub max_prompt_chars: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_prompt_chars: MAX_PROMPT_CHARS,
        }
    }
}

/// What a successful start request handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSubmission {
    pub run_id: String,
    pub user_message: Option<SavedMessage>,
    pub started_at_ms: i64,
}

impl PromptSubmission {
    pub fn new(run_id: impl Into<String>, started_at_ms: i64) -> Self {
        Self {
            run_id: run_id.into(),
            user_message: None,
            started_at_ms,
        }
    }
}

/// Terminal fields of a done run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub saved_message: Option<SavedMessage>,
}

impl From<&RunChunk> for RunResult {
    fn from(chunk: &RunChunk) -> Self {
        Self {
            exit_code: chunk.exit_code,
            saved_message: chunk.saved_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalRun {
    pub run_id: String,
    pub session_id: String,
    pub content: RenderedContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Poll again after `next_delay`.
    Pending { next_delay: Duration },
    /// A stop request owns the run; keep waiting without fetching.
    Stopping { next_delay: Duration },
    /// Another poll for this run has not returned yet.
    AlreadyInFlight,
    NotTracked,
    Finished,
    /// The server no longer knows the run.
    Gone,
    /// A non-retryable failure ended local tracking.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(FinalRun),
    /// No run id existed yet; the pending send was cancelled instead.
    SendCancelled,
    /// The run completed before the stop was acknowledged.
    AlreadyFinished,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    /// Retrying after a failed first fetch; the pointer is kept.
    ResumedWithBackoff,
    AlreadyFinished,
    Gone,
    /// Another run already owns the session.
    Dropped,
    AlreadyTracked,
    /// The first fetch failed in a way retrying cannot fix; the pointer is
    /// cleared.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Started(RunState),
    /// The server already had a run for the session; that run is followed.
    AttachedExisting {
        run_id: String,
        outcome: ResumeOutcome,
    },
}

pub struct Reconciler {
    transport: Arc<dyn RunsTransport>,
    pointers: Arc<dyn PointerStore>,
    host: Arc<dyn SessionHost>,
    activity: Arc<ActivityProjector>,
    runs: Mutex<HashMap<String, RunState>>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        transport: Arc<dyn RunsTransport>,
        pointers: Arc<dyn PointerStore>,
        host: Arc<dyn SessionHost>,
        activity: Arc<ActivityProjector>,
        config: ReconcilerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            pointers,
            host,
            activity,
            runs: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn activity(&self) -> &Arc<ActivityProjector> {
        &self.activity
    }

    #[must_use]
    pub fn run_state(&self, run_id: &str) -> Option<RunState> {
        self.lock_runs().get(run_id).cloned()
    }

    #[must_use]
    pub fn run_for_session(&self, session_id: &str) -> Option<RunState> {
        self.lock_runs()
            .values()
            .find(|state| state.session_id == session_id)
            .cloned()
    }

    #[must_use]
    pub fn tracked_runs(&self) -> Vec<RunState> {
        self.lock_runs().values().cloned().collect()
    }

    /// Begin tracking a run the server just accepted and poll it at once.
    pub fn start(
        self: &Arc<Self>,
        session_id: &str,
        submission: PromptSubmission,
    ) -> Result<RunState, ReconcileError> {
        let state = RunState::new(
            &submission.run_id,
            session_id,
            submission.started_at_ms,
            self.config.backoff.base,
        );
        self.install(state)?;
        self.persist_pointer(DurablePointer::new(
            &submission.run_id,
            session_id,
            submission.started_at_ms,
        ));

        let state = self.attach(&submission.run_id, RunPhase::Polling, false);
        self.activity
            .set_status(session_id, SessionStatus::info(STATUS_SENDING));
        tracing::info!(run_id = %submission.run_id, session_id, "run started");

        self.spawn_driver(submission.run_id.clone(), Duration::ZERO);
        state.ok_or_else(|| ReconcileError::NoActiveRun {
            session_id: session_id.to_string(),
        })
    }

    /// Fetch text beyond the current offsets and merge it.
    ///
    /// At most one fetch per run is outstanding; a concurrent call returns
    /// [`PollOutcome::AlreadyInFlight`] without touching the server.
    pub async fn poll(&self, run_id: &str) -> PollOutcome {
        let (output_offset, error_offset) = {
            let mut runs = self.lock_runs();
            let Some(state) = runs.get_mut(run_id) else {
                return PollOutcome::NotTracked;
            };
            if state.poll_in_flight {
                return PollOutcome::AlreadyInFlight;
            }
            if state.phase == RunPhase::Stopping {
                return PollOutcome::Stopping {
                    next_delay: state.next_poll_delay,
                };
            }
            state.poll_in_flight = true;
            (state.output.offset(), state.error.offset())
        };

        match self
            .transport
            .poll_run(run_id, output_offset, error_offset)
            .await
        {
            Ok(chunk) => self.apply_poll_success(run_id, chunk),
            Err(error) if error.is_not_found() => {
                if self.reconcile_gone(run_id) {
                    PollOutcome::Gone
                } else {
                    PollOutcome::NotTracked
                }
            }
            Err(error) if error.is_transient() => self.apply_poll_failure(run_id, &error),
            Err(error) => {
                if self.abandon(run_id, &error) {
                    PollOutcome::Abandoned
                } else {
                    PollOutcome::NotTracked
                }
            }
        }
    }

    /// Freeze final content, clear the pointer, and reload the session.
    pub fn finish(&self, run_id: &str, result: RunResult) -> Option<FinalRun> {
        let mut state = self.lock_runs().remove(run_id)?;
        state.transition(RunPhase::Finishing);

        let content = RenderedContent::finished(
            &state,
            result.exit_code,
            result.saved_message.as_ref(),
            state.elapsed(now_ms()),
        );
        let status = if content.kind == ContentKind::Failed {
            SessionStatus::error(STATUS_FAILED)
        } else {
            SessionStatus::info(STATUS_IDLE)
        };
        tracing::info!(
            run_id,
            session_id = %state.session_id,
            exit_code = ?result.exit_code,
            failed = content.kind == ContentKind::Failed,
            "run finished"
        );

        Some(self.clear_run(state, content, status))
    }

    /// Ask the server to stop the session's run.
    ///
    /// With no run id yet, the pending send is cancelled instead.
    pub async fn stop(&self, session_id: &str) -> Result<StopOutcome, ReconcileError> {
        let run_id = {
            let mut runs = self.lock_runs();
            match runs
                .values_mut()
                .find(|state| state.session_id == session_id)
            {
                None => None,
                Some(state) if state.phase == RunPhase::Stopping => {
                    return Err(ReconcileError::StopInProgress {
                        run_id: state.run_id.clone(),
                    });
                }
                Some(state) => {
                    if !state.transition(RunPhase::Stopping) {
                        return Err(ReconcileError::NoActiveRun {
                            session_id: session_id.to_string(),
                        });
                    }
                    Some(state.run_id.clone())
                }
            }
        };

        let Some(run_id) = run_id else {
            if self.cancel_send(session_id) {
                return Ok(StopOutcome::SendCancelled);
            }
            return Err(ReconcileError::NoActiveRun {
                session_id: session_id.to_string(),
            });
        };

        self.activity
            .set_status(session_id, SessionStatus::info(STATUS_STOPPING));

        match self.transport.stop_run(&run_id).await {
            Ok(_) => {
                let Some(mut state) = self.lock_runs().remove(&run_id) else {
                    return Ok(StopOutcome::AlreadyFinished);
                };
                state.transition(RunPhase::Finishing);
                let content = RenderedContent::stopped(&state, state.elapsed(now_ms()));
                tracing::info!(run_id = %run_id, session_id, "run stopped");
                Ok(StopOutcome::Stopped(self.clear_run(
                    state,
                    content,
                    SessionStatus::info(STATUS_STOPPED),
                )))
            }
            Err(error) if error.is_not_found() => {
                if self.reconcile_gone(&run_id) {
                    Ok(StopOutcome::Gone)
                } else {
                    Ok(StopOutcome::AlreadyFinished)
                }
            }
            Err(error) => {
                if let Some(state) = self.lock_runs().get_mut(&run_id) {
                    let back = if state.consecutive_failures > 0 {
                        RunPhase::BackoffWait
                    } else {
                        RunPhase::Polling
                    };
                    state.transition(back);
                }
                tracing::warn!(run_id = %run_id, session_id, error = %error, "stop request failed");
                self.activity.set_status(
                    session_id,
                    SessionStatus::error(format!("Failed to stop run: {error}")),
                );
                Err(ReconcileError::Transport(error))
            }
        }
    }

    /// Reattach to a run recorded before a reload.
    pub async fn resume(self: &Arc<Self>, pointer: DurablePointer) -> ResumeOutcome {
        let DurablePointer {
            run_id,
            session_id,
            started_at_ms,
        } = pointer;

        if let Some(existing) = self.run_for_session(&session_id) {
            if existing.run_id == run_id {
                return ResumeOutcome::AlreadyTracked;
            }
            tracing::info!(
                run_id = %run_id,
                session_id = %session_id,
                attached = %existing.run_id,
                "dropping duplicate pointer for attached session"
            );
            self.clear_pointer(&run_id);
            return ResumeOutcome::Dropped;
        }

        self.activity
            .set_status(&session_id, SessionStatus::info(STATUS_RECONNECTING));

        let mut state = RunState::new(
            &run_id,
            &session_id,
            started_at_ms,
            self.config.backoff.base,
        );

        let (phase, delay, outcome) = match self.transport.poll_run(&run_id, 0, 0).await {
            Ok(chunk) if chunk.done => {
                tracing::info!(run_id = %run_id, session_id = %session_id, "resumed run had already finished");
                self.clear_pointer(&run_id);
                self.activity
                    .set_status(&session_id, SessionStatus::info(STATUS_IDLE));
                self.host.reload_session(&session_id);
                return ResumeOutcome::AlreadyFinished;
            }
            Err(error) if error.is_not_found() => {
                tracing::info!(run_id = %run_id, session_id = %session_id, "resumed run is unknown to server");
                self.clear_pointer(&run_id);
                self.activity
                    .set_status(&session_id, SessionStatus::info(STATUS_IDLE));
                self.host.reload_session(&session_id);
                return ResumeOutcome::Gone;
            }
            Err(error) if !error.is_transient() => {
                tracing::warn!(run_id = %run_id, session_id = %session_id, error = %error, "resume fetch failed permanently");
                self.clear_pointer(&run_id);
                self.activity
                    .set_status(&session_id, SessionStatus::error(error.to_string()));
                self.host.reload_session(&session_id);
                return ResumeOutcome::Abandoned;
            }
            Ok(chunk) => {
                state.apply_chunk(&chunk);
                (
                    RunPhase::Polling,
                    self.config.backoff.base,
                    ResumeOutcome::Resumed,
                )
            }
            Err(error) => {
                state.consecutive_failures = 1;
                state.next_poll_delay = self.config.backoff.delay(1);
                tracing::warn!(
                    run_id = %run_id,
                    session_id = %session_id,
                    error = %error,
                    delay_ms = state.next_poll_delay.as_millis() as u64,
                    "resume fetch failed; retrying"
                );
                (
                    RunPhase::BackoffWait,
                    state.next_poll_delay,
                    ResumeOutcome::ResumedWithBackoff,
                )
            }
        };

        let has_content = !state.output.is_empty() || !state.error.is_empty();
        if self.install(state).is_err() {
            self.clear_pointer(&run_id);
            return ResumeOutcome::Dropped;
        }

        self.attach(&run_id, phase, has_content);

        let status = if phase == RunPhase::BackoffWait {
            SessionStatus::transient(STATUS_RETRYING)
        } else {
            SessionStatus::info(STATUS_RECEIVING)
        };
        self.activity.set_status(&session_id, status);
        tracing::info!(run_id = %run_id, session_id = %session_id, "run resumed");

        self.spawn_driver(run_id, delay);
        outcome
    }

    /// Resume every stored pointer whose session still exists.
    pub async fn resume_all(self: &Arc<Self>) -> Vec<(String, ResumeOutcome)> {
        let pointers = match self.pointers.list() {
            Ok(pointers) => pointers,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read stored run pointers");
                return Vec::new();
            }
        };
        if pointers.is_empty() {
            return Vec::new();
        }

        let known_sessions = match self.transport.list_sessions().await {
            Ok(sessions) => Some(
                sessions
                    .into_iter()
                    .map(|session| session.id)
                    .collect::<HashSet<_>>(),
            ),
            Err(error) => {
                tracing::warn!(error = %error, "session listing failed; resuming all pointers");
                None
            }
        };

        let mut outcomes = Vec::new();
        let mut claimed_sessions = HashSet::new();
        let mut to_resume = Vec::new();
        for pointer in pointers {
            let unknown = known_sessions
                .as_ref()
                .is_some_and(|known| !known.contains(&pointer.session_id));
            if unknown || !claimed_sessions.insert(pointer.session_id.clone()) {
                tracing::info!(
                    run_id = %pointer.run_id,
                    session_id = %pointer.session_id,
                    unknown_session = unknown,
                    "dropping stored run pointer"
                );
                self.clear_pointer(&pointer.run_id);
                outcomes.push((pointer.run_id, ResumeOutcome::Dropped));
                continue;
            }
            to_resume.push(pointer);
        }

        let resumed = join_all(to_resume.into_iter().map(|pointer| {
            let run_id = pointer.run_id.clone();
            async move { (run_id, self.resume(pointer).await) }
        }))
        .await;
        outcomes.extend(resumed);
        outcomes
    }

    /// Submit a prompt and start tracking the resulting run.
    pub async fn send(
        self: &Arc<Self>,
        session_id: &str,
        prompt: &str,
    ) -> Result<SendOutcome, ReconcileError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ReconcileError::EmptyPrompt);
        }
        let length = prompt.chars().count();
        if length > self.config.max_prompt_chars {
            return Err(ReconcileError::PromptTooLong {
                length,
                limit: self.config.max_prompt_chars,
            });
        }
        if let Some(existing) = self.run_for_session(session_id) {
            return Err(ReconcileError::RunAlreadyAttached {
                session_id: session_id.to_string(),
                run_id: existing.run_id,
            });
        }
        let Some(cancellation) = self.activity.begin_send(session_id) else {
            return Err(ReconcileError::SendInProgress {
                session_id: session_id.to_string(),
            });
        };

        let started_at_ms = now_ms();
        let result = self
            .transport
            .start_run(session_id, prompt, Some(&cancellation))
            .await;

        match result {
            Ok(started) => {
                let submission = PromptSubmission {
                    run_id: started.stream_id,
                    user_message: started.user_message,
                    started_at_ms,
                };
                let state = self.start(session_id, submission);
                self.activity.end_send(session_id);
                Ok(SendOutcome::Started(state?))
            }
            Err(error) if error.is_cancelled() => {
                self.activity.end_send(session_id);
                self.activity
                    .set_status(session_id, SessionStatus::info(STATUS_CANCELLED));
                tracing::info!(session_id, "pending send cancelled");
                Err(ReconcileError::SendCancelled {
                    session_id: session_id.to_string(),
                })
            }
            Err(RunsApiError::AlreadyRunning {
                active_stream_id: Some(run_id),
                ..
            }) => {
                self.activity.end_send(session_id);
                tracing::info!(run_id = %run_id, session_id, "session already running; following existing run");
                let pointer = DurablePointer::new(&run_id, session_id, started_at_ms);
                self.persist_pointer(pointer.clone());
                let outcome = self.resume(pointer).await;
                Ok(SendOutcome::AttachedExisting { run_id, outcome })
            }
            Err(error) => {
                self.activity.end_send(session_id);
                tracing::warn!(session_id, error = %error, "start request failed");
                self.activity
                    .set_status(session_id, SessionStatus::error(error.to_string()));
                Err(ReconcileError::Transport(error))
            }
        }
    }

    /// Raise the cancel signal of a send that has no run id yet.
    pub fn cancel_send(&self, session_id: &str) -> bool {
        self.activity.cancel_pending_send(session_id)
    }

    fn apply_poll_success(&self, run_id: &str, chunk: RunChunk) -> PollOutcome {
        let (session_id, view, content, recovered, next_delay) = {
            let mut runs = self.lock_runs();
            let Some(state) = runs.get_mut(run_id) else {
                return PollOutcome::NotTracked;
            };
            state.poll_in_flight = false;
            let arrived = state.apply_chunk(&chunk);
            let recovered = state.consecutive_failures > 0;
            state.consecutive_failures = 0;
            state.next_poll_delay = self.config.backoff.delay(0);
            if state.phase != RunPhase::Stopping {
                state.transition(RunPhase::Polling);
            }
            (
                state.session_id.clone(),
                state.attached_view,
                arrived.then(|| state.live_content()),
                recovered,
                state.next_poll_delay,
            )
        };

        if let Some(text) = content {
            if let Some(view) = view {
                self.host
                    .render_view(view, &RenderedContent::streaming(text));
            }
            self.activity
                .set_status(&session_id, SessionStatus::info(STATUS_RECEIVING));
        } else if recovered {
            self.activity
                .set_status(&session_id, SessionStatus::info(STATUS_RECEIVING));
        }

        if chunk.done {
            self.finish(run_id, RunResult::from(&chunk));
            return PollOutcome::Finished;
        }

        PollOutcome::Pending { next_delay }
    }

    fn apply_poll_failure(&self, run_id: &str, error: &RunsApiError) -> PollOutcome {
        let (session_id, failures, next_delay) = {
            let mut runs = self.lock_runs();
            let Some(state) = runs.get_mut(run_id) else {
                return PollOutcome::NotTracked;
            };
            state.poll_in_flight = false;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.next_poll_delay = self.config.backoff.delay(state.consecutive_failures);
            if state.phase != RunPhase::Stopping {
                state.transition(RunPhase::BackoffWait);
            }
            (
                state.session_id.clone(),
                state.consecutive_failures,
                state.next_poll_delay,
            )
        };

        tracing::warn!(
            run_id,
            session_id = %session_id,
            attempt = failures,
            delay_ms = next_delay.as_millis() as u64,
            error = %error,
            "poll failed; backing off"
        );
        self.activity
            .set_status(&session_id, SessionStatus::transient(STATUS_RETRYING));
        PollOutcome::Pending { next_delay }
    }

    /// The server forgot the run: clear everything and reload, never flag an
    /// error. Returns `false` if another path already cleared it.
    fn reconcile_gone(&self, run_id: &str) -> bool {
        let Some(mut state) = self.lock_runs().remove(run_id) else {
            return false;
        };
        state.transition(RunPhase::Cleared);
        tracing::info!(run_id, session_id = %state.session_id, "run unknown to server; reloading session");

        self.clear_pointer(run_id);
        self.activity.detach_run(&state.session_id, run_id);
        self.activity
            .set_status(&state.session_id, SessionStatus::info(STATUS_IDLE));
        self.host.reload_session(&state.session_id);
        true
    }

    /// A non-retryable poll failure: stop tracking and fall back to a reload.
    fn abandon(&self, run_id: &str, error: &RunsApiError) -> bool {
        let Some(mut state) = self.lock_runs().remove(run_id) else {
            return false;
        };
        state.transition(RunPhase::Cleared);
        tracing::warn!(run_id, session_id = %state.session_id, error = %error, "poll failed permanently");

        self.clear_pointer(run_id);
        self.activity.detach_run(&state.session_id, run_id);
        self.activity
            .set_status(&state.session_id, SessionStatus::error(error.to_string()));
        self.host.reload_session(&state.session_id);
        true
    }

    fn clear_run(
        &self,
        mut state: RunState,
        content: RenderedContent,
        status: SessionStatus,
    ) -> FinalRun {
        state.transition(RunPhase::Cleared);
        if let Some(view) = state.attached_view {
            self.host.render_view(view, &content);
        }
        self.clear_pointer(&state.run_id);
        self.activity.detach_run(&state.session_id, &state.run_id);
        self.activity.set_status(&state.session_id, status);
        self.host.reload_session(&state.session_id);

        FinalRun {
            run_id: state.run_id,
            session_id: state.session_id,
            content,
        }
    }

    /// Insert a fresh state unless the session or run is already tracked.
    fn install(&self, state: RunState) -> Result<(), ReconcileError> {
        let mut runs = self.lock_runs();
        if let Some(existing) = runs
            .values()
            .find(|existing| existing.session_id == state.session_id)
            .or_else(|| runs.get(&state.run_id))
        {
            return Err(ReconcileError::RunAlreadyAttached {
                session_id: existing.session_id.clone(),
                run_id: existing.run_id.clone(),
            });
        }
        runs.insert(state.run_id.clone(), state);
        Ok(())
    }

    /// Create the host view, record it, and mark the session as streaming.
    fn attach(&self, run_id: &str, phase: RunPhase, render_now: bool) -> Option<RunState> {
        let session_id = self.lock_runs().get(run_id)?.session_id.clone();
        let view = self.host.attach_view(&session_id, run_id);

        let snapshot = {
            let mut runs = self.lock_runs();
            let state = runs.get_mut(run_id)?;
            state.attached_view = Some(view);
            state.transition(phase);
            state.clone()
        };

        self.activity.attach_run(&session_id, run_id);
        if render_now {
            self.host
                .render_view(view, &RenderedContent::streaming(snapshot.live_content()));
        }
        Some(snapshot)
    }

    fn spawn_driver(self: &Arc<Self>, run_id: String, initial_delay: Duration) {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move { reconciler.drive(run_id, initial_delay).await });
    }

    async fn drive(self: Arc<Self>, run_id: String, initial_delay: Duration) {
        let mut delay = initial_delay;
        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            delay = match self.poll(&run_id).await {
                PollOutcome::Pending { next_delay } | PollOutcome::Stopping { next_delay } => {
                    next_delay
                }
                PollOutcome::AlreadyInFlight => self.config.backoff.base,
                PollOutcome::NotTracked
                | PollOutcome::Finished
                | PollOutcome::Gone
                | PollOutcome::Abandoned => break,
            };
        }
        tracing::debug!(run_id = %run_id, "poll driver exited");
    }

    fn persist_pointer(&self, pointer: DurablePointer) {
        let run_id = pointer.run_id.clone();
        if let Err(error) = self.pointers.upsert(pointer) {
            tracing::warn!(run_id = %run_id, error = %error, "failed to persist run pointer");
        }
    }

    fn clear_pointer(&self, run_id: &str) {
        if let Err(error) = self.pointers.remove(run_id) {
            tracing::warn!(run_id, error = %error, "failed to clear run pointer");
        }
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<String, RunState>> {
        lock_unpoisoned(&self.runs)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
