use std::sync::Arc;

use pointer_store::{JsonFilePointerStore, MemoryPointerStore, PointerStore};
use runs_api::RunsApiClient;
use tokio::task::JoinHandle;

use crate::activity::ActivityProjector;
use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::host::{ObserverSink, SessionHost};
use crate::reconciler::{Reconciler, ReconcilerConfig, ResumeOutcome};
use crate::remote::{RemoteMonitor, RemoteMonitorConfig};
use crate::transport::RunsTransport;

/// The reconciler, remote monitor, and projector wired to one transport.
pub struct StreamEngine {
    pub activity: Arc<ActivityProjector>,
    pub reconciler: Arc<Reconciler>,
    pub monitor: Arc<RemoteMonitor>,
}

impl StreamEngine {
    pub fn new(
        config: &EngineConfig,
        transport: Arc<dyn RunsTransport>,
        pointers: Arc<dyn PointerStore>,
        host: Arc<dyn SessionHost>,
        observer: Arc<dyn ObserverSink>,
    ) -> Self {
        let activity = Arc::new(ActivityProjector::new());
        let reconciler = Reconciler::new(
            Arc::clone(&transport),
            pointers,
            host,
            Arc::clone(&activity),
            ReconcilerConfig {
                backoff: config.backoff,
                max_prompt_chars: config.max_prompt_chars,
            },
        );
        let monitor = RemoteMonitor::new(
            transport,
            Arc::clone(&activity),
            observer,
            RemoteMonitorConfig {
                interval: config.remote_interval,
                freshness: config.remote_freshness,
                backoff: config.backoff,
            },
        );

        Self {
            activity,
            reconciler,
            monitor,
        }
    }

    /// Build the HTTP transport and pointer file named by `config`.
    ///
    /// Without a pointer path, pointers live in memory and do not survive a
    /// restart.
    pub fn from_config(
        config: &EngineConfig,
        host: Arc<dyn SessionHost>,
        observer: Arc<dyn ObserverSink>,
    ) -> Result<Self, ReconcileError> {
        let transport: Arc<dyn RunsTransport> =
            Arc::new(RunsApiClient::new(config.runs_api_config())?);
        let pointers: Arc<dyn PointerStore> = match &config.pointer_path {
            Some(path) => Arc::new(JsonFilePointerStore::new(path)),
            None => {
                tracing::warn!("no pointer path configured; runs will not survive a restart");
                Arc::new(MemoryPointerStore::new())
            }
        };
        Ok(Self::new(config, transport, pointers, host, observer))
    }

    /// Start the remote listing loop and resume every stored pointer.
    pub async fn boot(&self) -> (JoinHandle<()>, Vec<(String, ResumeOutcome)>) {
        let monitor = self.monitor.spawn();
        let resumed = self.reconciler.resume_all().await;
        tracing::info!(resumed = resumed.len(), "engine booted");
        (monitor, resumed)
    }
}
