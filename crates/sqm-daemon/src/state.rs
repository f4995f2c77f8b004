//! Shared runtime state for sqm-daemon.
//!
//! Handlers receive `State<Arc<AppState<S>>>` from Axum. The state is
//! generic over the store so tests can run the real router on the in-memory
//! store.

use std::sync::Arc;

use anyhow::Context;

use serde::{Deserialize, Serialize};
use sqm_config::QueueConfig;
use sqm_db::QueueStore;
use sqm_engine::{spawn_worker, AnalyticsRecorder, BroadcastPublisher, EngineOptions, StatusEngine};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState<S: QueueStore> {
    pub engine: Arc<StatusEngine<S>>,
    /// Same publisher the engine holds, kept concrete for SSE subscriptions.
    pub publisher: Arc<BroadcastPublisher>,
    pub build: BuildInfo,
}

impl<S: QueueStore> AppState<S> {
    /// Wire engine, publisher and analytics worker from config. Must run
    /// inside a Tokio runtime; the returned handle is the analytics worker.
    pub fn from_config(store: Arc<S>, cfg: &QueueConfig) -> (Self, JoinHandle<()>) {
        let publisher = Arc::new(BroadcastPublisher::new(
            cfg.publisher.room.clone(),
            cfg.publisher.room_capacity,
            cfg.publisher.audit_capacity,
        ));

        let (analytics, worker) = spawn_worker(
            AnalyticsRecorder::new(store.clone()),
            cfg.analytics.queue_capacity,
        );

        let opts = EngineOptions {
            lock_timeout: cfg.lock_timeout(),
            silent_processing_edges: cfg.publisher.silent_processing_edges,
        };
        let engine = StatusEngine::new(store, publisher.clone(), opts).with_analytics(analytics);

        let state = Self {
            engine: Arc::new(engine),
            publisher,
            build: BuildInfo {
                service: "sqm-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        };
        (state, worker)
    }
}

/// Release the last handle on the engine and wait for the analytics worker
/// to finish the samples already queued. Call after the server has stopped.
pub async fn drain_analytics<S: QueueStore>(
    state: Arc<AppState<S>>,
    worker: JoinHandle<()>,
) -> anyhow::Result<()> {
    drop(state);
    worker.await.context("analytics worker panicked")
}
