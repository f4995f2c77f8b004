//! Test doubles for the queue engine: an in-memory store and publishers that
//! record or fail on demand.

use std::sync::{Arc, Mutex};

use sqm_engine::{EngineOptions, EventPublisher, PublishError, StatusEngine, TransitionNotice};

pub mod mem_store;

pub use mem_store::{MemQueueStore, MemTx};

/// Keeps every notice it is handed.
#[derive(Default)]
pub struct RecordingPublisher {
    notices: Mutex<Vec<TransitionNotice>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<TransitionNotice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, notice: &TransitionNotice) -> Result<(), PublishError> {
        self.notices
            .lock()
            .map_err(|_| PublishError::Poisoned)?
            .push(notice.clone());
        Ok(())
    }
}

/// Rejects every notice.
pub struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish(&self, _notice: &TransitionNotice) -> Result<(), PublishError> {
        Err(PublishError::Failed("subscriber transport down".to_string()))
    }
}

/// Engine over a fresh in-memory store with a recording publisher.
pub fn mem_engine(
    opts: EngineOptions,
) -> (
    StatusEngine<MemQueueStore>,
    Arc<MemQueueStore>,
    Arc<RecordingPublisher>,
) {
    let store = Arc::new(MemQueueStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let engine = StatusEngine::new(store.clone(), publisher.clone(), opts);
    (engine, store, publisher)
}
