//! Processing-window timestamps and duration statistics.
//!
//! The executor stamps the window inside the transaction. Aggregation runs
//! after commit on a background worker fed through a bounded queue; a full
//! queue or a failing store degrades reporting and nothing else.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqm_db::{ProcessingStats, QueueStore, StoreError};
use sqm_status::QueueStatus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::entity::CommittedTransition;

// ---------------------------------------------------------------------------
// Window stamping
// ---------------------------------------------------------------------------

/// Timestamps a transition writes. `None` leaves the stored value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStamp {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Entering `processing` stamps the start; leaving it stamps the end.
pub fn stamp_processing_window(
    from: QueueStatus,
    to: QueueStatus,
    now: DateTime<Utc>,
) -> WindowStamp {
    WindowStamp {
        started_at: (to == QueueStatus::Processing && from != QueueStatus::Processing)
            .then_some(now),
        ended_at: (from == QueueStatus::Processing && to != QueueStatus::Processing)
            .then_some(now),
    }
}

/// The `(day, duration_ms)` sample a committed transition contributes, if
/// any. Only served entries (`processing → completed`) with a complete,
/// non-negative window count; the day is the UTC date of the end stamp.
pub fn duration_sample(t: &CommittedTransition) -> Option<(NaiveDate, i64)> {
    if t.event.previous_status != QueueStatus::Processing
        || t.event.new_status != QueueStatus::Completed
    {
        return None;
    }
    let start = t.entity.processing_started_at?;
    let end = t.entity.processing_ended_at?;
    let ms = (end - start).num_milliseconds();
    if ms < 0 {
        return None;
    }
    Some((end.date_naive(), ms))
}

// ---------------------------------------------------------------------------
// Recorder + worker
// ---------------------------------------------------------------------------

pub struct AnalyticsRecorder<S: QueueStore> {
    store: Arc<S>,
}

impl<S: QueueStore> AnalyticsRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fold one committed transition into the statistics. `Ok(None)` when
    /// the transition carries no sample.
    pub async fn record(
        &self,
        t: &CommittedTransition,
    ) -> Result<Option<ProcessingStats>, StoreError> {
        let Some((day, ms)) = duration_sample(t) else {
            return Ok(None);
        };
        let stats = self.store.record_processing_sample(day, ms).await?;
        debug!(entity_id = %t.entity.id, %day, duration_ms = ms, "processing sample recorded");
        Ok(Some(stats))
    }
}

/// Sending half of the analytics queue. Cloneable; the worker stops once
/// every handle is dropped and the queue drains.
#[derive(Clone)]
pub struct AnalyticsHandle {
    tx: mpsc::Sender<CommittedTransition>,
}

impl AnalyticsHandle {
    /// Enqueue without waiting. Returns `false` when the sample was dropped.
    pub fn submit(&self, t: CommittedTransition) -> bool {
        match self.tx.try_send(t) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(t)) => {
                warn!(entity_id = %t.entity.id, "analytics queue full; sample dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(t)) => {
                warn!(entity_id = %t.entity.id, "analytics worker stopped; sample dropped");
                false
            }
        }
    }
}

/// Spawn the analytics worker on the current runtime.
pub fn spawn_worker<S: QueueStore>(
    recorder: AnalyticsRecorder<S>,
    capacity: usize,
) -> (AnalyticsHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<CommittedTransition>(capacity.max(1));
    let join = tokio::spawn(async move {
        while let Some(t) = rx.recv().await {
            if let Err(err) = recorder.record(&t).await {
                warn!(entity_id = %t.entity.id, error = %err, "processing stats update failed");
            }
        }
    });
    (AnalyticsHandle { tx }, join)
}
