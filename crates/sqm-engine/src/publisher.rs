//! Post-commit change notification.
//!
//! The engine holds an injected [`EventPublisher`]; there is no process-wide
//! emitter. [`BroadcastPublisher`] fans each notice out to its configured room
//! and to the audit stream. Subscribers that lag or reconnect refetch current state;
//! nothing here is replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqm_status::{EventType, QueueStatus};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::entity::CommittedTransition;
use crate::error::PublishError;

/// What dashboards and the audit stream receive for one committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionNotice {
    pub event_id: Uuid,
    pub entity_id: Uuid,
    pub token_number: i32,
    pub previous_status: QueueStatus,
    pub new_status: QueueStatus,
    pub event_type: EventType,
    pub actor_id: String,
    /// Suppress the audible alert on dashboards.
    pub silent: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionNotice {
    pub fn from_committed(t: &CommittedTransition, silent_processing_edges: bool) -> Self {
        let from = t.event.previous_status;
        let to = t.event.new_status;
        Self {
            event_id: t.event.event_id,
            entity_id: t.entity.id,
            token_number: t.entity.token_number,
            previous_status: from,
            new_status: to,
            event_type: t.event.event_type,
            actor_id: t.event.actor_id.clone(),
            silent: silent_processing_edges && is_processing_edge(from, to),
            processing_started_at: t.entity.processing_started_at,
            processing_ended_at: t.entity.processing_ended_at,
            occurred_at: t.event.created_at,
        }
    }
}

/// Entry into or exit from `processing`.
pub fn is_processing_edge(from: QueueStatus, to: QueueStatus) -> bool {
    from == QueueStatus::Processing || to == QueueStatus::Processing
}

/// Fire-and-forget sink for committed transitions. Implementations must not
/// block; the caller has already committed and only logs failures.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, notice: &TransitionNotice) -> Result<(), PublishError>;
}

// ---------------------------------------------------------------------------
// Broadcast implementation
// ---------------------------------------------------------------------------

pub struct BroadcastPublisher {
    room: String,
    room_tx: broadcast::Sender<TransitionNotice>,
    audit: broadcast::Sender<TransitionNotice>,
}

impl BroadcastPublisher {
    pub fn new(room: impl Into<String>, room_capacity: usize, audit_capacity: usize) -> Self {
        let (room_tx, _rx) = broadcast::channel(room_capacity.max(1));
        let (audit, _rx) = broadcast::channel(audit_capacity.max(1));
        Self {
            room: room.into(),
            room_tx,
            audit,
        }
    }

    /// The room every notice is published to.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Subscribe to the configured room. Any other name is refused; no
    /// channel is created for it.
    pub fn subscribe_room(
        &self,
        room: &str,
    ) -> Result<broadcast::Receiver<TransitionNotice>, PublishError> {
        if room != self.room {
            return Err(PublishError::UnknownRoom(room.to_string()));
        }
        Ok(self.room_tx.subscribe())
    }

    pub fn subscribe_audit(&self) -> broadcast::Receiver<TransitionNotice> {
        self.audit.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, notice: &TransitionNotice) -> Result<(), PublishError> {
        // SendError only means nobody is listening right now.
        let _ = self.room_tx.send(notice.clone());
        let _ = self.audit.send(notice.clone());
        Ok(())
    }
}
