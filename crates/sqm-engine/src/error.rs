use sqm_db::StoreError;
use sqm_status::QueueStatus;
use uuid::Uuid;

/// Failure of a status change. The `Display` strings are stable and safe to
/// show to callers; the fields carry detail for logs only.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Queue entry not found")]
    NotFound { entity_id: Uuid },

    /// The requested target is not a vocabulary member, or the pair is not
    /// an edge of the transition graph.
    #[error("Invalid status transition")]
    InvalidTransition { from: QueueStatus, requested: String },

    /// A legal edge the actor's role is not granted.
    #[error("Access denied")]
    AccessDenied { from: QueueStatus, to: QueueStatus },

    /// Storage failed before commit. Nothing was written; safe to retry.
    #[error("Persistence failure")]
    Persistence(#[from] StoreError),
}

impl TransitionError {
    /// Machine-readable code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::NotFound { .. } => "not_found",
            TransitionError::InvalidTransition { .. } => "invalid_transition",
            TransitionError::AccessDenied { .. } => "access_denied",
            TransitionError::Persistence(_) => "persistence_failure",
        }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(
            self,
            TransitionError::Persistence(StoreError::LockTimeout { .. })
        )
    }
}

/// Failure to hand a notice to subscribers.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publisher state poisoned")]
    Poisoned,

    #[error("publish failed: {0}")]
    Failed(String),

    #[error("unknown room: {0:?}")]
    UnknownRoom(String),
}
