use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqm_db::{QueueEntityRow, QueueEventRecord};
use sqm_status::{check_transition, is_legal_transition, normalize, QueueStatus, Role, Verdict};
use uuid::Uuid;

/// A queue entity with its status hydrated into the vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntity {
    pub id: Uuid,
    pub token_number: i32,
    pub status: QueueStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntity {
    /// Hydrate a stored row. Legacy status values normalize to `waiting`.
    pub fn from_row(row: QueueEntityRow) -> Self {
        let status = normalize(Some(row.status.as_str())).status;
        Self {
            id: row.id,
            token_number: row.token_number,
            status,
            processing_started_at: row.processing_started_at,
            processing_ended_at: row.processing_ended_at,
            remarks: row.remarks,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// What a caller claims to be allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorRole {
    /// Trusted internal caller. Graph rules apply; role rules do not.
    System,
    Staff(Role),
    /// An authenticated role name the permission matrix does not know.
    /// Holds no grants.
    Unrecognized(String),
}

impl ActorRole {
    /// Resolve a role claim from an authenticated session.
    pub fn from_claim(raw: &str) -> Self {
        match Role::parse(raw) {
            Some(r) => ActorRole::Staff(r),
            None => ActorRole::Unrecognized(raw.trim().to_string()),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            ActorRole::Staff(r) => Some(*r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::System,
        }
    }

    pub fn staff(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Staff(role),
        }
    }

    pub fn from_claim(id: impl Into<String>, role: &str) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::from_claim(role),
        }
    }

    /// Graph first, then role.
    pub fn verdict(&self, from: QueueStatus, to: QueueStatus) -> Verdict {
        match &self.role {
            ActorRole::System => check_transition(None, from, to),
            ActorRole::Staff(r) => check_transition(Some(*r), from, to),
            ActorRole::Unrecognized(_) if is_legal_transition(from, to) => Verdict::Denied,
            ActorRole::Unrecognized(_) => Verdict::Illegal,
        }
    }
}

/// A transition that has been committed, with the ledger row written for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedTransition {
    pub entity: QueueEntity,
    pub event: QueueEventRecord,
}
