use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqm_status::{EventType, QueueStatus, Role};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All errors a [`QueueStore`] implementation can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The row lock could not be acquired within the configured bound.
    #[error("timed out waiting for row lock on queue entity {entity_id}")]
    LockTimeout { entity_id: Uuid },

    /// A write targeted a row that does not exist.
    #[error("queue entity not found: {0}")]
    EntityNotFound(Uuid),

    /// A persisted row could not be decoded into its record type.
    #[error("undecodable row: {0}")]
    Decode(String),

    /// A backend-specific failure that is not a driver error.
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A queue entity exactly as stored. `status` is the raw persisted string
/// and may hold a legacy value; hydrate through the normalizer before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntityRow {
    pub id: Uuid,
    pub token_number: i32,
    pub status: String,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The write half of a transition, applied under the row lock.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub entity_id: Uuid,
    pub status: QueueStatus,
    /// `Some` overwrites `processing_started_at`; `None` leaves it untouched.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// `Some` overwrites `processing_ended_at`; `None` leaves it untouched.
    pub processing_ended_at: Option<DateTime<Utc>>,
    /// Appended as a new line to `remarks`.
    pub remark: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the append-only transition ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEventRecord {
    pub event_id: Uuid,
    pub entity_id: Uuid,
    pub previous_status: QueueStatus,
    pub new_status: QueueStatus,
    pub actor_id: String,
    /// `None` for trusted internal callers.
    pub actor_role: Option<Role>,
    pub event_type: EventType,
    pub processing_start_at: Option<DateTime<Utc>>,
    pub processing_end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Processing-duration aggregate for one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub day: NaiveDate,
    pub sample_count: i64,
    pub total_ms: i64,
    pub min_ms: i64,
    pub max_ms: i64,
}

impl ProcessingStats {
    pub fn first(day: NaiveDate, duration_ms: i64) -> Self {
        Self {
            day,
            sample_count: 1,
            total_ms: duration_ms,
            min_ms: duration_ms,
            max_ms: duration_ms,
        }
    }

    pub fn absorb(&mut self, duration_ms: i64) {
        self.sample_count += 1;
        self.total_ms += duration_ms;
        self.min_ms = self.min_ms.min(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
    }

    pub fn avg_ms(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.total_ms as f64 / self.sample_count as f64
    }
}

/// Append `remark` to an existing remarks column, one annotation per line.
pub fn append_remark(existing: Option<&str>, remark: &str) -> String {
    match existing {
        Some(prev) if !prev.is_empty() => format!("{prev}\n{remark}"),
        _ => remark.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Transactional storage for queue entities and their ledger.
///
/// ## Transaction lifecycle
///
/// 1. `begin()` opens a transaction and returns a `Tx`
/// 2. `lock_entity` selects the row with a row-level lock held until the
///    transaction ends; concurrent lockers of the same row wait
/// 3. `update_status` / `insert_event` write inside the transaction
/// 4. `commit(tx)` makes the writes visible, or `rollback(tx)` discards them
///
/// Dropping a `Tx` without committing MUST roll back and release the lock.
///
/// Methods outside the lifecycle (`fetch_entity`, `list_events`, ...) read
/// committed state and never wait on row locks.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    type Tx: Send;

    // ── Transaction lifecycle ───────────────────────────────────────────────

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    // ── Within a transaction ────────────────────────────────────────────────

    /// `SELECT ... FOR UPDATE`. `Ok(None)` when the entity does not exist.
    async fn lock_entity(
        &self,
        tx: &mut Self::Tx,
        entity_id: Uuid,
    ) -> Result<Option<QueueEntityRow>, StoreError>;

    /// Apply a status change to a row previously locked in `tx`.
    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        update: &StatusUpdate,
    ) -> Result<QueueEntityRow, StoreError>;

    /// Append one ledger row. Must share `tx` with the matching
    /// `update_status` so the two commit or vanish together.
    async fn insert_event(
        &self,
        tx: &mut Self::Tx,
        event: &QueueEventRecord,
    ) -> Result<(), StoreError>;

    // ── Committed-state operations ──────────────────────────────────────────

    /// Insert a new entity at `waiting`.
    async fn create_entity(&self, token_number: i32) -> Result<QueueEntityRow, StoreError>;

    async fn fetch_entity(&self, entity_id: Uuid) -> Result<Option<QueueEntityRow>, StoreError>;

    /// Ledger rows for one entity, oldest first.
    async fn list_events(&self, entity_id: Uuid) -> Result<Vec<QueueEventRecord>, StoreError>;

    /// Fold one duration sample into the day's aggregate and return it.
    async fn record_processing_sample(
        &self,
        day: NaiveDate,
        duration_ms: i64,
    ) -> Result<ProcessingStats, StoreError>;

    async fn processing_stats(&self, day: NaiveDate)
        -> Result<Option<ProcessingStats>, StoreError>;
}
