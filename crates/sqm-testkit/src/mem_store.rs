//! In-memory [`QueueStore`] with real row-lock semantics.
//!
//! Each entity has its own async mutex standing in for the row lock. A
//! transaction stages its writes privately and publishes them on commit;
//! dropping or rolling back a [`MemTx`] discards the stage and releases every
//! lock it holds. Reads outside a transaction see committed state only and
//! never wait on a lock.
//!
//! Fault switches let scenarios fail individual steps on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqm_db::{
    append_remark, ProcessingStats, QueueEntityRow, QueueEventRecord, QueueStore, StatusUpdate,
    StoreError,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Committed {
    entities: HashMap<Uuid, QueueEntityRow>,
    events: Vec<QueueEventRecord>,
    stats: HashMap<NaiveDate, ProcessingStats>,
}

#[derive(Default)]
struct Faults {
    update: AtomicBool,
    event_insert: AtomicBool,
    commit: AtomicBool,
    stats: AtomicBool,
    /// Pause inside `update_status`, in milliseconds, to widen race windows.
    write_delay_ms: AtomicU64,
}

#[derive(Default)]
pub struct MemQueueStore {
    committed: Mutex<Committed>,
    row_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    faults: Faults,
}

/// Transaction handle for [`MemQueueStore`].
#[derive(Default)]
pub struct MemTx {
    staged: HashMap<Uuid, QueueEntityRow>,
    events: Vec<QueueEventRecord>,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
}

impl MemQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding and inspection ──────────────────────────────────────────────

    /// Insert a row with an arbitrary raw status, bypassing every check.
    /// Models rows written before the vocabulary was closed.
    pub fn insert_raw(&self, token_number: i32, raw_status: &str) -> QueueEntityRow {
        let now = Utc::now();
        let row = QueueEntityRow {
            id: Uuid::new_v4(),
            token_number,
            status: raw_status.to_string(),
            processing_started_at: None,
            processing_ended_at: None,
            remarks: None,
            created_at: now,
            updated_at: now,
        };
        if let Ok(mut c) = self.committed() {
            c.entities.insert(row.id, row.clone());
        }
        row
    }

    /// Committed row, or `None`.
    pub fn row(&self, entity_id: Uuid) -> Option<QueueEntityRow> {
        self.committed()
            .ok()
            .and_then(|c| c.entities.get(&entity_id).cloned())
    }

    /// Committed ledger rows for one entity.
    pub fn events_for(&self, entity_id: Uuid) -> Vec<QueueEventRecord> {
        self.committed()
            .map(|c| {
                c.events
                    .iter()
                    .filter(|e| e.entity_id == entity_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Take the row lock outside any transaction, as a stuck peer would.
    pub async fn hold_row_lock(&self, entity_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        let lock = self.row_lock(entity_id).ok()?;
        Some(lock.lock_owned().await)
    }

    // ── Fault switches ──────────────────────────────────────────────────────

    pub fn fail_updates(&self, on: bool) {
        self.faults.update.store(on, Ordering::SeqCst);
    }

    pub fn fail_event_inserts(&self, on: bool) {
        self.faults.event_insert.store(on, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, on: bool) {
        self.faults.commit.store(on, Ordering::SeqCst);
    }

    pub fn fail_stats(&self, on: bool) {
        self.faults.stats.store(on, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.faults
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn committed(&self) -> Result<MutexGuard<'_, Committed>, StoreError> {
        self.committed
            .lock()
            .map_err(|_| StoreError::Backend("mem store poisoned".to_string()))
    }

    fn row_lock(&self, entity_id: Uuid) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Backend("mem lock table poisoned".to_string()))?;
        Ok(locks
            .entry(entity_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    fn injected(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected {what} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemQueueStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(MemTx::default())
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Self::injected(&self.faults.commit, "commit")?;
        let mut c = self.committed()?;
        c.entities.extend(tx.staged);
        c.events.extend(tx.events);
        // Row locks release when `tx.held` drops here.
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }

    async fn lock_entity(
        &self,
        tx: &mut Self::Tx,
        entity_id: Uuid,
    ) -> Result<Option<QueueEntityRow>, StoreError> {
        if !tx.held.contains_key(&entity_id) {
            let lock = self.row_lock(entity_id)?;
            let guard = lock.lock_owned().await;
            tx.held.insert(entity_id, guard);
        }
        if let Some(row) = tx.staged.get(&entity_id) {
            return Ok(Some(row.clone()));
        }
        Ok(self.committed()?.entities.get(&entity_id).cloned())
    }

    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        update: &StatusUpdate,
    ) -> Result<QueueEntityRow, StoreError> {
        let delay = self.faults.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Self::injected(&self.faults.update, "update")?;

        if !tx.held.contains_key(&update.entity_id) {
            return Err(StoreError::Backend(format!(
                "update of {} without holding its row lock",
                update.entity_id
            )));
        }

        let base = match tx.staged.get(&update.entity_id) {
            Some(row) => row.clone(),
            None => self
                .committed()?
                .entities
                .get(&update.entity_id)
                .cloned()
                .ok_or(StoreError::EntityNotFound(update.entity_id))?,
        };

        let mut row = base;
        row.status = update.status.as_str().to_string();
        if let Some(ts) = update.processing_started_at {
            row.processing_started_at = Some(ts);
        }
        if let Some(ts) = update.processing_ended_at {
            row.processing_ended_at = Some(ts);
        }
        if let Some(remark) = &update.remark {
            row.remarks = Some(append_remark(row.remarks.as_deref(), remark));
        }
        row.updated_at = update.updated_at;

        tx.staged.insert(row.id, row.clone());
        Ok(row)
    }

    async fn insert_event(
        &self,
        tx: &mut Self::Tx,
        event: &QueueEventRecord,
    ) -> Result<(), StoreError> {
        Self::injected(&self.faults.event_insert, "ledger insert")?;
        tx.events.push(event.clone());
        Ok(())
    }

    async fn create_entity(&self, token_number: i32) -> Result<QueueEntityRow, StoreError> {
        let now = Utc::now();
        let row = QueueEntityRow {
            id: Uuid::new_v4(),
            token_number,
            status: "waiting".to_string(),
            processing_started_at: None,
            processing_ended_at: None,
            remarks: None,
            created_at: now,
            updated_at: now,
        };
        self.committed()?.entities.insert(row.id, row.clone());
        Ok(row)
    }

    async fn fetch_entity(&self, entity_id: Uuid) -> Result<Option<QueueEntityRow>, StoreError> {
        Ok(self.committed()?.entities.get(&entity_id).cloned())
    }

    async fn list_events(&self, entity_id: Uuid) -> Result<Vec<QueueEventRecord>, StoreError> {
        let c = self.committed()?;
        Ok(c.events
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn record_processing_sample(
        &self,
        day: NaiveDate,
        duration_ms: i64,
    ) -> Result<ProcessingStats, StoreError> {
        Self::injected(&self.faults.stats, "stats")?;
        let mut c = self.committed()?;
        let stats = c
            .stats
            .entry(day)
            .and_modify(|s| s.absorb(duration_ms))
            .or_insert_with(|| ProcessingStats::first(day, duration_ms));
        Ok(stats.clone())
    }

    async fn processing_stats(
        &self,
        day: NaiveDate,
    ) -> Result<Option<ProcessingStats>, StoreError> {
        Ok(self.committed()?.stats.get(&day).cloned())
    }
}
