//! Postgres-backed [`QueueStore`].
//!
//! The row lock is a plain `SELECT ... FOR UPDATE`. Its wait is bounded with
//! a transaction-local `lock_timeout`, so an abandoned lock surfaces as
//! [`StoreError::LockTimeout`] instead of a hung request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use sqm_status::{EventType, QueueStatus, Role};
use tracing::warn;
use uuid::Uuid;

use crate::store::{
    ProcessingStats, QueueEntityRow, QueueEventRecord, QueueStore, StatusUpdate, StoreError,
};

/// SQLSTATE `lock_not_available`.
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

const ENTITY_COLUMNS: &str = "id, token_number, status, processing_started_at, \
     processing_ended_at, remarks, created_at, updated_at";

const EVENT_COLUMNS: &str = "event_id, entity_id, previous_status, new_status, actor_id, \
     actor_role, event_type, processing_start_at, processing_end_at, created_at";

#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn lock_timeout_setting(&self) -> String {
        // 0 disables the timeout in Postgres; clamp so the bound always holds.
        format!("{}ms", self.lock_timeout.as_millis().max(1))
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.rollback().await?;
        Ok(())
    }

    async fn lock_entity(
        &self,
        tx: &mut Self::Tx,
        entity_id: Uuid,
    ) -> Result<Option<QueueEntityRow>, StoreError> {
        sqlx::query("select set_config('lock_timeout', $1, true)")
            .bind(self.lock_timeout_setting())
            .execute(&mut **tx)
            .await?;

        let sql = format!("select {ENTITY_COLUMNS} from queue_entities where id = $1 for update");
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| classify_lock_error(e, entity_id))?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        update: &StatusUpdate,
    ) -> Result<QueueEntityRow, StoreError> {
        let sql = format!(
            r#"
            update queue_entities
               set status = $2,
                   processing_started_at = coalesce($3, processing_started_at),
                   processing_ended_at = coalesce($4, processing_ended_at),
                   remarks = case
                       when $5::text is null then remarks
                       when remarks is null or remarks = '' then $5::text
                       else remarks || E'\n' || $5::text
                   end,
                   updated_at = $6
             where id = $1
            returning {ENTITY_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(update.entity_id)
            .bind(update.status.as_str())
            .bind(update.processing_started_at)
            .bind(update.processing_ended_at)
            .bind(update.remark.as_deref())
            .bind(update.updated_at)
            .fetch_optional(&mut **tx)
            .await?;

        match row {
            Some(r) => entity_from_row(&r),
            None => Err(StoreError::EntityNotFound(update.entity_id)),
        }
    }

    async fn insert_event(
        &self,
        tx: &mut Self::Tx,
        event: &QueueEventRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into queue_events (
              event_id, entity_id, previous_status, new_status, actor_id,
              actor_role, event_type, processing_start_at, processing_end_at, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.event_id)
        .bind(event.entity_id)
        .bind(event.previous_status.as_str())
        .bind(event.new_status.as_str())
        .bind(&event.actor_id)
        .bind(event.actor_role.map(|r| r.as_str()))
        .bind(event.event_type.as_str())
        .bind(event.processing_start_at)
        .bind(event.processing_end_at)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn create_entity(&self, token_number: i32) -> Result<QueueEntityRow, StoreError> {
        let sql = format!(
            "insert into queue_entities (id, token_number, status) \
             values ($1, $2, 'waiting') returning {ENTITY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(token_number)
            .fetch_one(&self.pool)
            .await?;
        entity_from_row(&row)
    }

    async fn fetch_entity(&self, entity_id: Uuid) -> Result<Option<QueueEntityRow>, StoreError> {
        let sql = format!("select {ENTITY_COLUMNS} from queue_entities where id = $1");
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn list_events(&self, entity_id: Uuid) -> Result<Vec<QueueEventRecord>, StoreError> {
        let sql = format!(
            "select {EVENT_COLUMNS} from queue_events where entity_id = $1 \
             order by created_at asc, event_id asc"
        );
        let rows = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn record_processing_sample(
        &self,
        day: NaiveDate,
        duration_ms: i64,
    ) -> Result<ProcessingStats, StoreError> {
        let row = sqlx::query(
            r#"
            insert into processing_stats (day, sample_count, total_ms, min_ms, max_ms)
            values ($1, 1, $2, $2, $2)
            on conflict (day) do update
               set sample_count = processing_stats.sample_count + 1,
                   total_ms = processing_stats.total_ms + excluded.total_ms,
                   min_ms = least(processing_stats.min_ms, excluded.min_ms),
                   max_ms = greatest(processing_stats.max_ms, excluded.max_ms),
                   updated_at = now()
            returning day, sample_count, total_ms, min_ms, max_ms
            "#,
        )
        .bind(day)
        .bind(duration_ms)
        .fetch_one(&self.pool)
        .await?;
        stats_from_row(&row)
    }

    async fn processing_stats(
        &self,
        day: NaiveDate,
    ) -> Result<Option<ProcessingStats>, StoreError> {
        let row = sqlx::query(
            "select day, sample_count, total_ms, min_ms, max_ms from processing_stats where day = $1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(stats_from_row).transpose()
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn classify_lock_error(err: sqlx::Error, entity_id: Uuid) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(PG_LOCK_NOT_AVAILABLE) {
            warn!(%entity_id, "row lock wait exceeded lock_timeout");
            return StoreError::LockTimeout { entity_id };
        }
    }
    StoreError::Database(err)
}

fn entity_from_row(row: &PgRow) -> Result<QueueEntityRow, StoreError> {
    Ok(QueueEntityRow {
        id: row.try_get("id")?,
        token_number: row.try_get("token_number")?,
        status: row.try_get("status")?,
        processing_started_at: row.try_get("processing_started_at")?,
        processing_ended_at: row.try_get("processing_ended_at")?,
        remarks: row.try_get("remarks")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<QueueEventRecord, StoreError> {
    let previous: String = row.try_get("previous_status")?;
    let new: String = row.try_get("new_status")?;
    let role: Option<String> = row.try_get("actor_role")?;
    let event_type: String = row.try_get("event_type")?;

    let actor_role = match role {
        Some(r) => Some(
            Role::parse(&r).ok_or_else(|| StoreError::Decode(format!("unknown actor_role: {r}")))?,
        ),
        None => None,
    };

    Ok(QueueEventRecord {
        event_id: row.try_get("event_id")?,
        entity_id: row.try_get("entity_id")?,
        previous_status: decode_status(&previous)?,
        new_status: decode_status(&new)?,
        actor_id: row.try_get("actor_id")?,
        actor_role,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| StoreError::Decode(format!("unknown event_type: {event_type}")))?,
        processing_start_at: row.try_get("processing_start_at")?,
        processing_end_at: row.try_get("processing_end_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_status(raw: &str) -> Result<QueueStatus, StoreError> {
    raw.parse::<QueueStatus>()
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn stats_from_row(row: &PgRow) -> Result<ProcessingStats, StoreError> {
    Ok(ProcessingStats {
        day: row.try_get("day")?,
        sample_count: row.try_get("sample_count")?,
        total_ms: row.try_get("total_ms")?,
        min_ms: row.try_get("min_ms")?,
        max_ms: row.try_get("max_ms")?,
    })
}
