//! Transition executor.
//!
//! Every status change runs as one transaction against the entity's row lock:
//!
//! ```text
//!   begin ─► lock row ─► normalize ─► graph ─► role ─► update ─► ledger ─► commit
//!               │            │          │        │        │         │
//!               └────────────┴──────────┴────────┴────────┴─────────┴──► rollback
//! ```
//!
//! Publishing and analytics run only after commit and never fail the call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqm_db::{QueueEventRecord, QueueStore, StatusUpdate, StoreError};
use sqm_status::{normalize, parse_requested, EventType, QueueStatus, StatusParseError, Verdict};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::{stamp_processing_window, AnalyticsHandle};
use crate::entity::{Actor, CommittedTransition, QueueEntity};
use crate::error::TransitionError;
use crate::publisher::{EventPublisher, TransitionNotice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound on waiting for the entity row lock.
    pub lock_timeout: Duration,
    pub silent_processing_edges: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            silent_processing_edges: true,
        }
    }
}

pub struct StatusEngine<S: QueueStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    analytics: Option<AnalyticsHandle>,
    opts: EngineOptions,
}

impl<S: QueueStore> StatusEngine<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>, opts: EngineOptions) -> Self {
        Self {
            store,
            publisher,
            analytics: None,
            opts,
        }
    }

    pub fn with_analytics(mut self, handle: AnalyticsHandle) -> Self {
        self.analytics = Some(handle);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> EngineOptions {
        self.opts
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Move `entity_id` to `target` on behalf of `actor`.
    pub async fn change_status(
        &self,
        entity_id: Uuid,
        target: QueueStatus,
        actor: &Actor,
    ) -> Result<QueueEntity, TransitionError> {
        self.transition(entity_id, Ok(target), actor).await
    }

    /// Same as [`change_status`](Self::change_status) for a caller-supplied
    /// status string. An unrecognized target fails with `InvalidTransition`
    /// once the entity is known to exist.
    pub async fn change_status_raw(
        &self,
        entity_id: Uuid,
        target: &str,
        actor: &Actor,
    ) -> Result<QueueEntity, TransitionError> {
        self.transition(entity_id, parse_requested(target), actor).await
    }

    async fn transition(
        &self,
        entity_id: Uuid,
        requested: Result<QueueStatus, StatusParseError>,
        actor: &Actor,
    ) -> Result<QueueEntity, TransitionError> {
        let mut tx = self.store.begin().await?;

        let committed = match self.apply(&mut tx, entity_id, requested, actor).await {
            Ok(c) => c,
            Err(err) => {
                if let Err(rb) = self.store.rollback(tx).await {
                    warn!(%entity_id, error = %rb, "rollback failed");
                }
                return Err(err);
            }
        };

        self.store.commit(tx).await?;

        info!(
            %entity_id,
            from = %committed.event.previous_status,
            to = %committed.event.new_status,
            event_type = %committed.event.event_type,
            actor_id = %committed.event.actor_id,
            "queue status changed"
        );

        self.after_commit(&committed);
        Ok(committed.entity)
    }

    async fn apply(
        &self,
        tx: &mut S::Tx,
        entity_id: Uuid,
        requested: Result<QueueStatus, StatusParseError>,
        actor: &Actor,
    ) -> Result<CommittedTransition, TransitionError> {
        let wait = self.opts.lock_timeout;
        let locked = match tokio::time::timeout(wait, self.store.lock_entity(tx, entity_id)).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(%entity_id, timeout_ms = wait.as_millis() as u64, "row lock wait timed out");
                return Err(StoreError::LockTimeout { entity_id }.into());
            }
        };
        let row = locked.ok_or(TransitionError::NotFound { entity_id })?;

        let normalized = normalize(Some(row.status.as_str()));
        let from = normalized.status;

        let to = requested.map_err(|e| TransitionError::InvalidTransition {
            from,
            requested: e.raw,
        })?;

        match actor.verdict(from, to) {
            Verdict::Allowed => {}
            Verdict::Illegal => {
                return Err(TransitionError::InvalidTransition {
                    from,
                    requested: to.as_str().to_string(),
                });
            }
            Verdict::Denied => {
                warn!(
                    %entity_id,
                    actor_id = %actor.id,
                    role = ?actor.role,
                    %from,
                    %to,
                    "status change denied"
                );
                return Err(TransitionError::AccessDenied { from, to });
            }
        }

        let event_type =
            EventType::for_target(to).ok_or_else(|| TransitionError::InvalidTransition {
                from,
                requested: to.as_str().to_string(),
            })?;

        let now = Utc::now();
        let window = stamp_processing_window(from, to, now);
        let remark = normalized
            .was_fallback
            .then(|| format!("legacy status {:?} normalized to {}", row.status, from));

        let updated = self
            .store
            .update_status(
                tx,
                &StatusUpdate {
                    entity_id,
                    status: to,
                    processing_started_at: window.started_at,
                    processing_ended_at: window.ended_at,
                    remark,
                    updated_at: now,
                },
            )
            .await?;

        let event = QueueEventRecord {
            event_id: Uuid::new_v4(),
            entity_id,
            previous_status: from,
            new_status: to,
            actor_id: actor.id.clone(),
            actor_role: actor.role.role(),
            event_type,
            processing_start_at: updated.processing_started_at,
            processing_end_at: updated.processing_ended_at,
            created_at: now,
        };
        self.store.insert_event(tx, &event).await?;

        Ok(CommittedTransition {
            entity: QueueEntity::from_row(updated),
            event,
        })
    }

    fn after_commit(&self, committed: &CommittedTransition) {
        let notice = TransitionNotice::from_committed(committed, self.opts.silent_processing_edges);
        if let Err(err) = self.publisher.publish(&notice) {
            warn!(entity_id = %committed.entity.id, error = %err, "publish after commit failed");
        }
        if let Some(analytics) = &self.analytics {
            analytics.submit(committed.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, entity_id: Uuid) -> Result<QueueEntity, TransitionError> {
        self.store
            .fetch_entity(entity_id)
            .await?
            .map(QueueEntity::from_row)
            .ok_or(TransitionError::NotFound { entity_id })
    }

    /// Ledger for one entity, oldest first.
    pub async fn events(&self, entity_id: Uuid) -> Result<Vec<QueueEventRecord>, TransitionError> {
        if self.store.fetch_entity(entity_id).await?.is_none() {
            return Err(TransitionError::NotFound { entity_id });
        }
        Ok(self.store.list_events(entity_id).await?)
    }
}
