//! Request and response types for sqm-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqm_db::{ProcessingStats, QueueEventRecord};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. "invalid_transition".
    pub error: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// /v1/queue/:id/status  /v1/queue/:id/events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    /// Target status; case and surrounding whitespace are ignored.
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    pub entity_id: Uuid,
    pub events: Vec<QueueEventRecord>,
}

// ---------------------------------------------------------------------------
// /v1/analytics/processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatsQuery {
    /// UTC day; defaults to today.
    pub day: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatsResponse {
    pub day: NaiveDate,
    pub sample_count: i64,
    pub total_ms: i64,
    pub min_ms: Option<i64>,
    pub max_ms: Option<i64>,
    pub avg_ms: Option<f64>,
}

impl ProcessingStatsResponse {
    pub fn from_stats(day: NaiveDate, stats: Option<ProcessingStats>) -> Self {
        match stats {
            Some(s) => Self {
                day,
                sample_count: s.sample_count,
                total_ms: s.total_ms,
                min_ms: Some(s.min_ms),
                max_ms: Some(s.max_ms),
                avg_ms: Some(s.avg_ms()),
            },
            None => Self {
                day,
                sample_count: 0,
                total_ms: 0,
                min_ms: None,
                max_ms: None,
                avg_ms: None,
            },
        }
    }
}
