//! Axum router and all HTTP handlers for sqm-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are generic over the store so the scenario
//! tests in `tests/` can run the same router on the in-memory store.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use sqm_db::QueueStore;
use sqm_engine::{Actor, PublishError, TransitionError, TransitionNotice};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    api_types::{
        ChangeStatusRequest, ErrorResponse, EventsResponse, HealthResponse,
        ProcessingStatsQuery, ProcessingStatsResponse,
    },
    state::AppState,
};

pub const HEADER_ACTOR_ID: &str = "x-actor-id";
pub const HEADER_ACTOR_ROLE: &str = "x-actor-role";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router<S: QueueStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/v1/health", get(health::<S>))
        .route("/v1/queue/:id", get(get_entity::<S>))
        .route("/v1/queue/:id/events", get(list_events::<S>))
        .route("/v1/queue/:id/status", post(change_status::<S>))
        .route("/v1/rooms/:room/stream", get(room_stream::<S>))
        .route("/v1/audit/stream", get(audit_stream::<S>))
        .route("/v1/analytics/processing", get(processing_stats::<S>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn error_body(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Map an engine failure to HTTP. Only the stable `Display` text leaves the
/// process; persistence detail goes to the log.
pub(crate) fn transition_error_response(err: &TransitionError) -> Response {
    let status = match err {
        TransitionError::NotFound { .. } => StatusCode::NOT_FOUND,
        TransitionError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        TransitionError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        TransitionError::Persistence(source) => {
            error!(error = %source, lock_timeout = err.is_lock_timeout(), "persistence failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_body(status, err.code(), &err.to_string())
}

/// Both identity headers are required on writes. Role names the matrix does
/// not know are passed through and end up denied.
fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let id = non_empty_header(headers, HEADER_ACTOR_ID)?;
    let role = non_empty_header(headers, HEADER_ACTOR_ROLE)?;
    Some(Actor::from_claim(id, role))
}

fn non_empty_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health<S: QueueStore>(State(st): State<Arc<AppState<S>>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/queue/:id   GET /v1/queue/:id/events
// ---------------------------------------------------------------------------

pub(crate) async fn get_entity<S: QueueStore>(
    State(st): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.engine.get(id).await {
        Ok(entity) => (StatusCode::OK, Json(entity)).into_response(),
        Err(err) => transition_error_response(&err),
    }
}

pub(crate) async fn list_events<S: QueueStore>(
    State(st): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.engine.events(id).await {
        Ok(events) => (
            StatusCode::OK,
            Json(EventsResponse {
                entity_id: id,
                events,
            }),
        )
            .into_response(),
        Err(err) => transition_error_response(&err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/queue/:id/status
// ---------------------------------------------------------------------------

pub(crate) async fn change_status<S: QueueStore>(
    State(st): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ChangeStatusRequest>,
) -> Response {
    let Some(actor) = actor_from_headers(&headers) else {
        info!(entity_id = %id, "status change without actor identity rejected");
        return error_body(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "Actor identity required",
        );
    };

    match st.engine.change_status_raw(id, &body.status, &actor).await {
        Ok(entity) => (StatusCode::OK, Json(entity)).into_response(),
        Err(err) => transition_error_response(&err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/analytics/processing
// ---------------------------------------------------------------------------

pub(crate) async fn processing_stats<S: QueueStore>(
    State(st): State<Arc<AppState<S>>>,
    Query(q): Query<ProcessingStatsQuery>,
) -> Response {
    let day = q.day.unwrap_or_else(|| Utc::now().date_naive());
    match st.engine.store().processing_stats(day).await {
        Ok(stats) => (
            StatusCode::OK,
            Json(ProcessingStatsResponse::from_stats(day, stats)),
        )
            .into_response(),
        Err(err) => transition_error_response(&TransitionError::Persistence(err)),
    }
}

// ---------------------------------------------------------------------------
// SSE: GET /v1/rooms/:room/stream   GET /v1/audit/stream
// ---------------------------------------------------------------------------

pub(crate) async fn room_stream<S: QueueStore>(
    State(st): State<Arc<AppState<S>>>,
    Path(room): Path<String>,
) -> Response {
    match st.publisher.subscribe_room(&room) {
        Ok(rx) => sse_response(rx),
        Err(PublishError::UnknownRoom(_)) => {
            info!(%room, "subscription to unknown room rejected");
            error_body(StatusCode::NOT_FOUND, "unknown_room", "Unknown room")
        }
        Err(err) => {
            error!(%room, error = %err, "room subscription failed");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "subscription_failed",
                "Subscription failed",
            )
        }
    }
}

pub(crate) async fn audit_stream<S: QueueStore>(State(st): State<Arc<AppState<S>>>) -> Response {
    sse_response(st.publisher.subscribe_audit())
}

fn sse_response(rx: broadcast::Receiver<TransitionNotice>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = broadcast_to_sse(rx);
    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<TransitionNotice>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(n) => {
                let data = serde_json::to_string(&n).ok()?;
                Some(Ok(Event::default().event(n.event_type.as_str()).data(data)))
            }
            // Lagged subscribers refetch state; nothing is replayed.
            Err(_) => None,
        }
    })
}
