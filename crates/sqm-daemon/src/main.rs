//! sqm-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! connects the store, wires middleware, and starts the HTTP server. All
//! route handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sqm_daemon::{routes, state};
use sqm_db::PgQueueStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

const ENV_DAEMON_ADDR: &str = "SQM_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = sqm_config::load_from_env().context("config load failed")?;
    let cfg = loaded.settings;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let pool = sqm_db::connect_from_env(cfg.db.max_connections).await?;
    sqm_db::migrate(&pool).await?;
    let store = Arc::new(PgQueueStore::new(pool, cfg.lock_timeout()));

    let (shared, analytics_worker) = state::AppState::from_config(store, &cfg);
    let shared = Arc::new(shared);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match bind_addr_from_env()? {
        Some(addr) => addr,
        None => cfg.daemon_addr()?,
    };
    info!(room = %cfg.publisher.room, "sqm-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    state::drain_analytics(shared, analytics_worker).await?;
    info!("analytics drained; exiting");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> anyhow::Result<Option<SocketAddr>> {
    let Ok(raw) = std::env::var(ENV_DAEMON_ADDR) else {
        return Ok(None);
    };
    let addr = raw
        .parse()
        .with_context(|| format!("invalid {ENV_DAEMON_ADDR}: {raw:?}"))?;
    Ok(Some(addr))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
