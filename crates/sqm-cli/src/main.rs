use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqm_db::{PgQueueStore, QueueStore};
use sqm_engine::{
    spawn_worker, Actor, AnalyticsRecorder, BroadcastPublisher, EngineOptions, StatusEngine,
    TransitionError,
};
use sqm_status::{parse_requested, Role};
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sqm")]
#[command(about = "Service queue operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Queue entity inspection and trusted status changes
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },

    /// Processing-duration statistics for one UTC day
    Stats {
        /// Day as YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        day: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum QueueCmd {
    /// Print one entity
    Show {
        #[arg(long)]
        id: Uuid,
    },

    /// Print the transition ledger for one entity, oldest first
    Events {
        #[arg(long)]
        id: Uuid,
    },

    /// Change an entity's status.
    ///
    /// Without --role this runs as a trusted system caller: graph rules
    /// apply, role rules do not.
    ///
    /// The change is published only inside this process. Dashboards attached
    /// to a running sqm-daemon see it on their next refetch or reconnect.
    SetStatus {
        #[arg(long)]
        id: Uuid,

        /// Target status (waiting | serving | processing | completed | cancelled)
        #[arg(long)]
        status: String,

        /// Actor id recorded in the ledger
        #[arg(long, default_value = "sqm-cli")]
        actor: String,

        /// Act as this role (super_admin | admin | cashier | sales)
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let cfg = sqm_config::load_from_env()?.settings;
            let pool = sqm_db::connect_from_env(cfg.db.max_connections).await?;
            match cmd {
                DbCmd::Status => {
                    let s = sqm_db::status(&pool).await?;
                    println!("db_ok={} has_queue_table={}", s.ok, s.has_queue_table);
                }
                DbCmd::Migrate => {
                    sqm_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = sqm_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Queue { cmd } => match cmd {
            QueueCmd::Show { id } => {
                let store = open_store().await?;
                let row = store
                    .fetch_entity(id)
                    .await?
                    .ok_or_else(|| anyhow!("queue entity not found: {id}"))?;
                let entity = sqm_engine::QueueEntity::from_row(row);
                println!("{}", serde_json::to_string_pretty(&entity)?);
            }

            QueueCmd::Events { id } => {
                let store = open_store().await?;
                let events = store.list_events(id).await?;
                println!("{}", serde_json::to_string_pretty(&events)?);
            }

            QueueCmd::SetStatus {
                id,
                status,
                actor,
                role,
            } => {
                // Validate everything local before touching the database.
                let target = parse_requested(&status)?;
                let actor = match role {
                    Some(r) => {
                        let role = Role::parse(&r).ok_or_else(|| anyhow!("unknown role: {r:?}"))?;
                        Actor::staff(actor, role)
                    }
                    None => Actor::system(actor),
                };

                let cfg = sqm_config::load_from_env()?.settings;
                let store = Arc::new(open_store_with(&cfg).await?);
                let publisher = Arc::new(BroadcastPublisher::new(
                    cfg.publisher.room.clone(),
                    cfg.publisher.room_capacity,
                    cfg.publisher.audit_capacity,
                ));
                let (analytics, worker) = spawn_worker(
                    AnalyticsRecorder::new(store.clone()),
                    cfg.analytics.queue_capacity,
                );
                let engine = StatusEngine::new(
                    store,
                    publisher,
                    EngineOptions {
                        lock_timeout: cfg.lock_timeout(),
                        silent_processing_edges: cfg.publisher.silent_processing_edges,
                    },
                )
                .with_analytics(analytics);

                let result = engine.change_status(id, target, &actor).await;

                // Let the analytics worker drain before exiting.
                drop(engine);
                worker.await.context("analytics worker panicked")?;

                let entity = result.map_err(describe)?;
                info!(entity_id = %id, status = %entity.status, "status changed");
                println!("{}", serde_json::to_string_pretty(&entity)?);
            }
        },

        Commands::Stats { day } => {
            let day = day.unwrap_or_else(|| Utc::now().date_naive());
            let store = open_store().await?;
            match store.processing_stats(day).await? {
                Some(s) => println!(
                    "day={} count={} total_ms={} min_ms={} max_ms={} avg_ms={:.1}",
                    s.day,
                    s.sample_count,
                    s.total_ms,
                    s.min_ms,
                    s.max_ms,
                    s.avg_ms()
                ),
                None => println!("day={day} count=0"),
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

async fn open_store() -> Result<PgQueueStore> {
    let cfg = sqm_config::load_from_env()?.settings;
    open_store_with(&cfg).await
}

async fn open_store_with(cfg: &sqm_config::QueueConfig) -> Result<PgQueueStore> {
    let pool = sqm_db::connect_from_env(cfg.db.max_connections).await?;
    Ok(PgQueueStore::new(pool, cfg.lock_timeout()))
}

/// Code plus stable message; persistence detail stays in the log.
fn describe(err: TransitionError) -> anyhow::Error {
    if let TransitionError::Persistence(source) = &err {
        tracing::error!(error = %source, "persistence failure");
    }
    anyhow!("{}: {}", err.code(), err)
}
