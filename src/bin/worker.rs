use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use scentrec::config::Backend;
use scentrec::services::feedback::{feedback_worker, FeedbackQueue};
use scentrec::services::maintenance::{cache_cleanup_loop, catalog_maintenance_loop, spawn_catalog_maintenance};
use scentrec::{init_tracing, AppState, Config};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// One of `cache`, `embeddings`, `feedback` or `all`.
    #[arg(short, long, default_value = "all")]
    worker_type: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("Starting ScentRec worker: {}", args.worker_type);

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    if config.storage.backend != Backend::Postgres {
        warn!("In-memory storage is private to this process; the worker only sees data it wrote itself");
    }

    let (state, feedback_rx) = AppState::new(config).await?;

    match args.worker_type.as_str() {
        "cache" => start_cache_cleanup_worker(state).await,
        "embeddings" => start_embedding_retry_worker(state).await,
        "feedback" => start_feedback_worker(state, feedback_rx).await,
        "all" => {
            let cache = tokio::spawn(start_cache_cleanup_worker(state.clone()));
            let embeddings = tokio::spawn(start_embedding_retry_worker(state.clone()));
            let feedback = tokio::spawn(start_feedback_worker(state, feedback_rx));
            tokio::select! {
                result = cache => result?,
                result = embeddings => result?,
                result = feedback => result?,
            }
        }
        _ => {
            error!("Unknown worker type: {}", args.worker_type);
            Err(anyhow::anyhow!("Invalid worker type"))
        }
    }
}

async fn start_cache_cleanup_worker(state: AppState) -> Result<()> {
    if state.config.cache.backend != Backend::Redis {
        warn!("In-memory cache lives inside each server process, which cleans it itself");
    }
    cache_cleanup_loop(state.cache.clone(), state.config.cache.cleanup_interval()).await;
    Ok(())
}

async fn start_embedding_retry_worker(state: AppState) -> Result<()> {
    catalog_maintenance_loop(state.catalog.clone(), state.config.catalog.retry_interval(), true).await;
    Ok(())
}

/// Polls the interaction log for users active since the previous poll and
/// feeds them through the batching feedback worker.
async fn start_feedback_worker(state: AppState, feedback_rx: mpsc::Receiver<Uuid>) -> Result<()> {
    let period = Duration::from_millis(state.config.feedback.flush_interval_ms.max(1));
    info!("Starting feedback worker, polling every {:?}", period);

    let worker = tokio::spawn(feedback_worker(
        feedback_rx,
        state.preferences.clone(),
        state.config.feedback.clone(),
    ));
    // Keeps the local item index current for preference recomputes.
    let catalog_sync = spawn_catalog_maintenance(state.catalog.clone(), state.config.catalog.retry_interval(), false);

    let queue: FeedbackQueue = state.feedback.clone();
    let mut since = Utc::now();
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let polled_at = Utc::now();

        let users = match state.preferences.active_users_since(since).await {
            Ok(users) => users,
            Err(e) => {
                error!("Failed to poll interaction log: {}", e);
                continue;
            }
        };

        let mut saturated = false;
        for user_id in users {
            if let Err(e) = queue.submit(user_id) {
                warn!(%user_id, error = %e, "feedback queue saturated, retrying next poll");
                saturated = true;
                break;
            }
        }

        // Keep the window open until every active user has been queued.
        if !saturated {
            since = polled_at;
        }

        if worker.is_finished() || catalog_sync.is_finished() {
            return Err(anyhow::anyhow!("feedback worker stopped"));
        }
    }
}
