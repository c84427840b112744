pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecError, Result};
pub use models::*;

use crate::algorithms::CircuitBreaker;
use crate::config::Backend;
use crate::services::cache::{InMemoryCache, RecommendationCache, RedisCache};
use crate::services::catalog::CatalogService;
use crate::services::embedding::EmbeddingClient;
use crate::services::feedback::FeedbackQueue;
use crate::services::preference::PreferenceService;
use crate::services::recommendation::RecommendationService;
use crate::services::store::Stores;
use crate::services::vector_db::VectorDbService;
use crate::utils::metrics::ProviderMetrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub embedder: Arc<EmbeddingClient>,
    pub vector_db: Arc<VectorDbService>,
    pub catalog: Arc<CatalogService>,
    pub preferences: Arc<PreferenceService>,
    pub recommendations: Arc<RecommendationService>,
    pub cache: Arc<dyn RecommendationCache>,
    pub provider_metrics: Arc<ProviderMetrics>,
    pub feedback: FeedbackQueue,
}

impl AppState {
    /// Builds every service from `config`. The returned receiver is the
    /// consumer end of the feedback queue; hand it to a feedback worker.
    pub async fn new(config: Config) -> anyhow::Result<(Self, mpsc::Receiver<Uuid>)> {
        let stores = Stores::connect(&config).await?;
        Self::with_stores(config, stores).await
    }

    /// Like `new`, over stores the caller already holds. The local item
    /// index is loaded from `stores.items` before this returns.
    pub async fn with_stores(config: Config, stores: Stores) -> anyhow::Result<(Self, mpsc::Receiver<Uuid>)> {
        let config = Arc::new(config);
        let dimension = config.embedding.dimension;

        let provider_metrics = Arc::new(ProviderMetrics::new());
        let (metrics_tx, metrics_rx) = mpsc::channel(config.embedding.metrics_buffer.max(1));
        provider_metrics.clone().spawn_collector(metrics_rx);

        let embedder = Arc::new(EmbeddingClient::from_config(&config.embedding)?.with_metrics(metrics_tx));
        let vector_db = Arc::new(VectorDbService::new(dimension, config.search.clone()));

        let cache: Arc<dyn RecommendationCache> = match config.cache.backend {
            Backend::Redis => Arc::new(RedisCache::new(&config.redis, config.cache.ttl())?),
            Backend::Memory | Backend::Postgres => Arc::new(InMemoryCache::new(config.cache.ttl())),
        };

        let catalog = Arc::new(CatalogService::new(
            vector_db.clone(),
            embedder.clone(),
            stores.items.clone(),
            config.catalog.clone(),
        ));
        catalog.sync_from_store().await?;

        let preferences = Arc::new(PreferenceService::new(
            stores.interactions.clone(),
            stores.preferences.clone(),
            catalog.clone(),
            cache.clone(),
            config.preference.clone(),
        ));

        let recommendations = Arc::new(RecommendationService::new(
            embedder.clone(),
            vector_db.clone(),
            preferences.clone(),
            cache.clone(),
            config.blender.clone(),
            config.search.clone(),
        ));

        let (feedback, feedback_rx) = FeedbackQueue::channel(&config.feedback);

        info!(
            dimension,
            items = vector_db.item_count(),
            storage = ?config.storage.backend,
            cache = ?config.cache.backend,
            providers = ?embedder.provider_names(),
            "Application state initialized"
        );

        Ok((
            Self {
                config,
                embedder,
                vector_db,
                catalog,
                preferences,
                recommendations,
                cache,
                provider_metrics,
                feedback,
            },
            feedback_rx,
        ))
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.embedder.breaker()
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
