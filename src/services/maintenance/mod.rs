use crate::services::cache::RecommendationCache;
use crate::services::catalog::CatalogService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Purges expired cache entries every `period`. Never returns.
pub async fn cache_cleanup_loop(cache: Arc<dyn RecommendationCache>, period: Duration) {
    info!("Starting cache cleanup, every {:?}", period);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match cache.cleanup_expired().await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} expired cache entries", removed),
            Err(e) => error!("Cache cleanup failed: {}", e),
        }
    }
}

/// Every `period`, pulls catalog changes made by other processes into the
/// local index and, when `retry_pending` is set, retries queued embeddings.
/// Never returns.
pub async fn catalog_maintenance_loop(catalog: Arc<CatalogService>, period: Duration, retry_pending: bool) {
    info!(retry_pending, "Starting catalog maintenance, every {:?}", period);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = catalog.sync_from_store().await {
            error!("Failed to sync catalog from store: {}", e);
        }
        if retry_pending {
            if let Err(e) = catalog.process_pending().await {
                error!("Failed to process pending embeddings: {}", e);
            }
        }
    }
}

pub fn spawn_cache_cleanup(cache: Arc<dyn RecommendationCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(cache_cleanup_loop(cache, period))
}

pub fn spawn_catalog_maintenance(catalog: Arc<CatalogService>, period: Duration, retry_pending: bool) -> JoinHandle<()> {
    tokio::spawn(catalog_maintenance_loop(catalog, period, retry_pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{CacheKey, Item, RecommendationMode, RecommendationResponse};
    use crate::services::cache::InMemoryCache;
    use crate::services::embedding::EmbeddingClient;
    use crate::services::store::InMemoryStore;
    use crate::services::vector_db::VectorDbService;
    use chrono::Utc;

    #[tokio::test]
    async fn test_cleanup_loop_purges_without_reads() {
        let cache = Arc::new(InMemoryCache::new(Duration::from_millis(5)));
        for hash in 0..4 {
            cache
                .put(
                    CacheKey { user_id: None, context_hash: hash },
                    &RecommendationResponse {
                        user_id: None,
                        mode: RecommendationMode::Semantic,
                        results: vec![],
                        cached: false,
                        degraded: false,
                        generated_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 4);

        let handle = spawn_cache_cleanup(cache.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_loop_picks_up_items_from_other_processes() {
        let config = Config::local(8);
        let store = Arc::new(InMemoryStore::new());
        let catalog = |store: Arc<InMemoryStore>| {
            let embedder = Arc::new(EmbeddingClient::from_config(&config.embedding).unwrap());
            let vector_db = Arc::new(VectorDbService::new(8, config.search.clone()));
            Arc::new(CatalogService::new(vector_db, embedder, store, config.catalog.clone()))
        };
        let writer = catalog(store.clone());
        let reader = catalog(store);

        let handle = spawn_catalog_maintenance(reader.clone(), Duration::from_millis(10), true);
        writer
            .upsert_item(Item::new("iris", "Iris Pallida", "House", "powdery orris root"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(reader.get_item("iris").map(|item| item.is_embedded()).unwrap_or(false));
    }
}
