use crate::algorithms::retriever::{InMemoryIndex, SimilarityIndex};
use crate::config::SearchConfig;
use crate::error::{RecError, Result};
use crate::models::*;
use crate::utils::retry_with_backoff;
use crate::utils::validation::{
    validate_exclude_ids, validate_item, validate_max_results, validate_threshold, validate_vector,
};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SEARCH_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Item catalog metadata plus the similarity index over item vectors.
pub struct VectorDbService {
    index: Arc<dyn SimilarityIndex>,
    items: DashMap<ItemId, Item>,
    config: SearchConfig,
    dimension: usize,
}

impl VectorDbService {
    pub fn new(dimension: usize, config: SearchConfig) -> Self {
        info!("Initialized in-memory similarity index with dimension {}", dimension);
        Self::with_index(Arc::new(InMemoryIndex::new(dimension)), config)
    }

    pub fn with_index(index: Arc<dyn SimilarityIndex>, config: SearchConfig) -> Self {
        Self {
            dimension: index.dimension(),
            index,
            items: DashMap::new(),
            config,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.config
    }

    /// Stores the item and, when it carries a vector, indexes it. Items
    /// without a vector are kept out of the index.
    pub async fn put_item(&self, item: Item) -> Result<()> {
        validate_item(&item)?;

        if item.is_embedded() {
            validate_vector(&item.embedding, self.dimension, "item vector")?;
            self.index.upsert(item.item_id.clone(), item.embedding.clone()).await?;
        } else {
            self.index.remove(&item.item_id).await?;
        }

        debug!(item_id = %item.item_id, embedded = item.is_embedded(), "stored item");
        self.items.insert(item.item_id.clone(), item);
        Ok(())
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<bool> {
        self.index.remove(item_id).await?;
        Ok(self.items.remove(item_id).is_some())
    }

    pub fn get_item(&self, item_id: &str) -> Option<Item> {
        self.items.get(item_id).map(|item| item.clone())
    }

    pub fn get_items<'a>(&self, ids: impl IntoIterator<Item = &'a ItemId>) -> HashMap<ItemId, Item> {
        ids.into_iter()
            .filter_map(|id| self.items.get(id).map(|item| (id.clone(), item.clone())))
            .collect()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn indexed_count(&self) -> usize {
        self.index.len()
    }

    /// `findSimilarItems`: validates every argument, then searches.
    pub async fn find_similar_items(
        &self,
        query_vector: &[f32],
        threshold: f32,
        max_results: usize,
        exclude_ids: &[ItemId],
    ) -> Result<Vec<SearchResult>> {
        validate_exclude_ids(exclude_ids)?;
        let exclude: HashSet<ItemId> = exclude_ids.iter().cloned().collect();
        self.find_similar(query_vector, threshold, max_results, &exclude).await
    }

    pub async fn find_similar(
        &self,
        query_vector: &[f32],
        threshold: f32,
        max_results: usize,
        exclude: &HashSet<ItemId>,
    ) -> Result<Vec<SearchResult>> {
        validate_vector(query_vector, self.dimension, "query vector")?;
        validate_threshold(threshold)?;
        validate_max_results(max_results, self.config.max_results_limit)?;

        let timeout = self.config.timeout();
        let hits = retry_with_backoff(
            move |_| async move {
                tokio::time::timeout(
                    timeout,
                    self.index.find_similar(query_vector, threshold, max_results, exclude),
                )
                .await
                .map_err(|_| RecError::Timeout {
                    operation: "similarity search".to_string(),
                    after_ms: timeout.as_millis() as u64,
                })?
            },
            self.config.max_retries + 1,
            SEARCH_RETRY_DELAY,
            RecError::is_retryable,
        )
        .await?;

        Ok(hits
            .into_iter()
            .filter_map(|(item_id, similarity)| {
                self.items.get(&item_id).map(|item| SearchResult {
                    similarity,
                    name: item.name.clone(),
                    brand: item.brand.clone(),
                    scent_families: item.tags.scent_families.clone(),
                    item_id,
                })
            })
            .collect())
    }

    /// Catalog ordered by popularity, then review count, then id.
    pub fn popular_items(&self, limit: usize, exclude: &HashSet<ItemId>) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .items
            .iter()
            .filter(|entry| !exclude.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by(|a, b| {
            b.popularity_score
                .total_cmp(&a.popularity_score)
                .then_with(|| b.rating_count.cmp(&a.rating_count))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        items.truncate(limit);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn service() -> VectorDbService {
        VectorDbService::new(3, Config::default().search)
    }

    #[tokio::test]
    async fn test_search_returns_display_fields() {
        let db = service();
        db.put_item(
            Item::new("amber", "Amber Oud", "House", "resinous")
                .with_scent_families(&["amber"])
                .with_embedding(vec![1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
        db.put_item(Item::new("pending", "Pending", "House", "no vector yet")).await.unwrap();

        let results = db.find_similar_items(&[1.0, 0.0, 0.0], 0.5, 5, &[]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Amber Oud");
        assert_eq!(results[0].scent_families, vec!["amber".to_string()]);
        assert_eq!(db.item_count(), 2);
        assert_eq!(db.indexed_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let db = service();
        assert!(matches!(
            db.find_similar_items(&[1.0, 0.0, 0.0], 1.5, 5, &[]).await,
            Err(RecError::Validation(_))
        ));
        assert!(matches!(
            db.find_similar_items(&[1.0, 0.0, 0.0], 0.5, 101, &[]).await,
            Err(RecError::Validation(_))
        ));
        assert!(matches!(
            db.find_similar_items(&[1.0, f32::INFINITY, 0.0], 0.5, 5, &[]).await,
            Err(RecError::Validation(_))
        ));
        assert!(db
            .put_item(Item::new("x", "X", "Y", "z").with_embedding(vec![1.0, 0.0]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_popular_items_order() {
        let db = service();
        db.put_item(Item::new("a", "A", "House", "").with_rating(4.0, 100)).await.unwrap();
        db.put_item(Item::new("b", "B", "House", "").with_rating(4.8, 5_000)).await.unwrap();
        db.put_item(Item::new("c", "C", "House", "")).await.unwrap();

        let exclude: HashSet<ItemId> = ["b".to_string()].into_iter().collect();
        let ids: Vec<_> = db.popular_items(10, &HashSet::new()).into_iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        let ids: Vec<_> = db.popular_items(1, &exclude).into_iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec!["a"]);
    }
}
