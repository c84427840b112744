use crate::error::{RecError, Result};
use crate::models::ItemId;
use crate::utils::similarity_score;
use crate::utils::validation::validate_vector;
use nalgebra::DVector;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Items with similarity >= `threshold`, most similar first, ties broken
    /// by item id ascending. `exclude` is applied before ranking.
    async fn find_similar(
        &self,
        query_vector: &[f32],
        threshold: f32,
        max_results: usize,
        exclude: &HashSet<ItemId>,
    ) -> Result<Vec<(ItemId, f32)>>;

    async fn upsert(&self, id: ItemId, vector: Vec<f32>) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<bool>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;
}

/// Exact scan over pre-normalized vectors, parallelized with rayon.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    vectors: Arc<RwLock<HashMap<ItemId, DVector<f32>>>>,
    dimension: usize,
}

impl InMemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: Arc::new(RwLock::new(HashMap::new())),
            dimension,
        }
    }

    fn normalized(vector: &[f32]) -> DVector<f32> {
        let v = DVector::from_column_slice(vector);
        let norm = v.norm();
        if norm > 0.0 {
            v / norm
        } else {
            v
        }
    }

    fn scan(
        vectors: &HashMap<ItemId, DVector<f32>>,
        query: &DVector<f32>,
        threshold: f32,
        max_results: usize,
        exclude: &HashSet<ItemId>,
    ) -> Vec<(ItemId, f32)> {
        let mut hits: Vec<(ItemId, f32)> = vectors
            .par_iter()
            .filter(|(id, _)| !exclude.contains(*id))
            .filter_map(|(id, vector)| {
                let similarity = similarity_score(query.dot(vector));
                (similarity >= threshold).then(|| (id.clone(), similarity))
            })
            .collect();

        hits.par_sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(max_results);
        hits
    }
}

#[async_trait::async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn find_similar(
        &self,
        query_vector: &[f32],
        threshold: f32,
        max_results: usize,
        exclude: &HashSet<ItemId>,
    ) -> Result<Vec<(ItemId, f32)>> {
        validate_vector(query_vector, self.dimension, "query vector")?;

        let query = Self::normalized(query_vector);
        let vectors = self.vectors.clone();
        let exclude = exclude.clone();

        tokio::task::spawn_blocking(move || {
            let guard = vectors.read();
            Self::scan(&guard, &query, threshold, max_results, &exclude)
        })
        .await
        .map_err(|e| RecError::Internal(format!("similarity scan panicked: {}", e)))
    }

    async fn upsert(&self, id: ItemId, vector: Vec<f32>) -> Result<()> {
        validate_vector(&vector, self.dimension, "item vector")?;
        self.vectors.write().insert(id, Self::normalized(&vector));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.vectors.write().remove(id).is_some())
    }

    fn len(&self) -> usize {
        self.vectors.read().len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
