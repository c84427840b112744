use crate::algorithms::blending::{
    blend_vectors, cold_start_score, generate_explanation, popularity_explanation, resolve_weights,
};
use crate::config::{BlenderConfig, SearchConfig};
use crate::error::Result;
use crate::models::*;
use crate::services::cache::RecommendationCache;
use crate::services::embedding::EmbeddingClient;
use crate::services::preference::PreferenceService;
use crate::services::vector_db::VectorDbService;
use crate::utils::metrics::ServingStats;
use crate::utils::validation::validate_recommendation_request;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Blends query intent with user preference and serves ranked, explained results.
pub struct RecommendationService {
    embedder: Arc<EmbeddingClient>,
    vector_db: Arc<VectorDbService>,
    preferences: Arc<PreferenceService>,
    cache: Arc<dyn RecommendationCache>,
    blender: BlenderConfig,
    search: SearchConfig,
    stats: Arc<ServingStats>,
}

impl RecommendationService {
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        vector_db: Arc<VectorDbService>,
        preferences: Arc<PreferenceService>,
        cache: Arc<dyn RecommendationCache>,
        blender: BlenderConfig,
        search: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            vector_db,
            preferences,
            cache,
            blender,
            search,
            stats: Arc::new(ServingStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<ServingStats> {
        self.stats.clone()
    }

    pub async fn recommend(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        self.stats.increment("total_requests");
        let start_time = Instant::now();

        if let Err(e) = validate_recommendation_request(request, self.search.max_results_limit) {
            self.stats.increment("rejected_requests");
            return Err(e);
        }

        let key = CacheKey::for_request(request);
        match self.cache.get(&key).await {
            Ok(Some(mut cached)) => {
                self.stats.increment("cache_hits");
                cached.cached = true;
                self.stats.record_latency(start_time.elapsed().as_millis() as u64);
                return Ok(cached);
            }
            Ok(None) => self.stats.increment("cache_misses"),
            Err(e) => warn!(error = %e, "recommendation cache unavailable, computing fresh results"),
        }

        let response = match self.compute(request).await {
            Ok(response) => {
                if let Err(e) = self.cache.put(key, &response).await {
                    warn!(error = %e, "failed to cache recommendations");
                }
                self.stats.increment("successful_requests");
                response
            }
            Err(e) if e.is_degradable() => {
                warn!(error = %e, "recommendation path failed, serving popularity fallback");
                self.stats.increment("degraded_requests");
                self.fallback(request)
            }
            Err(e) => {
                self.stats.increment("failed_requests");
                return Err(e);
            }
        };

        let latency = start_time.elapsed().as_millis() as u64;
        self.stats.record_latency(latency);
        info!(
            "Served {} recommendations ({:?}) for user {:?} in {}ms",
            response.results.len(),
            response.mode,
            request.user_id,
            latency
        );
        Ok(response)
    }

    async fn compute(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        let max_results = request.max_results.unwrap_or(self.search.default_max_results);
        let threshold = request.threshold.unwrap_or(self.search.default_threshold);

        let mut exclude: HashSet<ItemId> = request.exclude_ids.iter().cloned().collect();
        let model = match request.user_id {
            Some(user_id) => {
                if !request.include_interacted {
                    exclude.extend(self.preferences.interacted_item_ids(user_id).await?);
                }
                self.preferences.get_model(user_id).await?
            }
            None => None,
        };

        let intent = match request.query.as_deref() {
            Some(query) => Some(self.embedder.generate_embedding(query).await?.vector),
            None => None,
        };

        let (mode, query_vector) = match (&model, intent) {
            (Some(model), Some(intent)) => {
                let weights = resolve_weights(request.weights, request.preset, &self.blender)?;
                debug!(?weights, "blending preference with query intent");
                (RecommendationMode::Blended, blend_vectors(&model.embedding, &intent, weights))
            }
            (Some(model), None) => (RecommendationMode::Personalized, model.embedding.clone()),
            (None, Some(intent)) => (RecommendationMode::Semantic, intent),
            (None, None) => return self.cold_start(request, max_results, &exclude).await,
        };

        let liked: &[String] = model.as_ref().map(|m| m.preferences.as_slice()).unwrap_or(&[]);
        let hits = self
            .vector_db
            .find_similar(&query_vector, threshold, max_results, &exclude)
            .await?;

        let results = hits
            .into_iter()
            .filter_map(|hit| {
                let item = self.vector_db.get_item(&hit.item_id)?;
                Some(RankedResult {
                    explanation: generate_explanation(&item, hit.similarity, liked, &self.blender),
                    item_id: hit.item_id,
                    name: hit.name,
                    brand: hit.brand,
                    scent_families: hit.scent_families,
                    similarity: hit.similarity,
                    score: hit.similarity,
                })
            })
            .collect();

        Ok(RecommendationResponse {
            user_id: request.user_id,
            mode,
            results,
            cached: false,
            degraded: false,
            generated_at: Utc::now(),
        })
    }

    /// User without a preference model and without a query: generic
    /// "popular, well-rated" intent re-ranked with item popularity.
    async fn cold_start(
        &self,
        request: &RecommendationRequest,
        max_results: usize,
        exclude: &HashSet<ItemId>,
    ) -> Result<RecommendationResponse> {
        let generic = self.embedder.generate_embedding(&self.blender.cold_start_query).await?;
        let hits = self
            .vector_db
            .find_similar(&generic.vector, 0.0, self.search.max_results_limit, exclude)
            .await?;

        let mut results: Vec<RankedResult> = hits
            .into_iter()
            .filter_map(|hit| {
                let item = self.vector_db.get_item(&hit.item_id)?;
                let score = cold_start_score(
                    hit.similarity,
                    item.popularity_score,
                    self.blender.cold_start_popularity_weight,
                );
                Some(RankedResult {
                    explanation: popularity_explanation(&item, &self.blender),
                    item_id: hit.item_id,
                    name: hit.name,
                    brand: hit.brand,
                    scent_families: hit.scent_families,
                    similarity: hit.similarity,
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.item_id.cmp(&b.item_id)));
        results.truncate(max_results);

        // Catalog items still waiting for vectors are better than nothing.
        if results.is_empty() {
            results = self.popularity_results(max_results, exclude);
        }

        Ok(RecommendationResponse {
            user_id: request.user_id,
            mode: RecommendationMode::ColdStart,
            results,
            cached: false,
            degraded: false,
            generated_at: Utc::now(),
        })
    }

    fn popularity_results(&self, max_results: usize, exclude: &HashSet<ItemId>) -> Vec<RankedResult> {
        self.vector_db
            .popular_items(max_results, exclude)
            .into_iter()
            .map(|item| RankedResult {
                explanation: popularity_explanation(&item, &self.blender),
                similarity: 0.0,
                score: item.popularity_score,
                scent_families: item.tags.scent_families,
                item_id: item.item_id,
                name: item.name,
                brand: item.brand,
            })
            .collect()
    }

    fn fallback(&self, request: &RecommendationRequest) -> RecommendationResponse {
        let max_results = request.max_results.unwrap_or(self.search.default_max_results);
        let exclude: HashSet<ItemId> = request.exclude_ids.iter().cloned().collect();

        RecommendationResponse {
            user_id: request.user_id,
            mode: RecommendationMode::Fallback,
            results: self.popularity_results(max_results, &exclude),
            cached: false,
            degraded: true,
            generated_at: Utc::now(),
        }
    }
}
