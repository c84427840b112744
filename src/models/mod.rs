use crate::error::{RecError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// Catalog identifier, e.g. `"dior__sauvage"`.
pub type ItemId = String;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemTags {
    #[serde(default)]
    pub scent_families: Vec<String>,
    #[serde(default)]
    pub price_tier: Option<String>,
    #[serde(default)]
    pub occasions: Vec<String>,
    #[serde(default)]
    pub seasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub name: String,
    pub brand: String,
    pub description: String,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub tags: ItemTags,
    #[serde(default)]
    pub rating_value: Option<f32>,
    #[serde(default)]
    pub rating_count: u32,
    #[serde(default)]
    pub popularity_score: f32,
    /// Empty until the catalog has embedded the item.
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub content_hash: u64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(item_id: impl Into<ItemId>, name: impl Into<String>, brand: impl Into<String>, description: impl Into<String>) -> Self {
        let mut item = Self {
            item_id: item_id.into(),
            name: name.into(),
            brand: brand.into(),
            description: description.into(),
            notes: Vec::new(),
            tags: ItemTags::default(),
            rating_value: None,
            rating_count: 0,
            popularity_score: 0.0,
            embedding: Vec::new(),
            content_hash: 0,
            updated_at: Utc::now(),
        };
        item.content_hash = item.compute_content_hash();
        item
    }

    pub fn with_scent_families(mut self, families: &[&str]) -> Self {
        self.tags.scent_families = families.iter().map(|f| f.to_lowercase()).collect();
        self.content_hash = self.compute_content_hash();
        self
    }

    pub fn with_notes(mut self, notes: &[&str]) -> Self {
        self.notes = notes.iter().map(|n| n.to_lowercase()).collect();
        self.content_hash = self.compute_content_hash();
        self
    }

    pub fn with_tags(mut self, tags: ItemTags) -> Self {
        self.tags = tags;
        self.content_hash = self.compute_content_hash();
        self
    }

    pub fn with_rating(mut self, rating_value: f32, rating_count: u32) -> Self {
        self.rating_value = Some(rating_value);
        self.rating_count = rating_count;
        self.popularity_score = popularity_from_ratings(rating_value, rating_count);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn is_embedded(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Text fed to the embedding provider. Only these fields influence the vector.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{} by {}.", self.name.trim(), self.brand.trim());
        if !self.description.trim().is_empty() {
            text.push(' ');
            text.push_str(self.description.trim());
        }
        if !self.tags.scent_families.is_empty() {
            text.push_str(&format!(" Scent families: {}.", self.tags.scent_families.join(", ")));
        }
        if !self.notes.is_empty() {
            text.push_str(&format!(" Notes: {}.", self.notes.join(", ")));
        }
        if !self.tags.occasions.is_empty() {
            text.push_str(&format!(" Occasions: {}.", self.tags.occasions.join(", ")));
        }
        if !self.tags.seasons.is_empty() {
            text.push_str(&format!(" Seasons: {}.", self.tags.seasons.join(", ")));
        }
        text
    }

    pub fn compute_content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.embedding_text().hash(&mut hasher);
        hasher.finish()
    }
}

/// Squashes the `rating * ln(reviews + 1)` priority score into [0, 1].
pub fn popularity_from_ratings(rating_value: f32, rating_count: u32) -> f32 {
    if rating_value <= 0.0 || rating_count == 0 {
        return 0.0;
    }
    let priority = (rating_value.clamp(0.0, 5.0) / 5.0) * ((rating_count as f32) + 1.0).ln();
    1.0 - (-priority / 5.0).exp()
}

/// An item whose embedding failed and waits for a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEmbedding {
    pub item_id: ItemId,
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    View,
    Rating,
    CollectionAdd,
    Search,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::View => "view",
            InteractionKind::Rating => "rating",
            InteractionKind::CollectionAdd => "collection_add",
            InteractionKind::Search => "search",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = RecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "view" => Ok(InteractionKind::View),
            "rating" => Ok(InteractionKind::Rating),
            "collection_add" => Ok(InteractionKind::CollectionAdd),
            "search" => Ok(InteractionKind::Search),
            other => Err(RecError::validation(format!("unknown interaction kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(default = "Uuid::new_v4")]
    pub interaction_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub item_id: Option<ItemId>,
    pub kind: InteractionKind,
    pub value: f64,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(user_id: Uuid, item_id: Option<ItemId>, kind: InteractionKind, value: f64) -> Self {
        Self {
            interaction_id: Uuid::new_v4(),
            user_id,
            item_id,
            kind,
            value,
            context: None,
            created_at: Utc::now(),
        }
    }

    pub fn rating(user_id: Uuid, item_id: impl Into<ItemId>, stars: u8) -> Self {
        Self::new(user_id, Some(item_id.into()), InteractionKind::Rating, stars as f64)
    }

    pub fn collection_add(user_id: Uuid, item_id: impl Into<ItemId>) -> Self {
        Self::new(user_id, Some(item_id.into()), InteractionKind::CollectionAdd, 1.0)
    }

    pub fn view(user_id: Uuid, item_id: impl Into<ItemId>, duration_ms: u64) -> Self {
        Self::new(user_id, Some(item_id.into()), InteractionKind::View, duration_ms as f64)
    }

    pub fn search(user_id: Uuid, query: &str) -> Self {
        Self::new(user_id, None, InteractionKind::Search, 1.0)
            .with_context(serde_json::json!({ "query": query }))
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferenceModel {
    pub user_id: Uuid,
    pub embedding: Vec<f32>,
    pub preference_strength: f32,
    pub interaction_count: u64,
    /// Scent families with positive affinity, strongest first.
    pub preferences: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub item_id: ItemId,
    pub similarity: f32,
    pub name: String,
    pub brand: String,
    pub scent_families: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub provider: String,
    pub dimensionality: usize,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub preference: f32,
    pub intent: f32,
}

impl BlendWeights {
    pub fn new(preference: f32, intent: f32) -> Self {
        Self { preference, intent }
    }

    /// Rescales so `preference + intent == 1`.
    pub fn normalized(&self) -> Result<Self> {
        if !self.preference.is_finite() || !self.intent.is_finite() {
            return Err(RecError::validation("blend weights must be finite"));
        }
        if self.preference < 0.0 || self.intent < 0.0 {
            return Err(RecError::validation("blend weights cannot be negative"));
        }
        let total = self.preference + self.intent;
        if total <= 0.0 {
            return Err(RecError::validation("blend weights cannot both be zero"));
        }
        Ok(Self {
            preference: self.preference / total,
            intent: self.intent / total,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendPreset {
    Hybrid,
    SimilarToLiked,
    Discovery,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub weights: Option<BlendWeights>,
    #[serde(default)]
    pub preset: Option<BlendPreset>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub exclude_ids: Vec<ItemId>,
    #[serde(default)]
    pub include_interacted: bool,
}

impl RecommendationRequest {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_weights(mut self, weights: BlendWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_preset(mut self, preset: BlendPreset) -> Self {
        self.preset = Some(preset);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn excluding(mut self, ids: Vec<ItemId>) -> Self {
        self.exclude_ids = ids;
        self
    }

    /// Hash of everything except the user, used as the cache context key.
    pub fn context_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.query
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .hash(&mut hasher);
        self.weights
            .map(|w| (w.preference.to_bits(), w.intent.to_bits()))
            .hash(&mut hasher);
        self.preset.hash(&mut hasher);
        self.max_results.hash(&mut hasher);
        self.threshold.map(f32::to_bits).hash(&mut hasher);
        let mut excluded = self.exclude_ids.clone();
        excluded.sort();
        excluded.hash(&mut hasher);
        self.include_interacted.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationMode {
    /// Preference and query intent combined.
    Blended,
    Personalized,
    Semantic,
    ColdStart,
    /// Generic popularity ranking served when the primary path failed.
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub item_id: ItemId,
    pub name: String,
    pub brand: String,
    pub scent_families: Vec<String>,
    pub similarity: f32,
    pub score: f32,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: Option<Uuid>,
    pub mode: RecommendationMode,
    pub results: Vec<RankedResult>,
    pub cached: bool,
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub user_id: Option<Uuid>,
    pub context_hash: u64,
}

impl CacheKey {
    pub fn for_request(request: &RecommendationRequest) -> Self {
        Self {
            user_id: request.user_id,
            context_hash: request.context_hash(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: RecommendationResponse,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_tracks_embedding_text_only() {
        let item = Item::new("dior__sauvage", "Sauvage", "Dior", "Fresh spicy bergamot")
            .with_scent_families(&["Fresh", "Spicy"]);
        let rated = item.clone().with_rating(4.3, 12_000);
        assert_eq!(item.content_hash, rated.content_hash);

        let rewritten = Item::new("dior__sauvage", "Sauvage", "Dior", "Ambroxan heavy")
            .with_scent_families(&["Fresh", "Spicy"]);
        assert_ne!(item.content_hash, rewritten.content_hash);

        let noted = item.clone().with_notes(&["Lavender"]);
        assert_ne!(item.content_hash, noted.content_hash);
        assert!(noted.embedding_text().contains("Notes: lavender."));

        let seasonal = item.clone().with_tags(ItemTags {
            seasons: vec!["summer".to_string()],
            ..item.tags.clone()
        });
        assert_ne!(item.content_hash, seasonal.content_hash);
    }

    #[test]
    fn test_popularity_is_monotone_and_bounded() {
        assert_eq!(popularity_from_ratings(4.5, 0), 0.0);
        let few = popularity_from_ratings(4.5, 10);
        let many = popularity_from_ratings(4.5, 10_000);
        assert!(few > 0.0 && few < many && many < 1.0);
        assert!(popularity_from_ratings(3.0, 10_000) < many);
    }

    #[test]
    fn test_blend_weights_normalized() {
        let weights = BlendWeights::new(3.0, 2.0).normalized().unwrap();
        assert!((weights.preference - 0.6).abs() < 1e-6);
        assert!((weights.intent - 0.4).abs() < 1e-6);
        assert!(BlendWeights::new(0.0, 0.0).normalized().is_err());
        assert!(BlendWeights::new(-0.1, 1.0).normalized().is_err());
    }

    #[test]
    fn test_context_hash_ignores_user_and_exclusion_order() {
        let a = RecommendationRequest::for_user(Uuid::new_v4())
            .with_query("Warm Woody")
            .excluding(vec!["b".to_string(), "a".to_string()]);
        let b = RecommendationRequest::for_user(Uuid::new_v4())
            .with_query("warm woody ")
            .excluding(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(a.context_hash(), b.context_hash());

        let c = a.clone().with_max_results(3);
        assert_ne!(a.context_hash(), c.context_hash());
    }

    #[test]
    fn test_interaction_kind_round_trips_through_str() {
        for kind in [
            InteractionKind::View,
            InteractionKind::Rating,
            InteractionKind::CollectionAdd,
            InteractionKind::Search,
        ] {
            assert_eq!(kind.as_str().parse::<InteractionKind>().unwrap(), kind);
        }
        assert!("purchase".parse::<InteractionKind>().is_err());
    }
}
