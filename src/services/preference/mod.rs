use crate::algorithms::preference::{compute_preference, PreferenceOutcome};
use crate::config::PreferenceConfig;
use crate::error::Result;
use crate::models::{Interaction, ItemId, UserPreferenceModel};
use crate::services::cache::RecommendationCache;
use crate::services::catalog::CatalogService;
use crate::services::store::{InteractionStore, PreferenceStore};
use crate::utils::validation::{validate_interaction, validate_preference_model};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErasureReport {
    pub interactions_removed: u64,
    pub model_removed: bool,
    pub cache_entries_removed: u64,
}

/// Owns the interaction log and the per-user preference vectors derived from it.
pub struct PreferenceService {
    interactions: Arc<dyn InteractionStore>,
    preferences: Arc<dyn PreferenceStore>,
    catalog: Arc<CatalogService>,
    cache: Arc<dyn RecommendationCache>,
    config: PreferenceConfig,
}

impl PreferenceService {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        preferences: Arc<dyn PreferenceStore>,
        catalog: Arc<CatalogService>,
        cache: Arc<dyn RecommendationCache>,
        config: PreferenceConfig,
    ) -> Self {
        Self {
            interactions,
            preferences,
            catalog,
            cache,
            config,
        }
    }

    pub async fn record_interaction(&self, interaction: &Interaction) -> Result<()> {
        validate_interaction(interaction)?;
        self.interactions.append(interaction).await?;
        debug!(
            user_id = %interaction.user_id,
            kind = %interaction.kind,
            item_id = ?interaction.item_id,
            "recorded interaction"
        );
        Ok(())
    }

    /// Recomputes the user's preference vector from the full log. Returns
    /// `false` when the log carries no usable signal; any model stored
    /// earlier is dropped then, since it no longer matches the log.
    pub async fn update_user_embedding(&self, user_id: Uuid) -> Result<bool> {
        let log = self.interactions.list_for_user(user_id).await?;
        let item_ids: HashSet<&ItemId> = log.iter().filter_map(|i| i.item_id.as_ref()).collect();
        let items = self.catalog.resolve_items(item_ids).await?;
        let dimension = self.catalog.dimension();

        let computed = match compute_preference(&log, &items, &self.config, dimension) {
            PreferenceOutcome::Computed(computed) => computed,
            PreferenceOutcome::NoSignal => {
                debug!(%user_id, interactions = log.len(), "no contributing interactions");
                self.drop_stale_model(user_id).await?;
                return Ok(false);
            }
            PreferenceOutcome::Cancelled { contributing } => {
                warn!(%user_id, contributing, "preference contributions cancelled out");
                self.drop_stale_model(user_id).await?;
                return Ok(false);
            }
        };

        let previous_count = self
            .preferences
            .get(user_id)
            .await?
            .map(|m| m.interaction_count)
            .unwrap_or(0);

        let model = UserPreferenceModel {
            user_id,
            embedding: computed.embedding,
            preference_strength: computed.strength,
            interaction_count: computed.interaction_count.max(previous_count),
            preferences: computed.liked_categories,
            last_updated: Utc::now(),
        };
        validate_preference_model(&model, dimension)?;
        self.preferences.put(&model).await?;
        self.invalidate_cache(user_id).await;

        info!(
            "Updated preference vector for user {} (strength {:.3}, {} interactions)",
            user_id, model.preference_strength, model.interaction_count
        );
        Ok(true)
    }

    async fn drop_stale_model(&self, user_id: Uuid) -> Result<()> {
        if self.preferences.delete(user_id).await? {
            info!("Dropped preference vector for user {}: log no longer carries a signal", user_id);
            self.invalidate_cache(user_id).await;
        }
        Ok(())
    }

    async fn invalidate_cache(&self, user_id: Uuid) {
        match self.cache.invalidate_user(user_id).await {
            Ok(removed) => debug!(%user_id, removed, "invalidated cached recommendations"),
            Err(e) => warn!(%user_id, error = %e, "failed to invalidate cached recommendations"),
        }
    }

    pub async fn get_model(&self, user_id: Uuid) -> Result<Option<UserPreferenceModel>> {
        self.preferences.get(user_id).await
    }

    pub async fn interacted_item_ids(&self, user_id: Uuid) -> Result<HashSet<ItemId>> {
        self.interactions.interacted_item_ids(user_id).await
    }

    pub async fn active_users_since(&self, since: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.interactions.active_users_since(since).await
    }

    /// Deletes the user's log, preference model and cached recommendations.
    pub async fn erase_user_data(&self, user_id: Uuid) -> Result<ErasureReport> {
        let report = ErasureReport {
            interactions_removed: self.interactions.delete_for_user(user_id).await?,
            model_removed: self.preferences.delete(user_id).await?,
            cache_entries_removed: self.cache.invalidate_user(user_id).await?,
        };
        info!("Erased data for user {}: {:?}", user_id, report);
        Ok(report)
    }
}
