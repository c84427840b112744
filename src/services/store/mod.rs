pub mod postgres;

pub use postgres::PgStore;

use crate::config::{Backend, Config};
use crate::error::Result;
use crate::models::{Interaction, Item, ItemId, PendingEmbedding, UserPreferenceModel};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Append-only interaction log.
#[async_trait::async_trait]
pub trait InteractionStore: Send + Sync {
    async fn append(&self, interaction: &Interaction) -> Result<()>;

    /// The user's full log, oldest first, ties ordered by interaction id.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Interaction>>;

    async fn interacted_item_ids(&self, user_id: Uuid) -> Result<HashSet<ItemId>>;

    /// Users with at least one interaction recorded after `since`. Uses the
    /// store's own ingestion time, never the client-supplied `created_at`.
    async fn active_users_since(&self, since: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Only used for explicit user data erasure.
    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserPreferenceModel>>;

    async fn put(&self, model: &UserPreferenceModel) -> Result<()>;

    async fn delete(&self, user_id: Uuid) -> Result<bool>;
}

/// Durable catalog shared by every process: items with their vectors, and
/// the queue of items still waiting for an embedding.
#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    async fn put_item(&self, item: &Item) -> Result<()>;

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>>;

    async fn list_items(&self) -> Result<Vec<Item>>;

    /// Removes the item and any pending entry for it.
    async fn delete_item(&self, item_id: &str) -> Result<bool>;

    /// Queues the item, or bumps its attempt count when already queued.
    async fn mark_pending(&self, item_id: &str, error: &str) -> Result<()>;

    async fn clear_pending(&self, item_id: &str) -> Result<()>;

    /// Oldest first, ties ordered by item id.
    async fn list_pending(&self) -> Result<Vec<PendingEmbedding>>;
}

/// The three stores a process works against. Processes sharing one
/// backend see the same catalog, log and preference rows.
#[derive(Clone)]
pub struct Stores {
    pub interactions: Arc<dyn InteractionStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub items: Arc<dyn ItemStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            interactions: store.clone(),
            preferences: store.clone(),
            items: store,
        }
    }

    pub async fn connect(config: &Config) -> Result<Self> {
        match config.storage.backend {
            Backend::Postgres => {
                let store = Arc::new(PgStore::connect(&config.postgres, config.embedding.dimension).await?);
                store.migrate().await?;
                Ok(Self {
                    interactions: store.clone(),
                    preferences: store.clone(),
                    items: store,
                })
            }
            Backend::Memory | Backend::Redis => {
                info!("Using in-memory stores; data is local to this process");
                Ok(Self::in_memory())
            }
        }
    }
}

fn sort_pending(pending: &mut [PendingEmbedding]) {
    pending.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.item_id.cmp(&b.item_id)));
}

fn sort_log(log: &mut [Interaction]) {
    log.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.interaction_id.cmp(&b.interaction_id))
    });
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    interactions: DashMap<Uuid, Vec<Interaction>>,
    /// Ingestion time of each user's latest append.
    recorded: DashMap<Uuid, DateTime<Utc>>,
    preferences: DashMap<Uuid, UserPreferenceModel>,
    items: DashMap<ItemId, Item>,
    pending: DashMap<ItemId, PendingEmbedding>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InteractionStore for InMemoryStore {
    async fn append(&self, interaction: &Interaction) -> Result<()> {
        let mut log = self.interactions.entry(interaction.user_id).or_insert_with(Vec::new);
        log.push(interaction.clone());
        self.recorded.insert(interaction.user_id, Utc::now());
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Interaction>> {
        let mut log = self
            .interactions
            .get(&user_id)
            .map(|log| log.clone())
            .unwrap_or_default();
        sort_log(&mut log);
        Ok(log)
    }

    async fn interacted_item_ids(&self, user_id: Uuid) -> Result<HashSet<ItemId>> {
        Ok(self
            .interactions
            .get(&user_id)
            .map(|log| log.iter().filter_map(|i| i.item_id.clone()).collect())
            .unwrap_or_default())
    }

    async fn active_users_since(&self, since: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut users: Vec<Uuid> = self
            .recorded
            .iter()
            .filter(|entry| *entry.value() > since)
            .map(|entry| *entry.key())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64> {
        self.recorded.remove(&user_id);
        Ok(self
            .interactions
            .remove(&user_id)
            .map(|(_, log)| log.len() as u64)
            .unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl PreferenceStore for InMemoryStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserPreferenceModel>> {
        Ok(self.preferences.get(&user_id).map(|m| m.clone()))
    }

    async fn put(&self, model: &UserPreferenceModel) -> Result<()> {
        self.preferences.insert(model.user_id, model.clone());
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.preferences.remove(&user_id).is_some())
    }
}

#[async_trait::async_trait]
impl ItemStore for InMemoryStore {
    async fn put_item(&self, item: &Item) -> Result<()> {
        self.items.insert(item.item_id.clone(), item.clone());
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>> {
        Ok(self.items.get(item_id).map(|item| item.clone()))
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self.items.iter().map(|entry| entry.value().clone()).collect();
        items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(items)
    }

    async fn delete_item(&self, item_id: &str) -> Result<bool> {
        self.pending.remove(item_id);
        Ok(self.items.remove(item_id).is_some())
    }

    async fn mark_pending(&self, item_id: &str, error: &str) -> Result<()> {
        self.pending
            .entry(item_id.to_string())
            .and_modify(|entry| {
                entry.attempts += 1;
                entry.last_error = error.to_string();
            })
            .or_insert_with(|| PendingEmbedding {
                item_id: item_id.to_string(),
                attempts: 1,
                last_error: error.to_string(),
                queued_at: Utc::now(),
            });
        Ok(())
    }

    async fn clear_pending(&self, item_id: &str) -> Result<()> {
        self.pending.remove(item_id);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingEmbedding>> {
        let mut pending: Vec<PendingEmbedding> = self.pending.iter().map(|entry| entry.value().clone()).collect();
        sort_pending(&mut pending);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_log_is_ordered_and_scoped_per_user() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();

        store.append(&Interaction::rating(user, "b", 4).at(now)).await.unwrap();
        store
            .append(&Interaction::rating(user, "a", 5).at(now - Duration::minutes(5)))
            .await
            .unwrap();
        store.append(&Interaction::search(user, "iris")).await.unwrap();
        store.append(&Interaction::collection_add(other, "c")).await.unwrap();

        let log = store.list_for_user(user).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].item_id.as_deref(), Some("a"));

        let ids = store.interacted_item_ids(user).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains("c"));

        let active = store.active_users_since(now - Duration::minutes(1)).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.contains(&user));
        assert!(store
            .active_users_since(Utc::now() + Duration::minutes(1))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(store.delete_for_user(user).await.unwrap(), 3);
        assert!(store.list_for_user(user).await.unwrap().is_empty());
        assert_eq!(store.list_for_user(other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preference_put_replaces() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let mut model = UserPreferenceModel {
            user_id: user,
            embedding: vec![1.0, 0.0],
            preference_strength: 0.2,
            interaction_count: 1,
            preferences: vec![],
            last_updated: Utc::now(),
        };
        store.put(&model).await.unwrap();
        model.interaction_count = 2;
        store.put(&model).await.unwrap();

        assert_eq!(store.get(user).await.unwrap().unwrap().interaction_count, 2);
        assert!(store.delete(user).await.unwrap());
        assert!(store.get(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backdated_interactions_count_as_active() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let poll_started = Utc::now();

        let backdated = Interaction::rating(user, "a", 5).at(poll_started - Duration::days(3));
        store.append(&backdated).await.unwrap();

        assert_eq!(store.active_users_since(poll_started).await.unwrap(), vec![user]);

        store.delete_for_user(user).await.unwrap();
        assert!(store.active_users_since(poll_started).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_queue_counts_attempts() {
        let store = InMemoryStore::new();
        store.put_item(&Item::new("oud", "Oud", "House", "resin")).await.unwrap();
        store.put_item(&Item::new("iris", "Iris", "House", "powder")).await.unwrap();

        store.mark_pending("oud", "timeout").await.unwrap();
        store.mark_pending("iris", "503").await.unwrap();
        store.mark_pending("oud", "429").await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].queued_at <= pending[1].queued_at);
        let oud = pending.iter().find(|p| p.item_id == "oud").unwrap();
        assert_eq!(oud.attempts, 2);
        assert_eq!(oud.last_error, "429");

        store.clear_pending("iris").await.unwrap();
        assert!(store.delete_item("oud").await.unwrap());
        assert!(store.list_pending().await.unwrap().is_empty());
        assert_eq!(store.list_items().await.unwrap().len(), 1);
        assert!(store.get_item("oud").await.unwrap().is_none());
    }
}
