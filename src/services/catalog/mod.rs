use crate::config::CatalogConfig;
use crate::error::{RecError, Result};
use crate::models::{Item, ItemId, PendingEmbedding};
use crate::services::embedding::EmbeddingClient;
use crate::services::store::ItemStore;
use crate::services::vector_db::VectorDbService;
use crate::utils::validation::{validate_item, validate_vector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub oldest_queued_at: Option<DateTime<Utc>>,
    pub items: Vec<PendingEmbedding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    /// Vector supplied by the caller.
    Provided,
    /// Text unchanged, previous vector kept.
    Reused,
    Generated,
    /// Embedding failed; the item waits in the pending queue.
    Queued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub item_id: ItemId,
    pub content_hash: u64,
    pub status: EmbeddingStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
}

/// Keeps item vectors in step with item text. Re-embeds only when the
/// embedding text changes; failures are parked in a retry queue.
///
/// The item store is the source of truth. The similarity index is a
/// process-local copy, loaded by `sync_from_store` and written through on
/// every change made here.
pub struct CatalogService {
    vector_db: Arc<VectorDbService>,
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn ItemStore>,
    config: CatalogConfig,
}

impl CatalogService {
    pub fn new(
        vector_db: Arc<VectorDbService>,
        embedder: Arc<EmbeddingClient>,
        store: Arc<dyn ItemStore>,
        config: CatalogConfig,
    ) -> Self {
        Self {
            vector_db,
            embedder,
            store,
            config,
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector_db.dimension()
    }

    pub async fn upsert_item(&self, mut item: Item) -> Result<UpsertOutcome> {
        validate_item(&item)?;
        item.content_hash = item.compute_content_hash();
        item.updated_at = Utc::now();

        let mut failure = None;
        let status = if item.is_embedded() {
            validate_vector(&item.embedding, self.vector_db.dimension(), "item vector")?;
            EmbeddingStatus::Provided
        } else {
            match self.store.get_item(&item.item_id).await? {
                Some(existing) if existing.is_embedded() && existing.content_hash == item.content_hash => {
                    item.embedding = existing.embedding;
                    EmbeddingStatus::Reused
                }
                _ => match self.embedder.generate_embedding(&item.embedding_text()).await {
                    Ok(result) => {
                        item.embedding = result.vector;
                        EmbeddingStatus::Generated
                    }
                    Err(RecError::Validation(message)) => return Err(RecError::Validation(message)),
                    Err(e) => {
                        warn!(item_id = %item.item_id, error = %e, "embedding failed, queueing item");
                        failure = Some(e.to_string());
                        EmbeddingStatus::Queued
                    }
                },
            }
        };

        // The row goes first so a retry never sees a queue entry without its item.
        self.store.put_item(&item).await?;
        match &failure {
            Some(error) => self.store.mark_pending(&item.item_id, error).await?,
            None => self.store.clear_pending(&item.item_id).await?,
        }

        let outcome = UpsertOutcome {
            item_id: item.item_id.clone(),
            content_hash: item.content_hash,
            status,
        };
        self.vector_db.put_item(item).await?;
        Ok(outcome)
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<bool> {
        let stored = self.store.delete_item(item_id).await?;
        let local = self.vector_db.remove_item(item_id).await?;
        Ok(stored || local)
    }

    pub fn get_item(&self, item_id: &str) -> Option<Item> {
        self.vector_db.get_item(item_id)
    }

    /// Items for `ids`, served from the local copy. Items another process
    /// added since the last sync are read from the store and cached locally.
    pub async fn resolve_items<'a>(&self, ids: impl IntoIterator<Item = &'a ItemId>) -> Result<HashMap<ItemId, Item>> {
        let ids: Vec<&ItemId> = ids.into_iter().collect();
        let mut items = self.vector_db.get_items(ids.iter().copied());

        for id in ids {
            if items.contains_key(id) {
                continue;
            }
            if let Some(item) = self.store.get_item(id).await? {
                debug!(item_id = %id, "loaded item missing from local index");
                if let Err(e) = self.vector_db.put_item(item.clone()).await {
                    warn!(item_id = %id, error = %e, "stored item rejected by local index");
                    continue;
                }
                items.insert(id.clone(), item);
            }
        }
        Ok(items)
    }

    /// Brings the local index in line with the item store. Returns how many
    /// items were added, replaced or dropped.
    pub async fn sync_from_store(&self) -> Result<usize> {
        let stored = self.store.list_items().await?;
        let mut seen = HashSet::with_capacity(stored.len());
        let mut changed = 0;

        for item in stored {
            seen.insert(item.item_id.clone());
            let stale = match self.vector_db.get_item(&item.item_id) {
                Some(local) => {
                    local.updated_at != item.updated_at
                        || local.content_hash != item.content_hash
                        || local.is_embedded() != item.is_embedded()
                }
                None => true,
            };
            if !stale {
                continue;
            }
            let item_id = item.item_id.clone();
            match self.vector_db.put_item(item).await {
                Ok(()) => changed += 1,
                Err(e) => warn!(%item_id, error = %e, "skipping stored item"),
            }
        }

        for item_id in self.vector_db.item_ids() {
            if !seen.contains(&item_id) {
                self.vector_db.remove_item(&item_id).await?;
                changed += 1;
            }
        }

        if changed > 0 {
            info!(changed, items = self.vector_db.item_count(), "Synced catalog from store");
        }
        Ok(changed)
    }

    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let pending = self.store.list_pending().await?;
        Ok(QueueStatus {
            pending: pending.len(),
            oldest_queued_at: pending.iter().map(|p| p.queued_at).min(),
            items: pending,
        })
    }

    /// Retries up to `pending_batch_size` queued items, oldest first.
    pub async fn process_pending(&self) -> Result<ProcessReport> {
        let batch: Vec<PendingEmbedding> = self
            .store
            .list_pending()
            .await?
            .into_iter()
            .take(self.config.pending_batch_size.max(1))
            .collect();

        let mut report = ProcessReport::default();
        for entry in batch {
            report.processed += 1;

            let Some(mut item) = self.store.get_item(&entry.item_id).await? else {
                self.store.clear_pending(&entry.item_id).await?;
                continue;
            };
            if item.is_embedded() {
                self.store.clear_pending(&entry.item_id).await?;
                self.vector_db.put_item(item).await?;
                report.succeeded += 1;
                continue;
            }

            match self.embedder.generate_embedding(&item.embedding_text()).await {
                Ok(result) => {
                    item.embedding = result.vector;
                    item.updated_at = Utc::now();
                    self.store.put_item(&item).await?;
                    self.store.clear_pending(&entry.item_id).await?;
                    self.vector_db.put_item(item).await?;
                    report.succeeded += 1;
                }
                Err(e) => {
                    self.store.mark_pending(&entry.item_id, &e.to_string()).await?;
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.store.list_pending().await?.len();
        if report.processed > 0 {
            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                remaining = report.remaining,
                "Processed pending embeddings"
            );
        }
        Ok(report)
    }
}
