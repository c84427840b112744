use crate::config::RedisConfig;
use crate::error::Result;
use crate::models::{CacheEntry, CacheKey, RecommendationResponse};
use chrono::Utc;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Keyed TTL cache of recommendation sets.
#[async_trait::async_trait]
pub trait RecommendationCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<RecommendationResponse>>;

    async fn put(&self, key: CacheKey, response: &RecommendationResponse) -> Result<()>;

    /// Drops every entry belonging to `user_id`.
    async fn invalidate_user(&self, user_id: Uuid) -> Result<u64>;

    /// Removes expired entries and returns how many were removed.
    async fn cleanup_expired(&self) -> Result<u64>;
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

#[derive(Debug)]
pub struct InMemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: chrono::Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono_ttl(ttl),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl RecommendationCache for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<RecommendationResponse>> {
        let now = Utc::now();
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.response.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(hit)
    }

    async fn put(&self, key: CacheKey, response: &RecommendationResponse) -> Result<()> {
        let now = Utc::now();
        self.entries.insert(
            key,
            CacheEntry {
                key,
                response: response.clone(),
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn invalidate_user(&self, user_id: Uuid) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.user_id != Some(user_id));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len()) as u64;
        if removed > 0 {
            debug!(removed, "removed expired cache entries");
        }
        Ok(removed)
    }
}

/// Redis-backed cache. Entries carry a native `EX` expiry, and a per-user
/// index set makes `invalidate_user` a single round of deletes.
pub struct RedisCache {
    client: Arc<redis::Client>,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisCache {
    pub fn new(config: &RedisConfig, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        info!("Using Redis recommendation cache at {}", config.url);
        Ok(Self {
            client: Arc::new(client),
            key_prefix: config.key_prefix.clone(),
            ttl_seconds: ttl.as_secs().max(1),
        })
    }

    fn entry_key(&self, key: &CacheKey) -> String {
        match key.user_id {
            Some(user_id) => format!("{}:rec:{}:{:016x}", self.key_prefix, user_id, key.context_hash),
            None => format!("{}:rec:anon:{:016x}", self.key_prefix, key.context_hash),
        }
    }

    fn user_index_key(&self, user_id: Uuid) -> String {
        format!("{}:rec-index:{}", self.key_prefix, user_id)
    }
}

#[async_trait::async_trait]
impl RecommendationCache for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<RecommendationResponse>> {
        let mut conn = self.client.get_async_connection().await?;
        let cached: Option<String> = conn.get(self.entry_key(key)).await?;
        match cached {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: CacheKey, response: &RecommendationResponse) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let entry_key = self.entry_key(&key);
        let payload = serde_json::to_string(response)?;

        let _: () = conn.set_ex(&entry_key, payload, self.ttl_seconds).await?;

        if let Some(user_id) = key.user_id {
            let index_key = self.user_index_key(user_id);
            let _: () = conn.sadd(&index_key, &entry_key).await?;
            let _: () = redis::cmd("EXPIRE")
                .arg(&index_key)
                .arg(self.ttl_seconds)
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn invalidate_user(&self, user_id: Uuid) -> Result<u64> {
        let mut conn = self.client.get_async_connection().await?;
        let index_key = self.user_index_key(user_id);
        let keys: Vec<String> = conn.smembers(&index_key).await?;

        let removed: u64 = if keys.is_empty() {
            0
        } else {
            conn.del(&keys).await?
        };
        let _: () = conn.del(&index_key).await?;
        Ok(removed)
    }

    /// Redis expires the entries themselves. What is left to clean are the
    /// per-user index sets, which outlive the entries they point at while
    /// the user keeps being served. Returns the number of pruned references.
    async fn cleanup_expired(&self) -> Result<u64> {
        let mut conn = self.client.get_async_connection().await?;

        let index_keys: Vec<String> = {
            let pattern = format!("{}:rec-index:*", self.key_prefix);
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut pruned = 0u64;
        for index_key in index_keys {
            let members: Vec<String> = conn.smembers(&index_key).await?;
            for entry_key in members {
                let alive: bool = conn.exists(&entry_key).await?;
                if !alive {
                    let removed: u64 = conn.srem(&index_key, &entry_key).await?;
                    pruned += removed;
                }
            }
        }

        if pruned > 0 {
            debug!(pruned, "pruned expired entries from user cache indexes");
        }
        Ok(pruned)
    }
}
