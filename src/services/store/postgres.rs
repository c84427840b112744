use super::{sort_log, ItemStore, InteractionStore, PreferenceStore};
use crate::config::PostgresConfig;
use crate::error::{RecError, Result};
use crate::models::{Interaction, InteractionKind, Item, ItemId, PendingEmbedding, UserPreferenceModel};
use crate::utils::validation::validate_vector;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS user_interactions (
        interaction_id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        item_id TEXT,
        kind TEXT NOT NULL,
        value DOUBLE PRECISION NOT NULL,
        context TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    )"#,
    "ALTER TABLE user_interactions ADD COLUMN IF NOT EXISTS recorded_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()",
    "CREATE INDEX IF NOT EXISTS user_interactions_user_idx ON user_interactions (user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS user_interactions_recorded_idx ON user_interactions (recorded_at)",
    r#"CREATE TABLE IF NOT EXISTS user_preferences (
        user_id UUID PRIMARY KEY,
        embedding TEXT NOT NULL,
        preference_strength REAL NOT NULL,
        interaction_count BIGINT NOT NULL,
        preferences TEXT NOT NULL,
        last_updated TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS catalog_items (
        item_id TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS pending_embeddings (
        item_id TEXT PRIMARY KEY,
        attempts INTEGER NOT NULL,
        last_error TEXT NOT NULL,
        queued_at TIMESTAMPTZ NOT NULL
    )"#,
];

#[derive(Debug, sqlx::FromRow)]
struct InteractionRow {
    interaction_id: Uuid,
    user_id: Uuid,
    item_id: Option<String>,
    kind: String,
    value: f64,
    context: Option<String>,
    created_at: DateTime<Utc>,
}

impl InteractionRow {
    fn into_interaction(self) -> Result<Interaction> {
        let context = match self.context {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Interaction {
            interaction_id: self.interaction_id,
            user_id: self.user_id,
            item_id: self.item_id,
            kind: self.kind.parse::<InteractionKind>()?,
            value: self.value,
            context,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PreferenceRow {
    user_id: Uuid,
    embedding: String,
    preference_strength: f32,
    interaction_count: i64,
    preferences: String,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    item_id: String,
    attempts: i32,
    last_error: String,
    queued_at: DateTime<Utc>,
}

impl From<PendingRow> for PendingEmbedding {
    fn from(row: PendingRow) -> Self {
        Self {
            item_id: row.item_id,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            queued_at: row.queued_at,
        }
    }
}

/// PostgreSQL-backed catalog, interaction log and preference table. Vectors are
/// stored as JSON arrays and checked against the configured dimension on
/// every read and write.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    dimension: usize,
}

impl PgStore {
    pub async fn connect(config: &PostgresConfig, dimension: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL with {} max connections", config.max_connections);
        Ok(Self { pool, dimension })
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn decode_preference(&self, row: PreferenceRow) -> Result<UserPreferenceModel> {
        let embedding: Vec<f32> = serde_json::from_str(&row.embedding)?;
        validate_vector(&embedding, self.dimension, "stored preference vector")
            .map_err(|e| RecError::Internal(format!("corrupt preference row for {}: {}", row.user_id, e)))?;

        Ok(UserPreferenceModel {
            user_id: row.user_id,
            embedding,
            preference_strength: row.preference_strength,
            interaction_count: row.interaction_count.max(0) as u64,
            preferences: serde_json::from_str(&row.preferences)?,
            last_updated: row.last_updated,
        })
    }

    fn decode_item(&self, body: &str) -> Result<Item> {
        let item: Item = serde_json::from_str(body)?;
        if item.is_embedded() {
            validate_vector(&item.embedding, self.dimension, "stored item vector")
                .map_err(|e| RecError::Internal(format!("corrupt catalog row for {}: {}", item.item_id, e)))?;
        }
        Ok(item)
    }
}

#[async_trait::async_trait]
impl InteractionStore for PgStore {
    async fn append(&self, interaction: &Interaction) -> Result<()> {
        let context = interaction
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO user_interactions \
             (interaction_id, user_id, item_id, kind, value, context, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (interaction_id) DO NOTHING",
        )
        .bind(interaction.interaction_id)
        .bind(interaction.user_id)
        .bind(interaction.item_id.as_deref())
        .bind(interaction.kind.as_str())
        .bind(interaction.value)
        .bind(context)
        .bind(interaction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Interaction>> {
        let rows = sqlx::query_as::<_, InteractionRow>(
            "SELECT interaction_id, user_id, item_id, kind, value, context, created_at \
             FROM user_interactions WHERE user_id = $1 \
             ORDER BY created_at ASC, interaction_id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut log = rows
            .into_iter()
            .map(InteractionRow::into_interaction)
            .collect::<Result<Vec<_>>>()?;
        sort_log(&mut log);
        Ok(log)
    }

    async fn interacted_item_ids(&self, user_id: Uuid) -> Result<HashSet<ItemId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT item_id FROM user_interactions WHERE user_id = $1 AND item_id IS NOT NULL",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn active_users_since(&self, since: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let users: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM user_interactions WHERE recorded_at > $1 ORDER BY user_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_interactions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl PreferenceStore for PgStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserPreferenceModel>> {
        let row = sqlx::query_as::<_, PreferenceRow>(
            "SELECT user_id, embedding, preference_strength, interaction_count, preferences, last_updated \
             FROM user_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decode_preference(r)).transpose()
    }

    async fn put(&self, model: &UserPreferenceModel) -> Result<()> {
        validate_vector(&model.embedding, self.dimension, "preference vector")?;

        sqlx::query(
            "INSERT INTO user_preferences \
             (user_id, embedding, preference_strength, interaction_count, preferences, last_updated) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO UPDATE SET \
             embedding = EXCLUDED.embedding, \
             preference_strength = EXCLUDED.preference_strength, \
             interaction_count = EXCLUDED.interaction_count, \
             preferences = EXCLUDED.preferences, \
             last_updated = EXCLUDED.last_updated",
        )
        .bind(model.user_id)
        .bind(serde_json::to_string(&model.embedding)?)
        .bind(model.preference_strength)
        .bind(model.interaction_count as i64)
        .bind(serde_json::to_string(&model.preferences)?)
        .bind(model.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ItemStore for PgStore {
    async fn put_item(&self, item: &Item) -> Result<()> {
        if item.is_embedded() {
            validate_vector(&item.embedding, self.dimension, "item vector")?;
        }

        sqlx::query(
            "INSERT INTO catalog_items (item_id, body, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (item_id) DO UPDATE SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at",
        )
        .bind(&item.item_id)
        .bind(serde_json::to_string(item)?)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM catalog_items WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        body.map(|b| self.decode_item(&b)).transpose()
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let bodies: Vec<String> = sqlx::query_scalar("SELECT body FROM catalog_items ORDER BY item_id")
            .fetch_all(&self.pool)
            .await?;

        bodies.iter().map(|b| self.decode_item(b)).collect()
    }

    async fn delete_item(&self, item_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pending_embeddings WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM catalog_items WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_pending(&self, item_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_embeddings (item_id, attempts, last_error, queued_at) \
             VALUES ($1, 1, $2, $3) \
             ON CONFLICT (item_id) DO UPDATE SET \
             attempts = pending_embeddings.attempts + 1, \
             last_error = EXCLUDED.last_error",
        )
        .bind(item_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_pending(&self, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_embeddings WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingEmbedding>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            "SELECT item_id, attempts, last_error, queued_at FROM pending_embeddings \
             ORDER BY queued_at ASC, item_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PendingEmbedding::from).collect())
    }
}
