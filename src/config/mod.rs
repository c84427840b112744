use crate::models::BlendWeights;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub preference: PreferenceConfig,
    pub blender: BlenderConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub redis: RedisConfig,
    pub postgres: PostgresConfig,
    pub feedback: FeedbackConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Voyage,
    LocalHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. The key itself never lives in config.
    pub api_key_env: Option<String>,
    pub max_input_chars: usize,
    pub cost_per_1k_tokens: f64,
}

impl ProviderConfig {
    /// The offline feature-hashing provider, used as the last resort.
    pub fn local_hash(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ProviderKind::LocalHash,
            base_url: String::new(),
            model: "feature-hash".to_string(),
            api_key_env: None,
            max_input_chars: 8_000,
            cost_per_1k_tokens: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before a provider is marked degraded.
    pub degraded_after: u32,
    /// Consecutive failures before the circuit opens.
    pub open_after: u32,
    pub cool_down_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            degraded_after: 2,
            open_after: 4,
            cool_down_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub timeout_ms: u64,
    pub metrics_buffer: usize,
    pub providers: Vec<ProviderConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_threshold: f32,
    pub default_max_results: usize,
    pub max_results_limit: usize,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub parallelism: usize,
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DecayPolicy {
    None,
    /// Weights halve every `half_life_days`, measured back from the user's
    /// newest interaction.
    Exponential { half_life_days: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceConfig {
    pub rating_weight: f32,
    pub collection_weight: f32,
    pub view_weight: f32,
    pub view_saturation_ms: f32,
    /// `k` in `1 - exp(-signal / k)`.
    pub saturation_k: f32,
    pub diversity_bonus: f32,
    pub max_liked_categories: usize,
    pub decay: DecayPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlenderConfig {
    pub hybrid_weights: BlendWeights,
    pub similar_to_liked_weights: BlendWeights,
    pub discovery_weights: BlendWeights,
    pub high_similarity: f32,
    pub medium_similarity: f32,
    pub cold_start_query: String,
    pub cold_start_popularity_weight: f32,
    pub quality_min_rating: f32,
    pub quality_min_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Memory,
    Redis,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: Backend,
    pub ttl_seconds: u64,
    pub cleanup_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: Backend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub channel_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Users recomputed in parallel within one batch.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub pending_batch_size: usize,
    /// Period of pending-embedding retries and of the sync from the item store.
    pub retry_interval_secs: u64,
}

impl CatalogConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
            },
            embedding: EmbeddingConfig {
                dimension: 2000,
                max_attempts: 3,
                backoff_base_ms: 100,
                timeout_ms: 5_000,
                metrics_buffer: 1024,
                providers: vec![
                    ProviderConfig {
                        name: "voyage".to_string(),
                        kind: ProviderKind::Voyage,
                        base_url: "https://api.voyageai.com/v1".to_string(),
                        model: "voyage-3-large".to_string(),
                        api_key_env: Some("VOYAGE_AI_API_KEY".to_string()),
                        max_input_chars: 32_000,
                        cost_per_1k_tokens: 0.00018,
                    },
                    ProviderConfig {
                        name: "openai".to_string(),
                        kind: ProviderKind::OpenAi,
                        base_url: "https://api.openai.com/v1".to_string(),
                        model: "text-embedding-3-large".to_string(),
                        api_key_env: Some("OPENAI_API_KEY".to_string()),
                        max_input_chars: 24_000,
                        cost_per_1k_tokens: 0.00013,
                    },
                    ProviderConfig::local_hash("local"),
                ],
                circuit_breaker: CircuitBreakerConfig::default(),
            },
            search: SearchConfig {
                default_threshold: 0.4,
                default_max_results: 10,
                max_results_limit: 100,
                timeout_ms: 1_000,
                max_retries: 1,
                parallelism: num_cpus::get(),
            },
            preference: PreferenceConfig {
                rating_weight: 1.0,
                collection_weight: 1.0,
                view_weight: 0.2,
                view_saturation_ms: 30_000.0,
                saturation_k: 5.0,
                diversity_bonus: 0.25,
                max_liked_categories: 5,
                decay: DecayPolicy::None,
            },
            blender: BlenderConfig {
                hybrid_weights: BlendWeights::new(0.6, 0.4),
                similar_to_liked_weights: BlendWeights::new(0.7, 0.3),
                discovery_weights: BlendWeights::new(0.3, 0.7),
                high_similarity: 0.8,
                medium_similarity: 0.6,
                cold_start_query: "popular highly rated versatile fragrance loved by many".to_string(),
                cold_start_popularity_weight: 0.3,
                quality_min_rating: 4.0,
                quality_min_count: 10,
            },
            cache: CacheConfig {
                backend: Backend::Memory,
                ttl_seconds: 300,
                cleanup_interval_secs: 60,
            },
            storage: StorageConfig {
                backend: Backend::Memory,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: "scentrec".to_string(),
            },
            postgres: PostgresConfig {
                url: "postgresql://localhost:5432/scentrec".to_string(),
                max_connections: 10,
            },
            feedback: FeedbackConfig {
                channel_capacity: 1000,
                batch_size: 64,
                flush_interval_ms: 2_000,
                concurrency: 8,
            },
            catalog: CatalogConfig {
                pending_batch_size: 16,
                retry_interval_secs: 30,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SCENTREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Configuration with a small vector dimension and only the local provider,
    /// for tests, demos and benchmarks that must not reach the network.
    pub fn local(dimension: usize) -> Self {
        let mut config = Self::default();
        config.embedding.dimension = dimension;
        config.embedding.backoff_base_ms = 1;
        config.embedding.providers = vec![ProviderConfig::local_hash("local")];
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_reference_values() {
        let config = Config::default();
        assert_eq!(config.embedding.dimension, 2000);
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.blender.hybrid_weights, BlendWeights::new(0.6, 0.4));
        assert_eq!(config.embedding.providers.len(), 3);
        assert_eq!(config.embedding.providers.last().map(|p| p.kind), Some(ProviderKind::LocalHash));
        assert!(config.server.socket_addr().is_ok());
    }

    #[test]
    fn test_shipped_config_file_ends_with_local_provider() {
        let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml")).unwrap();
        let kinds: Vec<ProviderKind> = config.embedding.providers.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![ProviderKind::Voyage, ProviderKind::OpenAi, ProviderKind::LocalHash]
        );
        assert_eq!(config.embedding.dimension, 2000);
        assert_eq!(config.catalog.retry_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_decay_policy_serde() {
        let policy: DecayPolicy =
            serde_json::from_str(r#"{"policy":"exponential","half_life_days":30.0}"#).unwrap();
        assert_eq!(policy, DecayPolicy::Exponential { half_life_days: 30.0 });

        let none: DecayPolicy = serde_json::from_str(r#"{"policy":"none"}"#).unwrap();
        assert_eq!(none, DecayPolicy::None);
    }
}
