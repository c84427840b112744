pub mod hashing;
pub mod http;

pub use hashing::HashEmbeddingProvider;
pub use http::HttpEmbeddingProvider;

use crate::algorithms::{Admission, CircuitBreaker};
use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::{RecError, Result};
use crate::models::EmbeddingResult;
use crate::utils::metrics::EmbeddingCallMetric;
use crate::utils::{normalize_vector, retry_with_backoff, truncate_chars};
use crate::utils::validation::validate_vector;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Raw provider output before dimension checks and normalization.
#[derive(Debug, Clone)]
pub struct ProviderEmbedding {
    pub vector: Vec<f32>,
    pub tokens: u64,
}

/// Text in, fixed-length vector out.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn max_input_chars(&self) -> usize;

    async fn embed(&self, text: &str, dimension: usize) -> Result<ProviderEmbedding>;
}

struct ProviderSlot {
    provider: Arc<dyn EmbeddingProvider>,
    cost_per_1k_tokens: f64,
}

/// Multi-provider embedding client: primary first, retries for transient
/// errors, failover down the list, circuit breaker per provider.
pub struct EmbeddingClient {
    providers: Vec<ProviderSlot>,
    breaker: Arc<CircuitBreaker>,
    dimension: usize,
    max_attempts: usize,
    backoff_base: Duration,
    timeout: Duration,
    metrics_tx: Option<mpsc::Sender<EmbeddingCallMetric>>,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut providers: Vec<(Arc<dyn EmbeddingProvider>, f64)> = Vec::new();

        for provider_config in &config.providers {
            let provider: Arc<dyn EmbeddingProvider> = match provider_config.kind {
                ProviderKind::LocalHash => Arc::new(HashEmbeddingProvider::new(
                    provider_config.name.clone(),
                    provider_config.max_input_chars,
                )),
                ProviderKind::OpenAi | ProviderKind::Voyage => {
                    Arc::new(HttpEmbeddingProvider::new(provider_config, config.timeout())?)
                }
            };
            providers.push((provider, provider_config.cost_per_1k_tokens));
        }

        if providers.is_empty() {
            return Err(RecError::validation("at least one embedding provider must be configured"));
        }

        info!(
            providers = ?config.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            dimension = config.dimension,
            "Initialized embedding client"
        );

        Ok(Self::new(providers, config))
    }

    pub fn new(providers: Vec<(Arc<dyn EmbeddingProvider>, f64)>, config: &EmbeddingConfig) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|(provider, cost_per_1k_tokens)| ProviderSlot {
                    provider,
                    cost_per_1k_tokens,
                })
                .collect(),
            breaker: Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
            dimension: config.dimension,
            max_attempts: config.max_attempts.max(1) as usize,
            backoff_base: config.backoff_base(),
            timeout: config.timeout(),
            metrics_tx: None,
        }
    }

    pub fn with_metrics(mut self, tx: mpsc::Sender<EmbeddingCallMetric>) -> Self {
        self.metrics_tx = Some(tx);
        self
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|s| s.provider.name().to_string()).collect()
    }

    pub async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RecError::validation("text to embed cannot be empty"));
        }

        let mut attempted = Vec::with_capacity(self.providers.len());
        let mut last_error = String::from("no provider admitted the call");

        for slot in &self.providers {
            let name = slot.provider.name();
            let max_attempts = match self.breaker.admit(name) {
                Admission::Full => self.max_attempts,
                Admission::SingleAttempt => 1,
                Admission::Rejected => {
                    debug!(provider = name, "circuit open, skipping provider");
                    attempted.push(format!("{} (circuit open)", name));
                    continue;
                }
            };

            let input = truncate_chars(text, slot.provider.max_input_chars().max(1));
            let started = Instant::now();
            let mut attempts_made = 0u32;

            let outcome = retry_with_backoff(
                |attempt| {
                    attempts_made = attempt as u32;
                    self.call_provider(slot, input)
                },
                max_attempts,
                self.backoff_base,
                RecError::is_transient,
            )
            .await;

            let latency_ms = started.elapsed().as_millis() as u64;
            attempted.push(name.to_string());

            match outcome {
                Ok(embedding) => {
                    self.breaker.record_success(name);
                    let cost_usd = embedding.tokens as f64 / 1000.0 * slot.cost_per_1k_tokens;
                    self.emit_metric(name, true, attempts_made, latency_ms, cost_usd);
                    debug!(provider = name, latency_ms, attempts = attempts_made, "embedding generated");

                    return Ok(EmbeddingResult {
                        dimensionality: embedding.vector.len(),
                        vector: embedding.vector,
                        provider: name.to_string(),
                        cost_usd,
                        latency_ms,
                    });
                }
                Err(e) => {
                    self.breaker.record_failure(name);
                    self.emit_metric(name, false, attempts_made, latency_ms, 0.0);
                    warn!(provider = name, attempts = attempts_made, error = %e, "embedding provider failed, failing over");
                    last_error = e.to_string();
                }
            }
        }

        Err(RecError::ProviderExhausted { attempted, last_error })
    }

    async fn call_provider(&self, slot: &ProviderSlot, text: &str) -> Result<ProviderEmbedding> {
        let name = slot.provider.name();
        let mut embedding = tokio::time::timeout(self.timeout, slot.provider.embed(text, self.dimension))
            .await
            .map_err(|_| RecError::Timeout {
                operation: format!("embedding via {}", name),
                after_ms: self.timeout.as_millis() as u64,
            })??;

        // Never pad or truncate: a wrong-sized vector is a provider failure.
        validate_vector(&embedding.vector, self.dimension, "provider embedding").map_err(|e| {
            RecError::ProviderRejected {
                provider: name.to_string(),
                message: e.to_string(),
            }
        })?;

        normalize_vector(&mut embedding.vector);
        Ok(embedding)
    }

    fn emit_metric(&self, provider: &str, success: bool, attempts: u32, latency_ms: u64, cost_usd: f64) {
        let Some(tx) = &self.metrics_tx else {
            return;
        };
        let metric = EmbeddingCallMetric {
            provider: provider.to_string(),
            success,
            attempts,
            latency_ms,
            cost_usd,
            timestamp: Utc::now(),
        };
        if tx.try_send(metric).is_err() {
            debug!(provider, "metrics channel full or closed, dropping record");
        }
    }
}
