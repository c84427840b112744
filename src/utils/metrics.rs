use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One record per provider tried during a `generate_embedding` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCallMetric {
    pub provider: String,
    pub success: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub attempts: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
    pub total_cost_usd: f64,
}

impl ProviderStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.successes as f64 / self.calls as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct ProviderMetrics {
    stats: DashMap<String, ProviderStats>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, metric: &EmbeddingCallMetric) {
        let mut stats = self.stats.entry(metric.provider.clone()).or_insert_with(ProviderStats::default);
        stats.calls += 1;
        stats.attempts += metric.attempts as u64;
        if metric.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_latency_ms += metric.latency_ms;
        stats.max_latency_ms = stats.max_latency_ms.max(metric.latency_ms);
        stats.total_cost_usd += metric.cost_usd;
    }

    pub fn get(&self, provider: &str) -> Option<ProviderStats> {
        self.stats.get(provider).map(|s| s.clone())
    }

    pub fn snapshot(&self) -> HashMap<String, ProviderStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drains metric records from the embedding client until the channel closes.
    pub fn spawn_collector(self: Arc<Self>, mut rx: mpsc::Receiver<EmbeddingCallMetric>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(metric) = rx.recv().await {
                tracing::debug!(
                    provider = %metric.provider,
                    success = metric.success,
                    latency_ms = metric.latency_ms,
                    cost_usd = metric.cost_usd,
                    "embedding call"
                );
                self.record(&metric);
            }
        })
    }
}

/// Request counters and latency for the recommendation path.
#[derive(Debug, Default)]
pub struct ServingStats {
    counters: DashMap<String, u64>,
}

impl ServingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: &str) {
        *self.counters.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    pub fn record_latency(&self, latency_ms: u64) {
        let request_count = self.get("total_requests").max(1);
        let current_avg = self.get("avg_latency_ms");

        let new_avg = if request_count == 1 {
            latency_ms
        } else {
            (current_avg * (request_count - 1) + latency_ms) / request_count
        };
        self.counters.insert("avg_latency_ms".to_string(), new_avg);

        let current_max = self.get("max_latency_ms");
        if latency_ms > current_max {
            self.counters.insert("max_latency_ms".to_string(), latency_ms);
        }
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
