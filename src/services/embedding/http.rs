use super::{EmbeddingProvider, ProviderEmbedding};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{RecError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Provider speaking the `/embeddings` JSON dialect shared by OpenAI and Voyage AI.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    name: String,
    kind: ProviderKind,
    endpoint: String,
    model: String,
    max_input_chars: usize,
    has_credentials: bool,
}

impl HttpEmbeddingProvider {
    /// Builds the provider, reading the API key from the environment variable
    /// named in `config`. A missing key is not fatal: calls are rejected
    /// without touching the network so failover moves on.
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| RecError::validation(format!("invalid API key for provider '{}'", config.name)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| RecError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            name: config.name.clone(),
            kind: config.kind,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_input_chars: config.max_input_chars,
            has_credentials: api_key.is_some() || config.api_key_env.is_none(),
        })
    }

    fn request_body(&self, text: &str, dimension: usize) -> serde_json::Value {
        match self.kind {
            ProviderKind::Voyage => serde_json::json!({
                "input": [text],
                "model": self.model,
                "input_type": "document",
                "output_dimension": dimension,
            }),
            _ => serde_json::json!({
                "input": [text],
                "model": self.model,
                "dimensions": dimension,
                "encoding_format": "float",
            }),
        }
    }

    fn transient(&self, message: impl Into<String>) -> RecError {
        RecError::ProviderTransient {
            provider: self.name.clone(),
            message: message.into(),
        }
    }

    fn rejected(&self, message: impl Into<String>) -> RecError {
        RecError::ProviderRejected {
            provider: self.name.clone(),
            message: message.into(),
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[async_trait::async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, text: &str, dimension: usize) -> Result<ProviderEmbedding> {
        if !self.has_credentials {
            return Err(self.rejected("no API key configured"));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(text, dimension))
            .send()
            .await
            .map_err(|e| self.transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        debug!(provider = %self.name, status = %status, "embedding response received");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = crate::utils::truncate_chars(&body, MAX_ERROR_BODY_CHARS);
            let message = format!("API returned {}: {}", status, body);
            return Err(if is_transient_status(status) {
                self.transient(message)
            } else {
                self.rejected(message)
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.transient(format!("failed to parse response: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| self.transient("response contained no embeddings"))?;

        let tokens = parsed
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| (text.split_whitespace().count() as u64).max(1));

        Ok(ProviderEmbedding { vector, tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_config(uri: &str, kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            name: "test".to_string(),
            kind,
            base_url: uri.to_string(),
            model: "test-embed".to_string(),
            api_key_env: None,
            max_input_chars: 1_000,
            cost_per_1k_tokens: 0.1,
        }
    }

    fn provider(uri: &str, kind: ProviderKind) -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(&provider_config(uri, kind), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_successful_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({ "dimensions": 3 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
                "usage": { "total_tokens": 7 }
            })))
            .mount(&server)
            .await;

        let result = provider(&server.uri(), ProviderKind::OpenAi).embed("bergamot", 3).await.unwrap();
        assert_eq!(result.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(result.tokens, 7);
    }

    #[tokio::test]
    async fn test_voyage_dialect_sends_output_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "output_dimension": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [1.0, 0.0] }]
            })))
            .mount(&server)
            .await;

        let result = provider(&server.uri(), ProviderKind::Voyage).embed("vetiver", 2).await.unwrap();
        assert_eq!(result.vector.len(), 2);
        assert_eq!(result.tokens, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = provider(&server.uri(), ProviderKind::OpenAi).embed("oud", 3).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = provider(&server.uri(), ProviderKind::OpenAi).embed("oud", 3).await.unwrap_err();
        assert!(matches!(err, RecError::ProviderRejected { .. }));
    }

    #[tokio::test]
    async fn test_missing_key_rejects_without_network() {
        let mut config = provider_config("http://127.0.0.1:9", ProviderKind::OpenAi);
        config.api_key_env = Some("SCENTREC_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        let provider = HttpEmbeddingProvider::new(&config, Duration::from_secs(1)).unwrap();
        let err = provider.embed("musk", 3).await.unwrap_err();
        assert!(matches!(err, RecError::ProviderRejected { .. }));
    }
}
