use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecError>;

#[derive(Debug, Error)]
pub enum RecError {
    /// Malformed input. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Rate limit, timeout or a 5xx from an embedding provider.
    #[error("embedding provider '{provider}' failed transiently: {message}")]
    ProviderTransient { provider: String, message: String },

    /// The provider refused the request outright (bad credentials, bad input).
    #[error("embedding provider '{provider}' rejected the request: {message}")]
    ProviderRejected { provider: String, message: String },

    #[error("all embedding providers exhausted (attempted: {})", attempted.join(", "))]
    ProviderExhausted { attempted: Vec<String>, last_error: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency '{dependency}' unavailable: {message}")]
    DependencyUnavailable { dependency: String, message: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RecError {
    pub fn validation(message: impl Into<String>) -> Self {
        RecError::Validation(message.into())
    }

    pub fn dependency(dependency: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RecError::DependencyUnavailable {
            dependency: dependency.into(),
            message: message.to_string(),
        }
    }

    /// Errors a caller may safely retry: the operation is stateless or idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecError::ProviderTransient { .. }
                | RecError::DependencyUnavailable { .. }
                | RecError::Timeout { .. }
        )
    }

    /// Whether a provider failure should be retried against the same provider
    /// before failing over.
    pub fn is_transient(&self) -> bool {
        matches!(self, RecError::ProviderTransient { .. } | RecError::Timeout { .. })
    }

    /// Failures that the recommendation path may degrade around instead of
    /// surfacing a hard error.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            RecError::ProviderExhausted { .. }
                | RecError::DependencyUnavailable { .. }
                | RecError::Timeout { .. }
        )
    }

    /// Message safe to show to end users: no provider bodies, no credentials.
    pub fn public_message(&self) -> String {
        match self {
            RecError::Validation(message) => message.clone(),
            RecError::NotFound(what) => format!("{} not found", what),
            RecError::ProviderTransient { .. }
            | RecError::ProviderRejected { .. }
            | RecError::ProviderExhausted { .. } => {
                "embedding service temporarily unavailable".to_string()
            }
            RecError::DependencyUnavailable { dependency, .. } => {
                format!("{} temporarily unavailable", dependency)
            }
            RecError::Timeout { operation, .. } => format!("{} timed out, please retry", operation),
            RecError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<sqlx::Error> for RecError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RecError::NotFound("row".to_string()),
            other => RecError::dependency("postgres", other),
        }
    }
}

impl From<redis::RedisError> for RecError {
    fn from(err: redis::RedisError) -> Self {
        RecError::dependency("redis", err)
    }
}

impl From<serde_json::Error> for RecError {
    fn from(err: serde_json::Error) -> Self {
        RecError::Internal(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let transient = RecError::ProviderTransient {
            provider: "voyage".to_string(),
            message: "429".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let invalid = RecError::validation("bad vector");
        assert!(!invalid.is_retryable());
        assert!(!invalid.is_degradable());

        let timeout = RecError::Timeout {
            operation: "similarity search".to_string(),
            after_ms: 1000,
        };
        assert!(timeout.is_retryable());
        assert!(timeout.is_degradable());
    }

    #[test]
    fn test_public_message_hides_provider_details() {
        let err = RecError::ProviderExhausted {
            attempted: vec!["openai".to_string(), "voyage".to_string()],
            last_error: "401 {\"error\":\"invalid api key sk-abc\"}".to_string(),
        };
        let message = err.public_message();
        assert!(!message.contains("sk-abc"));
        assert!(err.to_string().contains("openai, voyage"));
        assert!(!err.to_string().contains("sk-abc"));
    }
}
