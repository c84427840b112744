use super::{EmbeddingProvider, ProviderEmbedding};
use crate::error::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic feature-hashing embedder. Texts sharing words land close
/// together, which is enough for offline use and tests.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    name: String,
    max_input_chars: usize,
}

impl HashEmbeddingProvider {
    pub fn new(name: impl Into<String>, max_input_chars: usize) -> Self {
        Self {
            name: name.into(),
            max_input_chars,
        }
    }

    fn bucket(feature: &str, dimension: usize) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let hash = hasher.finish();
        let index = (hash % dimension as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimension];
        if dimension == 0 {
            return vector;
        }

        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            let (index, sign) = Self::bucket(token, dimension);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = Self::bucket(&format!("{} {}", pair[0], pair[1]), dimension);
            vector[index] += 0.5 * sign;
        }

        if vector.iter().all(|v| *v == 0.0) {
            let (index, sign) = Self::bucket(text, dimension);
            vector[index] = sign;
        }

        crate::utils::normalize_vector(&mut vector);
        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, text: &str, dimension: usize) -> Result<ProviderEmbedding> {
        Ok(ProviderEmbedding {
            vector: Self::embed_text(text, dimension),
            tokens: text.split_whitespace().count() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{cosine_similarity, l2_norm};

    #[tokio::test]
    async fn test_consistent_embeddings() {
        let provider = HashEmbeddingProvider::new("local", 1_000);
        let a = provider.embed("fresh citrus cologne", 64).await.unwrap();
        let b = provider.embed("fresh citrus cologne", 64).await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.vector.len(), 64);
        assert!((l2_norm(&a.vector) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_are_closer() {
        let citrus = HashEmbeddingProvider::embed_text("fresh citrus bergamot", 256);
        let lemon = HashEmbeddingProvider::embed_text("citrus lemon fresh", 256);
        let oud = HashEmbeddingProvider::embed_text("smoky leather oud", 256);
        assert!(cosine_similarity(&citrus, &lemon) > cosine_similarity(&citrus, &oud));
    }

    #[test]
    fn test_punctuation_only_text_is_not_zero() {
        let vector = HashEmbeddingProvider::embed_text("!!!", 16);
        assert!((l2_norm(&vector) - 1.0).abs() < 1e-5);
    }
}
