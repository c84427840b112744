pub mod blending;
pub mod circuit_breaker;
pub mod preference;
pub mod retriever;

pub use circuit_breaker::{Admission, CircuitBreaker, ProviderHealth};
pub use preference::{compute_preference, ComputedPreference, PreferenceOutcome};
pub use retriever::{InMemoryIndex, SimilarityIndex};
