use crate::config::BlenderConfig;
use crate::error::Result;
use crate::models::{BlendPreset, BlendWeights, Item};
use crate::utils::blend;

/// Explicit weights win over a preset; with neither, the hybrid preset applies.
pub fn resolve_weights(
    weights: Option<BlendWeights>,
    preset: Option<BlendPreset>,
    config: &BlenderConfig,
) -> Result<BlendWeights> {
    let chosen = match (weights, preset) {
        (Some(explicit), _) => explicit,
        (None, Some(BlendPreset::SimilarToLiked)) => config.similar_to_liked_weights,
        (None, Some(BlendPreset::Discovery)) => config.discovery_weights,
        (None, Some(BlendPreset::Hybrid)) | (None, None) => config.hybrid_weights,
    };
    chosen.normalized()
}

/// `normalize(preference * w_pref + intent * w_intent)`.
pub fn blend_vectors(preference: &[f32], intent: &[f32], weights: BlendWeights) -> Vec<f32> {
    blend(preference, weights.preference, intent, weights.intent)
}

pub fn cold_start_score(similarity: f32, popularity: f32, popularity_weight: f32) -> f32 {
    let p = popularity_weight.clamp(0.0, 1.0);
    (1.0 - p) * similarity + p * popularity.clamp(0.0, 1.0)
}

/// Scent families the item shares with the user's liked categories, sorted.
pub fn matched_categories(item: &Item, liked: &[String]) -> Vec<String> {
    let mut matched: Vec<String> = item
        .tags
        .scent_families
        .iter()
        .filter(|family| liked.iter().any(|l| l.eq_ignore_ascii_case(family)))
        .cloned()
        .collect();
    matched.sort();
    matched.dedup();
    matched
}

pub fn has_quality_signal(item: &Item, config: &BlenderConfig) -> bool {
    matches!(item.rating_value, Some(rating) if rating >= config.quality_min_rating)
        && item.rating_count >= config.quality_min_count
}

/// Deterministic explanation built from the similarity band, shared
/// categories and the item's rating.
pub fn generate_explanation(item: &Item, similarity: f32, liked: &[String], config: &BlenderConfig) -> String {
    let mut parts = Vec::with_capacity(3);

    let band = if similarity >= config.high_similarity {
        "Highly similar to what you're looking for".to_string()
    } else if similarity >= config.medium_similarity {
        "Similar to scents you enjoy".to_string()
    } else {
        match item.tags.scent_families.first() {
            Some(family) => format!("A discovery pick from the {} family", family),
            None => "A discovery pick outside your usual profile".to_string(),
        }
    };
    parts.push(band);

    let matched = matched_categories(item, liked);
    if !matched.is_empty() {
        parts.push(format!("Matches your taste for {}", matched.join(", ")));
    }

    if has_quality_signal(item, config) {
        if let Some(rating) = item.rating_value {
            parts.push(format!("Rated {:.1}/5 across {} reviews", rating, item.rating_count));
        }
    }

    parts.join(". ")
}

pub fn popularity_explanation(item: &Item, config: &BlenderConfig) -> String {
    if has_quality_signal(item, config) {
        if let Some(rating) = item.rating_value {
            return format!("Popular pick, rated {:.1}/5 across {} reviews", rating, item.rating_count);
        }
    }
    "Recommended based on general popularity".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn item() -> Item {
        Item::new("x", "Bleu", "Chanel", "woody aromatic")
            .with_scent_families(&["woody", "aromatic", "citrus"])
            .with_rating(4.3, 2_500)
    }

    #[test]
    fn test_resolve_weights_precedence() {
        let config = Config::default().blender;
        let default = resolve_weights(None, None, &config).unwrap();
        assert!((default.preference - 0.6).abs() < 1e-6);

        let discovery = resolve_weights(None, Some(BlendPreset::Discovery), &config).unwrap();
        assert!((discovery.intent - 0.7).abs() < 1e-6);

        let explicit = resolve_weights(Some(BlendWeights::new(1.0, 3.0)), Some(BlendPreset::Discovery), &config).unwrap();
        assert!((explicit.preference - 0.25).abs() < 1e-6);

        assert!(resolve_weights(Some(BlendWeights::new(0.0, 0.0)), None, &config).is_err());
    }

    #[test]
    fn test_explanation_bands() {
        let config = Config::default().blender;
        let liked = vec!["citrus".to_string(), "woody".to_string()];

        let high = generate_explanation(&item(), 0.85, &liked, &config);
        assert!(high.starts_with("Highly similar"));
        assert!(high.contains("Matches your taste for citrus, woody"));
        assert!(high.contains("Rated 4.3/5"));

        let medium = generate_explanation(&item(), 0.6, &[], &config);
        assert!(medium.starts_with("Similar to scents"));
        assert!(!medium.contains("Matches"));

        let low = generate_explanation(&item(), 0.2, &[], &config);
        assert!(low.starts_with("A discovery pick from the woody family"));
    }

    #[test]
    fn test_quality_signal_needs_enough_ratings() {
        let config = Config::default().blender;
        let obscure = Item::new("y", "Niche", "Indie", "oud").with_rating(4.9, 3);
        assert!(!has_quality_signal(&obscure, &config));
        assert_eq!(
            popularity_explanation(&obscure, &config),
            "Recommended based on general popularity"
        );
    }

    #[test]
    fn test_cold_start_score() {
        assert!((cold_start_score(0.5, 1.0, 0.3) - 0.65).abs() < 1e-6);
        assert!((cold_start_score(0.5, 0.0, 0.0) - 0.5).abs() < 1e-6);
    }
}
