//! Aggregate preference vectors learned from a user's interaction log.
//!
//! Everything here is a pure function of the log and the item vectors it
//! references, so recomputing without new interactions is a no-op.

use crate::config::{DecayPolicy, PreferenceConfig};
use crate::models::{Interaction, InteractionKind, Item, ItemId};
use crate::utils::exponential_decay_weight;
use nalgebra::DVector;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedPreference {
    pub embedding: Vec<f32>,
    pub strength: f32,
    pub interaction_count: u64,
    pub liked_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceOutcome {
    /// No interaction referenced an embedded item.
    NoSignal,
    /// Positive and negative contributions summed to the zero vector.
    Cancelled { contributing: u64 },
    Computed(ComputedPreference),
}

/// Signed weight an interaction contributes, before recency decay.
/// `None` for interactions that carry no item signal.
pub fn interaction_weight(interaction: &Interaction, config: &PreferenceConfig) -> Option<f32> {
    let value = interaction.value as f32;
    match interaction.kind {
        InteractionKind::Rating => Some(config.rating_weight * (value - 2.5) / 2.0),
        InteractionKind::CollectionAdd => Some(config.collection_weight),
        InteractionKind::View => {
            let saturation = config.view_saturation_ms.max(1.0);
            Some(config.view_weight * (value / saturation).clamp(0.1, 1.0))
        }
        InteractionKind::Search => None,
    }
}

/// `1 - exp(-signal / k)`, in [0, 1).
pub fn preference_strength(total_abs_weight: f32, distinct_families: usize, config: &PreferenceConfig) -> f32 {
    let signal = total_abs_weight + config.diversity_bonus * distinct_families as f32;
    let k = config.saturation_k.max(f32::EPSILON);
    (1.0 - (-signal / k).exp()).clamp(0.0, 1.0)
}

pub fn compute_preference(
    interactions: &[Interaction],
    items: &HashMap<ItemId, Item>,
    config: &PreferenceConfig,
    dimension: usize,
) -> PreferenceOutcome {
    let newest = match interactions.iter().map(|i| i.created_at).max() {
        Some(ts) => ts,
        None => return PreferenceOutcome::NoSignal,
    };

    let mut accumulated = DVector::<f32>::zeros(dimension);
    let mut total_abs_weight = 0.0f32;
    let mut contributing = 0u64;
    let mut families = BTreeSet::new();
    let mut affinity: HashMap<&str, f32> = HashMap::new();

    for interaction in interactions {
        let Some(raw_weight) = interaction_weight(interaction, config) else {
            continue;
        };
        let Some(item) = interaction.item_id.as_ref().and_then(|id| items.get(id)) else {
            continue;
        };
        if item.embedding.len() != dimension {
            continue;
        }

        let decay = match config.decay {
            DecayPolicy::None => 1.0,
            DecayPolicy::Exponential { half_life_days } => {
                exponential_decay_weight(interaction.created_at, newest, half_life_days)
            }
        };
        let weight = raw_weight * decay;

        accumulated += DVector::from_column_slice(&item.embedding) * weight;
        // Strength uses undecayed weights so it never drops as the log grows.
        total_abs_weight += raw_weight.abs();
        contributing += 1;

        for family in &item.tags.scent_families {
            families.insert(family.as_str());
            *affinity.entry(family.as_str()).or_insert(0.0) += weight;
        }
    }

    if contributing == 0 {
        return PreferenceOutcome::NoSignal;
    }

    let norm = accumulated.norm();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return PreferenceOutcome::Cancelled { contributing };
    }
    accumulated /= norm;

    let mut liked: Vec<(&str, f32)> = affinity.into_iter().filter(|(_, a)| *a > 0.0).collect();
    liked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let liked_categories = liked
        .into_iter()
        .take(config.max_liked_categories)
        .map(|(family, _)| family.to_string())
        .collect();

    PreferenceOutcome::Computed(ComputedPreference {
        embedding: accumulated.as_slice().to_vec(),
        strength: preference_strength(total_abs_weight, families.len(), config),
        interaction_count: contributing,
        liked_categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn catalog() -> HashMap<ItemId, Item> {
        let items = vec![
            Item::new("a", "Woods", "House", "cedar").with_scent_families(&["woody"]).with_embedding(vec![1.0, 0.0, 0.0]),
            Item::new("b", "Citrus", "House", "lemon").with_scent_families(&["fresh", "citrus"]).with_embedding(vec![0.0, 1.0, 0.0]),
            Item::new("c", "Pending", "House", "not embedded yet"),
        ];
        items.into_iter().map(|item| (item.item_id.clone(), item)).collect()
    }

    #[test]
    fn test_interaction_weights() {
        let config = Config::default().preference;
        let user = Uuid::new_v4();
        assert_eq!(interaction_weight(&Interaction::rating(user, "a", 5), &config), Some(1.25));
        assert_eq!(interaction_weight(&Interaction::rating(user, "a", 1), &config), Some(-0.75));
        assert_eq!(interaction_weight(&Interaction::collection_add(user, "a"), &config), Some(1.0));
        let quick_view = interaction_weight(&Interaction::view(user, "a", 100), &config).unwrap();
        assert!((quick_view - 0.02).abs() < 1e-6);
        let long_view = interaction_weight(&Interaction::view(user, "a", 90_000), &config).unwrap();
        assert!((long_view - 0.2).abs() < 1e-6);
        assert_eq!(interaction_weight(&Interaction::search(user, "oud"), &config), None);
    }

    #[test]
    fn test_no_signal_without_embedded_items() {
        let config = Config::default().preference;
        let user = Uuid::new_v4();
        let log = vec![
            Interaction::search(user, "amber"),
            Interaction::rating(user, "c", 5),
            Interaction::rating(user, "missing", 5),
        ];
        assert_eq!(compute_preference(&log, &catalog(), &config, 3), PreferenceOutcome::NoSignal);
        assert_eq!(compute_preference(&[], &catalog(), &config, 3), PreferenceOutcome::NoSignal);
    }

    #[test]
    fn test_low_ratings_push_away() {
        let config = Config::default().preference;
        let user = Uuid::new_v4();
        let log = vec![Interaction::rating(user, "a", 5), Interaction::rating(user, "b", 1)];
        let PreferenceOutcome::Computed(pref) = compute_preference(&log, &catalog(), &config, 3) else {
            panic!("expected a computed preference");
        };
        assert!(pref.embedding[0] > 0.0);
        assert!(pref.embedding[1] < 0.0);
        assert_eq!(pref.interaction_count, 2);
        assert_eq!(pref.liked_categories, vec!["woody".to_string()]);
    }

    #[test]
    fn test_cancelling_contributions() {
        let mut config = Config::default().preference;
        config.rating_weight = 2.0;
        let user = Uuid::new_v4();
        // +1.0 from the add and -1.0 from a 1.5-equivalent rating on the same item
        let log = vec![
            Interaction::collection_add(user, "a"),
            Interaction::new(user, Some("a".to_string()), InteractionKind::Rating, 1.5),
        ];
        assert_eq!(
            compute_preference(&log, &catalog(), &config, 3),
            PreferenceOutcome::Cancelled { contributing: 2 }
        );
    }

    #[test]
    fn test_strength_is_monotone_under_decay() {
        let mut config = Config::default().preference;
        config.decay = DecayPolicy::Exponential { half_life_days: 7.0 };
        let user = Uuid::new_v4();
        let old = Utc::now() - Duration::days(60);
        let mut log = vec![Interaction::rating(user, "a", 5).at(old)];

        let first = match compute_preference(&log, &catalog(), &config, 3) {
            PreferenceOutcome::Computed(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        log.push(Interaction::view(user, "b", 500));
        let second = match compute_preference(&log, &catalog(), &config, 3) {
            PreferenceOutcome::Computed(p) => p,
            other => panic!("unexpected {:?}", other),
        };

        assert!(second.strength >= first.strength);
        // The recent view dominates direction once the old rating has decayed.
        assert!(second.embedding[1] > second.embedding[0]);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let config = Config::default().preference;
        let user = Uuid::new_v4();
        let log = vec![Interaction::rating(user, "a", 4), Interaction::collection_add(user, "b")];
        let first = compute_preference(&log, &catalog(), &config, 3);
        let second = compute_preference(&log, &catalog(), &config, 3);
        assert_eq!(first, second);
    }
}
