use crate::error::{RecError, Result};
use crate::models::*;

pub const MAX_QUERY_CHARS: usize = 2_000;
pub const MAX_EXCLUDE_IDS: usize = 10_000;

/// Rejects vectors of the wrong dimensionality, with non-finite components,
/// or with zero norm. Vectors are never padded or truncated.
pub fn validate_vector(vector: &[f32], expected_dim: usize, what: &str) -> Result<()> {
    if vector.len() != expected_dim {
        return Err(RecError::validation(format!(
            "{} dimension mismatch: expected {}, got {}",
            what,
            expected_dim,
            vector.len()
        )));
    }

    if vector.iter().any(|v| !v.is_finite()) {
        return Err(RecError::validation(format!(
            "{} contains invalid values (NaN or Infinity)",
            what
        )));
    }

    if vector.iter().all(|v| *v == 0.0) {
        return Err(RecError::validation(format!("{} cannot be the zero vector", what)));
    }

    Ok(())
}

pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(RecError::validation(format!(
            "similarity threshold must be within [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

pub fn validate_max_results(max_results: usize, limit: usize) -> Result<()> {
    if max_results == 0 {
        return Err(RecError::validation("max results must be greater than 0"));
    }

    if max_results > limit {
        return Err(RecError::validation(format!(
            "max results too large: {} (max {})",
            max_results, limit
        )));
    }

    Ok(())
}

/// Returns the trimmed query, rejecting empty or oversized input.
pub fn validate_query_text(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RecError::validation("query text cannot be empty"));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(RecError::validation(format!(
            "query text too long (max {} characters)",
            MAX_QUERY_CHARS
        )));
    }
    Ok(trimmed)
}

pub fn validate_exclude_ids(ids: &[ItemId]) -> Result<()> {
    if ids.len() > MAX_EXCLUDE_IDS {
        return Err(RecError::validation(format!(
            "too many items to exclude (max {})",
            MAX_EXCLUDE_IDS
        )));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(RecError::validation("excluded item id cannot be empty"));
    }
    Ok(())
}

pub fn validate_interaction(interaction: &Interaction) -> Result<()> {
    if interaction.user_id.is_nil() {
        return Err(RecError::validation("user id cannot be nil"));
    }

    if !interaction.value.is_finite() {
        return Err(RecError::validation("interaction value must be finite"));
    }

    match interaction.kind {
        InteractionKind::Search => {}
        _ => match interaction.item_id.as_deref() {
            Some(id) if !id.trim().is_empty() => {}
            _ => {
                return Err(RecError::validation(format!(
                    "{} interaction requires an item id",
                    interaction.kind
                )))
            }
        },
    }

    match interaction.kind {
        InteractionKind::Rating => {
            if !(1.0..=5.0).contains(&interaction.value) {
                return Err(RecError::validation(format!(
                    "rating must be between 1 and 5, got {}",
                    interaction.value
                )));
            }
        }
        InteractionKind::View => {
            if interaction.value < 0.0 {
                return Err(RecError::validation("view duration cannot be negative"));
            }
        }
        InteractionKind::CollectionAdd | InteractionKind::Search => {}
    }

    let max_future = chrono::Utc::now() + chrono::Duration::hours(1);
    if interaction.created_at > max_future {
        return Err(RecError::validation(
            "timestamp cannot be more than 1 hour in the future",
        ));
    }

    Ok(())
}

pub fn validate_item(item: &Item) -> Result<()> {
    if item.item_id.trim().is_empty() {
        return Err(RecError::validation("item id cannot be empty"));
    }

    if item.name.trim().is_empty() {
        return Err(RecError::validation("item name cannot be empty"));
    }

    if item.brand.trim().is_empty() {
        return Err(RecError::validation("item brand cannot be empty"));
    }

    if let Some(rating) = item.rating_value {
        if !(0.0..=5.0).contains(&rating) {
            return Err(RecError::validation("item rating must be between 0.0 and 5.0"));
        }
    }

    if !(0.0..=1.0).contains(&item.popularity_score) {
        return Err(RecError::validation("item popularity score must be between 0.0 and 1.0"));
    }

    Ok(())
}

pub fn validate_preference_model(model: &UserPreferenceModel, expected_dim: usize) -> Result<()> {
    if model.user_id.is_nil() {
        return Err(RecError::validation("user id cannot be nil"));
    }
    validate_vector(&model.embedding, expected_dim, "user preference vector")?;
    if !(0.0..=1.0).contains(&model.preference_strength) {
        return Err(RecError::validation("preference strength must be between 0.0 and 1.0"));
    }
    Ok(())
}

pub fn validate_recommendation_request(request: &RecommendationRequest, limit: usize) -> Result<()> {
    if request.user_id.is_none() && request.query.is_none() {
        return Err(RecError::validation(
            "a recommendation request needs a user id, a query, or both",
        ));
    }

    if let Some(user_id) = request.user_id {
        if user_id.is_nil() {
            return Err(RecError::validation("user id cannot be nil"));
        }
    }

    if let Some(query) = request.query.as_deref() {
        validate_query_text(query)?;
    }

    if let Some(max_results) = request.max_results {
        validate_max_results(max_results, limit)?;
    }

    if let Some(threshold) = request.threshold {
        validate_threshold(threshold)?;
    }

    if let Some(weights) = request.weights {
        weights.normalized()?;
    }

    validate_exclude_ids(&request.exclude_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.1, 0.2, 0.3], 3, "query").is_ok());
        assert!(validate_vector(&[0.1, 0.2], 3, "query").is_err());
        assert!(validate_vector(&[0.1, f32::NAN, 0.3], 3, "query").is_err());
        assert!(validate_vector(&[0.0, 0.0, 0.0], 3, "query").is_err());
    }

    #[test]
    fn test_validate_threshold_and_max_results() {
        assert!(validate_threshold(0.0).is_ok());
        assert!(validate_threshold(1.0).is_ok());
        assert!(validate_threshold(1.01).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
        assert!(validate_max_results(0, 100).is_err());
        assert!(validate_max_results(101, 100).is_err());
        assert!(validate_max_results(100, 100).is_ok());
    }

    #[test]
    fn test_validate_interaction() {
        let user_id = Uuid::new_v4();
        assert!(validate_interaction(&Interaction::rating(user_id, "x", 5)).is_ok());
        assert!(validate_interaction(&Interaction::rating(user_id, "x", 6)).is_err());
        assert!(validate_interaction(&Interaction::rating(user_id, "x", 0)).is_err());
        assert!(validate_interaction(&Interaction::search(user_id, "citrus")).is_ok());
        assert!(validate_interaction(&Interaction::collection_add(Uuid::nil(), "x")).is_err());

        let orphan_view = Interaction::new(user_id, None, InteractionKind::View, 1200.0);
        assert!(validate_interaction(&orphan_view).is_err());
    }

    #[test]
    fn test_validate_recommendation_request() {
        assert!(validate_recommendation_request(&RecommendationRequest::default(), 100).is_err());
        assert!(validate_recommendation_request(&RecommendationRequest::for_query("  "), 100).is_err());
        assert!(validate_recommendation_request(&RecommendationRequest::for_query("amber"), 100).is_ok());

        let bad_weights = RecommendationRequest::for_user(Uuid::new_v4())
            .with_weights(BlendWeights::new(0.0, 0.0));
        assert!(validate_recommendation_request(&bad_weights, 100).is_err());
    }
}
