use scentrec::*;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    println!("ScentRec basic usage");

    // 1. Local configuration: feature-hashing embedder, in-memory stores and cache.
    let config = Config::local(256);
    let (state, feedback_rx) = AppState::new(config.clone()).await?;
    scentrec::services::feedback::spawn_feedback_worker(
        feedback_rx,
        state.preferences.clone(),
        config.feedback.clone(),
    );
    println!("Providers: {:?}", state.embedder.provider_names());

    // 2. Catalog. Vectors are generated from each item's descriptive text.
    let catalog = [
        ("dior__sauvage", "Sauvage", "Dior", "fresh spicy bergamot pepper ambroxan", &["fresh", "spicy"][..], 4.3, 25_000),
        ("chanel__bleu", "Bleu de Chanel", "Chanel", "fresh citrus grapefruit incense cedar", &["fresh", "woody"][..], 4.4, 18_000),
        ("tf__oud_wood", "Oud Wood", "Tom Ford", "warm woody oud sandalwood cardamom", &["woody", "oriental"][..], 4.5, 9_000),
        ("mfk__baccarat", "Baccarat Rouge 540", "Maison Francis Kurkdjian", "warm amber saffron jasmine cedar", &["amber", "floral"][..], 4.6, 14_000),
        ("acqua__colonia", "Colonia", "Acqua di Parma", "fresh citrus lemon lavender rose", &["citrus", "aromatic"][..], 4.1, 3_000),
        ("byredo__gypsy", "Gypsy Water", "Byredo", "woody pine juniper vanilla sandalwood", &["woody"][..], 4.0, 2_500),
    ];

    for (id, name, brand, description, families, rating, count) in catalog {
        let item = Item::new(id, name, brand, description)
            .with_scent_families(families)
            .with_rating(rating, count);
        let outcome = state.catalog.upsert_item(item).await?;
        println!("  upserted {} ({:?})", outcome.item_id, outcome.status);
    }

    // 3. Semantic search.
    println!("\nQuery: fresh citrus summer fragrance for daily wear");
    let request = RecommendationRequest::for_query("fresh citrus summer fragrance for daily wear")
        .with_threshold(0.0)
        .with_max_results(3);
    print_response(&state.recommendations.recommend(&request).await?);

    // 4. A new user: cold start.
    let user_id = Uuid::new_v4();
    println!("\nCold start for user {}", user_id);
    print_response(&state.recommendations.recommend(&RecommendationRequest::for_user(user_id)).await?);

    // 5. Interactions feed the preference model.
    for interaction in [
        Interaction::rating(user_id, "acqua__colonia", 5),
        Interaction::collection_add(user_id, "chanel__bleu"),
        Interaction::view(user_id, "dior__sauvage", 40_000),
    ] {
        state.preferences.record_interaction(&interaction).await?;
    }
    state.preferences.update_user_embedding(user_id).await?;

    if let Some(model) = state.preferences.get_model(user_id).await? {
        println!(
            "\nPreference model: strength {:.3}, {} interactions, likes {:?}",
            model.preference_strength, model.interaction_count, model.preferences
        );
    }

    // 6. Blend the learned taste with a new intent.
    println!("\nBlended: warm woody fragrance for winter (0.6 taste / 0.4 query)");
    let request = RecommendationRequest::for_user(user_id)
        .with_query("warm woody fragrance for winter")
        .with_weights(BlendWeights::new(0.6, 0.4))
        .with_threshold(0.0)
        .with_max_results(3);
    print_response(&state.recommendations.recommend(&request).await?);

    // 7. Discovery leans on the query and away from the learned taste.
    println!("\nDiscovery preset: warm woody fragrance for winter");
    let discovery = RecommendationRequest::for_user(user_id)
        .with_query("warm woody fragrance for winter")
        .with_preset(BlendPreset::Discovery)
        .with_threshold(0.0)
        .with_max_results(3);
    print_response(&state.recommendations.recommend(&discovery).await?);

    // 8. The blended request again is served from the cache.
    let cached = state.recommendations.recommend(&request).await?;
    println!("\nSecond call cached: {}", cached.cached);
    println!("Serving stats: {:?}", state.recommendations.stats().snapshot());

    Ok(())
}

fn print_response(response: &RecommendationResponse) {
    println!("  mode: {:?}{}", response.mode, if response.degraded { " (degraded)" } else { "" });
    for (i, result) in response.results.iter().enumerate() {
        println!(
            "  {}. {} by {} | score {:.3} | {}",
            i + 1,
            result.name,
            result.brand,
            result.score,
            result.explanation
        );
    }
}
