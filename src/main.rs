use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use scentrec::algorithms::ProviderHealth;
use scentrec::services::catalog::{QueueStatus, UpsertOutcome};
use scentrec::services::feedback::spawn_feedback_worker;
use scentrec::services::maintenance::{spawn_cache_cleanup, spawn_catalog_maintenance};
use scentrec::services::preference::ErasureReport;
use scentrec::utils::metrics::ProviderStats;
use scentrec::{
    init_tracing, AppState, Config, EmbeddingResult, Interaction, Item, ItemId, RecError,
    RecommendationRequest, RecommendationResponse, SearchResult, UserPreferenceModel,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(err: RecError) -> ApiError {
    let status = match &err {
        RecError::Validation(_) => StatusCode::BAD_REQUEST,
        RecError::NotFound(_) => StatusCode::NOT_FOUND,
        RecError::ProviderTransient { .. }
        | RecError::ProviderRejected { .. }
        | RecError::ProviderExhausted { .. }
        | RecError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RecError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RecError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    (status, Json(ApiResponse::error(err.public_message())))
}

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

#[derive(Debug, Deserialize)]
struct EmbeddingRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SimilarRequest {
    query_vector: Vec<f32>,
    similarity_threshold: Option<f32>,
    max_results: Option<usize>,
    #[serde(default)]
    exclude_ids: Vec<ItemId>,
}

#[derive(Debug, Deserialize)]
struct InteractionRequest {
    #[serde(flatten)]
    interaction: Interaction,
    /// Await the preference recompute before answering.
    #[serde(default)]
    sync: bool,
}

#[derive(Debug, Serialize)]
struct InteractionAck {
    interaction_id: Uuid,
    preference_updated: Option<bool>,
    queued: bool,
}

#[derive(Debug, Serialize)]
struct UpdateAck {
    updated: bool,
}

#[derive(Debug, Serialize)]
struct CleanupAck {
    removed: u64,
}

#[derive(Debug, Serialize)]
struct ProviderReport {
    name: String,
    health: ProviderHealth,
    consecutive_failures: u32,
    stats: ProviderStats,
}

#[derive(Debug, Serialize)]
struct MetricsReport {
    providers: Vec<ProviderReport>,
    serving: HashMap<String, u64>,
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "scentrec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    status.insert("items".to_string(), state.vector_db.item_count().to_string());
    status.insert("indexed_items".to_string(), state.vector_db.indexed_count().to_string());

    Json(ApiResponse::success(status))
}

async fn generate_embedding(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingRequest>,
) -> ApiResult<EmbeddingResult> {
    ok(state.embedder.generate_embedding(&request.text).await.map_err(api_error)?)
}

async fn find_similar_items(
    State(state): State<AppState>,
    Json(request): Json<SimilarRequest>,
) -> ApiResult<Vec<SearchResult>> {
    let search = state.vector_db.search_config();
    let results = state
        .vector_db
        .find_similar_items(
            &request.query_vector,
            request.similarity_threshold.unwrap_or(search.default_threshold),
            request.max_results.unwrap_or(search.default_max_results),
            &request.exclude_ids,
        )
        .await
        .map_err(api_error)?;
    ok(results)
}

async fn update_user_embedding(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<UpdateAck> {
    let updated = state
        .preferences
        .update_user_embedding(user_id)
        .await
        .map_err(api_error)?;
    ok(UpdateAck { updated })
}

async fn cleanup_expired_cache(State(state): State<AppState>) -> ApiResult<CleanupAck> {
    let removed = state.cache.cleanup_expired().await.map_err(api_error)?;
    ok(CleanupAck { removed })
}

async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> ApiResult<RecommendationResponse> {
    ok(state.recommendations.recommend(&request).await.map_err(api_error)?)
}

async fn record_interaction(
    State(state): State<AppState>,
    Json(request): Json<InteractionRequest>,
) -> ApiResult<InteractionAck> {
    let interaction = request.interaction;
    state
        .preferences
        .record_interaction(&interaction)
        .await
        .map_err(api_error)?;

    if request.sync {
        let updated = state
            .preferences
            .update_user_embedding(interaction.user_id)
            .await
            .map_err(api_error)?;
        return ok(InteractionAck {
            interaction_id: interaction.interaction_id,
            preference_updated: Some(updated),
            queued: false,
        });
    }

    // The interaction is already durable; a full queue only delays the recompute.
    let queued = match state.feedback.submit(interaction.user_id) {
        Ok(()) => true,
        Err(e) => {
            warn!(user_id = %interaction.user_id, error = %e, "feedback not queued");
            false
        }
    };

    ok(InteractionAck {
        interaction_id: interaction.interaction_id,
        preference_updated: None,
        queued,
    })
}

async fn get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<UserPreferenceModel> {
    match state.preferences.get_model(user_id).await.map_err(api_error)? {
        Some(model) => ok(model),
        None => Err(api_error(RecError::NotFound(format!("preference model for user {}", user_id)))),
    }
}

async fn erase_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<ErasureReport> {
    ok(state.preferences.erase_user_data(user_id).await.map_err(api_error)?)
}

async fn upsert_item(State(state): State<AppState>, Json(item): Json<Item>) -> ApiResult<UpsertOutcome> {
    ok(state.catalog.upsert_item(item).await.map_err(api_error)?)
}

async fn get_item(State(state): State<AppState>, Path(item_id): Path<String>) -> ApiResult<Item> {
    match state.catalog.get_item(&item_id) {
        Some(item) => ok(item),
        None => Err(api_error(RecError::NotFound(format!("item {}", item_id)))),
    }
}

async fn remove_item(State(state): State<AppState>, Path(item_id): Path<String>) -> ApiResult<bool> {
    match state.catalog.remove_item(&item_id).await.map_err(api_error)? {
        true => ok(true),
        false => Err(api_error(RecError::NotFound(format!("item {}", item_id)))),
    }
}

async fn embedding_queue_status(State(state): State<AppState>) -> ApiResult<QueueStatus> {
    ok(state.catalog.queue_status().await.map_err(api_error)?)
}

async fn provider_metrics(State(state): State<AppState>) -> ApiResult<MetricsReport> {
    let breaker = state.breaker();
    let providers = state
        .embedder
        .provider_names()
        .into_iter()
        .map(|name| ProviderReport {
            health: breaker.state(&name),
            consecutive_failures: breaker.consecutive_failures(&name),
            stats: state.provider_metrics.get(&name).unwrap_or_default(),
            name,
        })
        .collect();

    ok(MetricsReport {
        providers,
        serving: state.recommendations.stats().snapshot(),
    })
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/embeddings", post(generate_embedding))
        .route("/search/similar", post(find_similar_items))
        .route("/recommendations", post(recommend))
        .route("/interactions", post(record_interaction))
        .route("/users/:user_id", axum::routing::delete(erase_user))
        .route("/users/:user_id/embedding", post(update_user_embedding))
        .route("/users/:user_id/preferences", get(get_preferences))
        .route("/items", post(upsert_item))
        .route("/items/queue", get(embedding_queue_status))
        .route("/items/:item_id", get(get_item).delete(remove_item))
        .route("/maintenance/cleanup-cache", post(cleanup_expired_cache))
        .route("/metrics/providers", get(provider_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.search.parallelism.max(1))
        .build_global()?;

    info!("Starting ScentRec server with config: {:?}", config.server);
    let addr = config.server.socket_addr()?;

    let (state, feedback_rx) = AppState::new(config.clone()).await?;
    spawn_feedback_worker(feedback_rx, state.preferences.clone(), config.feedback.clone());
    spawn_cache_cleanup(state.cache.clone(), config.cache.cleanup_interval());
    spawn_catalog_maintenance(state.catalog.clone(), config.catalog.retry_interval(), true);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
