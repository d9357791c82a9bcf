//! Tiered Memory Server
//!
//! HTTP API over a single memory manager.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiered_memory::{
    Config, Error, MemoryItem, MemoryManager, MetadataFilter, SearchHit, ShortTermMemory,
    SqliteStorage,
};

/// Application state shared across handlers
struct AppState {
    manager: MemoryManager,
    storage: SqliteStorage,
    config: Config,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Tiered Memory Server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.data_dir);

    // Initialize components
    let storage = SqliteStorage::new(&config)?;
    let manager = if config.persist_ltm {
        let ltm = storage.load_ltm(config.dimensionality)?;
        let stm = ShortTermMemory::with_dimensionality(config.stm_capacity, config.dimensionality)?;
        MemoryManager::new(stm, ltm)
    } else {
        MemoryManager::from_config(&config)?
    };

    let state = Arc::new(AppState {
        manager,
        storage,
        config: config.clone(),
    });

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health))
        // Short-term memory
        .route("/stm", post(add_stm))
        .route("/stm/search", post(search_stm))
        .route("/stm/:id", get(get_stm))
        // Long-term memory
        .route("/ltm", post(add_ltm))
        .route("/ltm/search", post(search_ltm))
        .route("/ltm/:id", get(get_ltm).delete(delete_ltm))
        // Promotion
        .route("/promote", post(promote))
        .route("/snapshot", post(save_snapshot))
        // Feedback
        .route("/feedback", post(record_feedback))
        .route("/feedback/:id", get(get_feedback))
        // Add CORS
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if state.config.persist_ltm {
        let saved = state.storage.save_ltm(state.manager.ltm())?;
        tracing::info!("Saved {} long-term items on shutdown", saved);
    }

    Ok(())
}

/// Resolve on ctrl-c, or on SIGTERM where the platform has it
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Map a library error onto an HTTP status
///
/// Absent ids never reach here; handlers turn `None` into `404` themselves.
fn status(err: Error) -> StatusCode {
    match err {
        err if err.is_client_error() => {
            tracing::warn!("Rejected request: {}", err);
            StatusCode::BAD_REQUEST
        }
        err => {
            tracing::error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query_embedding: Vec<f32>,
    k: Option<usize>,
    filter: Option<MetadataFilter>,
}

// --- Short-term handlers ---

#[derive(Debug, Serialize)]
struct AddResponse {
    id: String,
    evicted: Option<String>,
}

async fn add_stm(
    State(state): State<SharedState>,
    Json(item): Json<MemoryItem>,
) -> Result<Json<AddResponse>, StatusCode> {
    let id = item.id.clone();
    let evicted = state.manager.add(item).map_err(status)?;

    Ok(Json(AddResponse { id, evicted }))
}

async fn get_stm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryItem>, StatusCode> {
    state
        .manager
        .stm()
        .get(&id)
        .map_err(status)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn search_stm(
    State(state): State<SharedState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, StatusCode> {
    if req.filter.is_some() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let k = req.k.unwrap_or(state.config.max_search_results);
    let hits = state
        .manager
        .search(&req.query_embedding, k)
        .map_err(status)?;

    Ok(Json(hits))
}

// --- Long-term handlers ---

async fn add_ltm(
    State(state): State<SharedState>,
    Json(item): Json<MemoryItem>,
) -> Result<Json<AddResponse>, StatusCode> {
    let id = item.id.clone();
    state.manager.ltm().add(item).map_err(status)?;

    Ok(Json(AddResponse { id, evicted: None }))
}

async fn get_ltm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryItem>, StatusCode> {
    state
        .manager
        .get_from_ltm(&id)
        .map_err(status)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_ltm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, StatusCode> {
    let deleted = state.manager.delete_from_ltm(&id).map_err(status)?;
    Ok(Json(DeleteResponse { deleted }))
}

async fn search_ltm(
    State(state): State<SharedState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, StatusCode> {
    let k = req.k.unwrap_or(state.config.max_search_results);
    let hits = state
        .manager
        .search_ltm(&req.query_embedding, k, req.filter.as_ref())
        .map_err(status)?;

    Ok(Json(hits))
}

// --- Promotion handlers ---

#[derive(Debug, Deserialize)]
struct PromoteRequest {
    id: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct PromoteResponse {
    promoted: bool,
}

async fn promote(
    State(state): State<SharedState>,
    Json(req): Json<PromoteRequest>,
) -> Result<Json<PromoteResponse>, StatusCode> {
    let promoted = state
        .manager
        .promote(&req.id, req.embedding)
        .map_err(status)?;

    Ok(Json(PromoteResponse { promoted }))
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    saved: usize,
}

async fn save_snapshot(
    State(state): State<SharedState>,
) -> Result<Json<SnapshotResponse>, StatusCode> {
    if !state.config.persist_ltm {
        return Err(StatusCode::CONFLICT);
    }

    let saved = state
        .storage
        .save_ltm(state.manager.ltm())
        .map_err(status)?;

    Ok(Json(SnapshotResponse { saved }))
}

// --- Feedback handlers ---

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    memory_id: String,
    helpful: bool,
}

#[derive(Debug, Serialize)]
struct FeedbackResponse {
    memory_id: String,
    helpful: bool,
    recorded_at: String,
}

async fn record_feedback(
    State(state): State<SharedState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .storage
        .record_feedback(&req.memory_id, req.helpful)
        .map_err(status)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_feedback(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<FeedbackResponse>, StatusCode> {
    let feedback = state
        .storage
        .get_feedback(&id)
        .map_err(status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(FeedbackResponse {
        memory_id: feedback.memory_id,
        helpful: feedback.helpful,
        recorded_at: feedback.recorded_at.to_rfc3339(),
    }))
}
