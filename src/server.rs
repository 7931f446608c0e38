//! HTTP facade.
//!
//! Exposes the upload and query pipeline over a small JSON API:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness message |
//! | `POST` | `/upload_file` | Multipart file upload, returns a room id |
//! | `POST` | `/query` | Ask a question against an uploaded file's room |
//!
//! # Error contract
//!
//! Upload errors return `{ "error": "..." }` with 400 (disallowed
//! extension), 413 (oversized payload), or 500 (any other ingestion
//! failure). An unknown room returns 404 `{ "message": "Room not found" }`.
//! Query-time collaborator failures return 500 and leave the session
//! intact for retry.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::answer;
use crate::config::Config;
use crate::embedding;
use crate::error::Error;
use crate::ingest;
use crate::session::SessionRegistry;

/// Shared application state passed to all route handlers via Axum's
/// `State` extractor. The registry lives here rather than in a
/// process-wide global, so tests and embedders construct independent
/// instances.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = SessionRegistry::from_config(&config.registry);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        }
    }
}

/// Build the application router. Separated from [`run_server`] so tests
/// can serve it on an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Leave headroom over our own cap so the service's 413 applies instead
    // of the framework's default body limit.
    let body_limit = state.config.limits.max_upload_bytes + 64 * 1024;

    Router::new()
        .route("/", get(handle_root))
        .route("/upload_file", post(handle_upload))
        .route("/query", post(handle_query))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server. Fails fast on a missing provider credential
/// before binding the listener.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    crate::config::require_credentials(&config)?;

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config);

    // Periodic TTL sweep, only when a TTL is configured.
    if let Some(ttl_secs) = state.config.registry.ttl_secs {
        let registry = Arc::clone(&state.registry);
        let period = std::time::Duration::from_secs(ttl_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = registry.evict_expired();
                if evicted > 0 {
                    tracing::info!(evicted, "expired idle sessions");
                }
            }
        });
    }

    let app = build_router(state);

    tracing::info!("tablechat listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error responses ============

/// JSON error body for upload and query failures.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// JSON body for an unknown room, matching the query contract.
#[derive(Serialize)]
struct NotFoundBody {
    message: String,
}

/// Route-level error that renders the wire contract.
enum AppError {
    Status(StatusCode, String),
    RoomNotFound,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RoomNotFound => (
                StatusCode::NOT_FOUND,
                Json(NotFoundBody {
                    message: "Room not found".to_string(),
                }),
            )
                .into_response(),
            AppError::Status(status, error) => {
                (status, Json(ErrorBody { error })).into_response()
            }
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::RoomNotFound(_) => return AppError::RoomNotFound,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::Status(status, err.to_string())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::Status(StatusCode::BAD_REQUEST, message.into())
}

// ============ GET / ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "tablechat backend is running".to_string(),
    })
}

// ============ POST /upload_file ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    room_id: String,
}

/// Accepts a multipart upload, runs the full ingestion pipeline, and
/// registers the session only after the index is completely built. A
/// failure on any stage returns an error and publishes nothing.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };

        let data = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;

        tracing::info!(file = %filename, bytes = data.len(), "processing upload");

        let index = ingest::build_index(&state.config, &filename, &data).await?;
        let chunk_count = index.len();
        let room_id = state.registry.insert(index, &filename);

        tracing::info!(room_id = %room_id, chunks = chunk_count, "session ready");

        let extension = filename.rsplit('.').next().unwrap_or("").to_uppercase();
        return Ok(Json(UploadResponse {
            message: format!("{extension} file uploaded and processed"),
            room_id: room_id.to_string(),
        }));
    }

    Err(bad_request("no file field in multipart body"))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    room_id: String,
    query: String,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
}

/// Looks up the room, retrieves the top-k most similar chunks, and asks
/// the language model for a grounded answer.
async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let room_id = Uuid::parse_str(&request.room_id).map_err(|_| AppError::RoomNotFound)?;
    let session = state.registry.get(&room_id).ok_or(AppError::RoomNotFound)?;

    let query_vector = embedding::embed_query(&state.config.embedding, &request.query).await?;
    let hits = session
        .index()
        .query(&query_vector, state.config.retrieval.top_k);

    tracing::debug!(room_id = %room_id, retrieved = hits.len(), "retrieved context");

    let answer = answer::generate_answer(&state.config.llm, &request.query, hits).await?;

    Ok(Json(QueryResponse {
        answer: answer.text,
    }))
}
