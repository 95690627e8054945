//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents/{id}/ingest` | Start an ingestion run; returns `202` with a run id |
//! | `GET`  | `/documents/{id}` | Document status record |
//! | `GET`  | `/documents` | All document status records |
//! | `POST` | `/chat` | One chat turn |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The ingest body is optional: `{"location": "public/brochure.pdf"}`.
//! Without it the document is read from `public/{id}`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embeddings_disabled` (400), `internal` (500).
//!
//! Chat failures after validation are not errors: the engine answers with
//! its fallback text and status 200.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use ragchat_core::models::{document_id_from_location, ChatReply, DocumentRecord, UPLOAD_PREFIX};

use crate::app::App;
use crate::chat::{ChatError, ChatRequest};
use crate::config::Config;
use crate::ingest::expire_stale_runs;

/// Build the app from `config`, start the stale-run watchdog and serve until
/// the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::from_config(config).await?);
    spawn_watchdog(
        app.clone(),
        Duration::from_secs(config.pipeline.watchdog_interval_secs),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("ragchat server listening on http://{}", config.server.bind);
    axum::serve(listener, router(app)).await?;
    Ok(())
}

/// Routes over an already-built [`App`].
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}", get(handle_get_document))
        .route("/documents/{id}/ingest", post(handle_ingest))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(app)
}

/// Periodically fail runs that stopped making progress. Periods below one
/// second are raised to one second.
pub fn spawn_watchdog(app: Arc<App>, every: Duration) -> tokio::task::JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = expire_stale_runs(app.documents.as_ref(), app.stale_after, Utc::now()).await {
                error!(error = %format!("{:#}", e), "stale run sweep failed");
            }
        }
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidRequest(msg) => bad_request(msg),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize, Default)]
struct IngestBody {
    #[serde(default)]
    location: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestAccepted {
    run_id: String,
    document_id: String,
    status: String,
}

/// Handler for `POST /documents/{id}/ingest`.
///
/// Writes the `PENDING` record, then runs the pipeline in the background.
async fn handle_ingest(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let pipeline = app.pipeline.clone().ok_or_else(|| AppError {
        status: StatusCode::BAD_REQUEST,
        code: "embeddings_disabled".to_string(),
        message: "ingestion requires an [embedding] provider".to_string(),
    })?;

    let body: IngestBody = if body.iter().all(u8::is_ascii_whitespace) {
        IngestBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    let location = body
        .location
        .unwrap_or_else(|| format!("{}{}", UPLOAD_PREFIX, id));
    if document_id_from_location(&location) != id {
        return Err(bad_request(format!(
            "location '{}' does not belong to document '{}'",
            location, id
        )));
    }

    let run = pipeline.trigger(&location).await.map_err(internal)?;
    let accepted = IngestAccepted {
        run_id: run.run_id.clone(),
        document_id: run.document_id.clone(),
        status: "PENDING".to_string(),
    };
    tokio::spawn(async move {
        pipeline.process(run).await;
    });
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn handle_get_document(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentRecord>, AppError> {
    match app.documents.get(&id).await.map_err(internal)? {
        Some(record) => Ok(Json(record)),
        None => Err(not_found(format!("document not found: {}", id))),
    }
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentRecord>,
}

async fn handle_list_documents(State(app): State<Arc<App>>) -> Result<Json<DocumentList>, AppError> {
    let documents = app.documents.list().await.map_err(internal)?;
    Ok(Json(DocumentList { documents }))
}

// ============ POST /chat ============

async fn handle_chat(
    State(app): State<Arc<App>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    Ok(Json(app.chat.turn(request).await?))
}
