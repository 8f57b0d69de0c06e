//! HTTP front door.
//!
//! Receives chat events from the platform relay and exposes operational
//! triggers over a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/events` | Submit one inbound chat event |
//! | `POST` | `/api/v1/embeds` | Embed a single record by kind and id |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Event handling responds as soon as the correlator has classified and
//! persisted the event; answering a question runs on a detached task so the
//! relay never waits on the assistant.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown record kind" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! relays and dashboards.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::correlator::Correlator;
use crate::embedding::{create_embedder, Embedder};
use crate::error::CoreError;
use crate::index::{HttpVectorIndex, VectorIndex};
use crate::models::{EventOutcome, InboundEvent};
use crate::reconcile::embed_one;
use crate::responder::{
    NullPoster, OpenAiAssistant, QuestionResponder, WebhookPoster,
};
use crate::store::{InteractionRepository, PageRepository, RecordStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    correlator: Arc<Correlator>,
    /// Present when `responder.provider` is enabled; without it, events are
    /// classified and persisted but no answer is generated.
    responder: Option<Arc<QuestionResponder>>,
    pages: Arc<PageRepository>,
    interactions: Arc<InteractionRepository>,
    embedder: Arc<dyn Embedder>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, wires up the correlator, responder, and
/// embedding repositories, and serves until the process is terminated.
pub async fn run_server(config: &Config, store: Arc<RecordStore>) -> anyhow::Result<()> {
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    let index: Arc<dyn VectorIndex> = Arc::new(HttpVectorIndex::new(&config.index)?);

    let correlator = Arc::new(
        Correlator::load(store.clone(), config.correlator.allowed_workspaces.clone()).await?,
    );

    let responder = if config.responder.is_enabled() {
        let assistant = Arc::new(OpenAiAssistant::new(&config.responder)?);
        let poster: Arc<dyn crate::responder::ChatPoster> = match &config.responder.post_url {
            Some(url) => Arc::new(WebhookPoster::new(
                url.clone(),
                config.responder.timeout_secs,
            )?),
            None => Arc::new(NullPoster),
        };
        Some(Arc::new(QuestionResponder::new(
            store.clone(),
            embedder.clone(),
            index.clone(),
            assistant,
            poster,
            config.index.pages_collection.clone(),
            config.responder.context_k,
            config.index.max_k,
        )))
    } else {
        None
    };

    let state = AppState {
        correlator,
        responder,
        pages: Arc::new(PageRepository::new(store.clone())),
        interactions: Arc::new(InteractionRepository::new(store)),
        embedder,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/events", post(handle_event))
        .route("/api/v1/embeds", post(handle_embed))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request".to_string(),
                message,
            },
            CoreError::Integrity(message) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found".to_string(),
                message,
            },
            CoreError::Transient(message) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upstream".to_string(),
                message,
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: other.to_string(),
            },
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

// ============ POST /api/v1/events ============

/// Handler for `POST /api/v1/events`.
///
/// Classifies the event through the correlator and returns the outcome.
/// When the event opens a question (or adds feedback) and a responder is
/// configured, the answer runs on a detached task.
async fn handle_event(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> Result<Json<EventOutcome>, AppError> {
    let feedback_text = event.text.clone();
    let outcome = state.correlator.handle_event(event).await?;

    if let Some(responder) = &state.responder {
        match &outcome {
            EventOutcome::Question { thread_id } => {
                let responder = responder.clone();
                let thread_id = thread_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = responder.answer_question(&thread_id).await {
                        warn!(thread_id = %thread_id, "answering failed: {}", e);
                    }
                });
            }
            EventOutcome::Feedback { thread_id, .. } => {
                let responder = responder.clone();
                let thread_id = thread_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = responder.answer_feedback(&thread_id, &feedback_text).await {
                        warn!(thread_id = %thread_id, "follow-up failed: {}", e);
                    }
                });
            }
            EventOutcome::Duplicate | EventOutcome::Ignored { .. } => {}
        }
    }

    Ok(Json(outcome))
}

// ============ POST /api/v1/embeds ============

#[derive(Deserialize)]
struct EmbedRequest {
    /// `"page"` or `"interaction"`.
    kind: String,
    id: String,
}

#[derive(Serialize)]
struct EmbedResponse {
    status: String,
    kind: String,
    id: String,
}

/// Handler for `POST /api/v1/embeds`.
///
/// Embeds one record immediately, outside the reconciliation cadence.
async fn handle_embed(
    State(state): State<AppState>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, AppError> {
    match request.kind.as_str() {
        "page" => {
            embed_one(state.pages.as_ref(), state.embedder.as_ref(), &request.id).await?
        }
        "interaction" => {
            embed_one(
                state.interactions.as_ref(),
                state.embedder.as_ref(),
                &request.id,
            )
            .await?
        }
        other => {
            return Err(AppError {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request".to_string(),
                message: format!("unknown record kind: {}", other),
            })
        }
    }

    info!(kind = %request.kind, id = %request.id, "single record embedded");
    Ok(Json(EmbedResponse {
        status: "embedded".to_string(),
        kind: request.kind,
        id: request.id,
    }))
}
