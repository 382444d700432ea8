//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness banner |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/version` | Version info |
//! | `POST` | `/api/v1/faq/search` | Semantic FAQ search |
//! | `POST` | `/api/v1/faq/regenerate-embeddings` | Rebuild local embeddings for all supported languages |
//! | `DELETE` | `/api/v1/faq/cache` | Delete cached embeddings (`?language=xx` or all) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "No relevant FAQ found ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error` (502),
//! `internal` (500).
//!
//! A search only fails when the chat or embedding provider fails (or returns
//! vectors that do not fit the cached matrix), so search errors are reported
//! as `upstream_error`. Corpus loading problems surface as `not_found`, and
//! cache write failures are logged without failing the request.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::CacheScope;
use crate::config::Config;
use crate::engine::{FaqEngine, RebuildReport, SearchRequest};
use crate::language::parse_language_code;
use crate::models::{FaqEntry, SearchOutcome};

const NO_MATCH_MESSAGE: &str = "No relevant FAQ found for your question. Please try rephrasing it.";

#[derive(Clone)]
struct AppState {
    engine: Arc<FaqEngine>,
}

/// Start the server with providers built from `config`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(FaqEngine::from_config(config)?);
    run_server_with_engine(config, engine).await
}

/// Start the server around an already-constructed engine.
pub async fn run_server_with_engine(config: &Config, engine: Arc<FaqEngine>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "FAQ server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn router(engine: Arc<FaqEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_home))
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/api/v1/faq/search", post(handle_search))
        .route(
            "/api/v1/faq/regenerate-embeddings",
            post(handle_regenerate),
        )
        .route("/api/v1/faq/cache", delete(handle_invalidate))
        .layer(cors)
        .with_state(AppState { engine })
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ Home / health / version ============

async fn handle_home() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "detail": "FAQ Match API running..." }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
    }))
}

// ============ POST /api/v1/faq/search ============

#[derive(Deserialize)]
struct SearchBody {
    question: String,
    #[serde(default)]
    faq_url: Option<String>,
    #[serde(default)]
    enhance: bool,
}

#[derive(Serialize)]
struct FaqResponse {
    faqs: Vec<FaqEntry>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<FaqResponse>, AppError> {
    if body.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let req = SearchRequest {
        question: body.question,
        faq_url: body.faq_url.filter(|u| !u.trim().is_empty()),
        enhance: body.enhance,
    };

    match state.engine.search(&req).await {
        Ok(SearchOutcome::Found(m)) => Ok(Json(FaqResponse {
            faqs: vec![FaqEntry::new(m.question, m.answer)],
        })),
        Ok(SearchOutcome::NoMatch) => Err(not_found(NO_MATCH_MESSAGE)),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "search failed");
            Err(upstream_error(format!("{:#}", e)))
        }
    }
}

// ============ POST /api/v1/faq/regenerate-embeddings ============

#[derive(Serialize)]
struct RegenerateResponse {
    message: &'static str,
    languages: Vec<RebuildReport>,
}

async fn handle_regenerate(State(state): State<AppState>) -> impl IntoResponse {
    let languages = state.engine.supported_languages().to_vec();
    let reports = state.engine.rebuild_embeddings(&languages).await;

    (
        StatusCode::ACCEPTED,
        Json(RegenerateResponse {
            message: "Embedding regeneration processed for all supported languages.",
            languages: reports,
        }),
    )
}

// ============ DELETE /api/v1/faq/cache ============

#[derive(Deserialize)]
struct InvalidateParams {
    language: Option<String>,
}

#[derive(Serialize)]
struct InvalidateResponse {
    removed: usize,
}

async fn handle_invalidate(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let scope = match params.language {
        Some(raw) => {
            let code = parse_language_code(&raw)
                .ok_or_else(|| bad_request(format!("invalid language code: {}", raw)))?;
            CacheScope::Language(code)
        }
        None => CacheScope::All,
    };

    let removed = state
        .engine
        .invalidate_cache(&scope)
        .map_err(|e| internal(format!("{:#}", e)))?;

    Ok(Json(InvalidateResponse { removed }))
}
