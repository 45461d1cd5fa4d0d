//! JSON HTTP API.
//!
//! Every route lives under `/api/v1` and delegates to a shared [`Weaver`].
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/chat-logs/process` | Turn a batch of chat messages into draft entries |
//! | `POST`   | `/analyze` | Suggest a classification without storing |
//! | `POST`   | `/ingest` | Store a manual capture or gap resolution |
//! | `POST`   | `/knowledge/query` | Semantic search |
//! | `GET`    | `/knowledge/recent` | Newest entries (`?limit=&deleted=`) |
//! | `GET`    | `/knowledge/{id}` | Fetch one entry |
//! | `PATCH`  | `/knowledge/{id}` | Edit content or classification |
//! | `DELETE` | `/knowledge/{id}` | Soft delete |
//! | `POST`   | `/knowledge/{id}/restore` | Undo a soft delete |
//! | `GET`    | `/metrics/gaps` | Recurring unanswered queries |
//! | `GET`    | `/metrics/learning` | Correction counters and history |
//! | `GET`    | `/metrics/queries` | Query log (`?since=&until=&limit=`) |
//! | `GET`    | `/metrics/dashboard` | Headline counters |
//! | `GET`    | `/health` | Index and provider readiness |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_input", "message": "query must not be empty" } }
//! ```
//!
//! `invalid_input` and `batch_too_large` map to 400, `not_found` to 404, and
//! provider, timeout, and index failures to 503.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use knowledge_weaver_core::models::{ChatMessage, CorrectionEvent, KnowledgeEntry};
use knowledge_weaver_core::WeaverError;

use crate::engine::{IngestRequest, Weaver};
use crate::learning::LearningStats;
use crate::repository::EntryPatch;

const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_GAP_WINDOW_DAYS: i64 = 7;
const HISTORY_LIMIT: usize = 10;

type AppState = Arc<Weaver>;

/// Bind to `[server].bind` and serve until the process exits.
pub async fn run_server(weaver: Weaver) -> anyhow::Result<()> {
    let bind_addr = weaver.config().server.bind.clone();
    let app = router(Arc::new(weaver));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "knowledge weaver listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(weaver: Arc<Weaver>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/chat-logs/process", post(handle_process))
        .route("/analyze", post(handle_analyze))
        .route("/ingest", post(handle_ingest))
        .route("/knowledge/query", post(handle_query))
        .route("/knowledge/recent", get(handle_recent))
        .route(
            "/knowledge/{id}",
            get(handle_get).patch(handle_edit).delete(handle_delete),
        )
        .route("/knowledge/{id}/restore", post(handle_restore))
        .route("/metrics/gaps", get(handle_gaps))
        .route("/metrics/learning", get(handle_learning))
        .route("/metrics/queries", get(handle_query_logs))
        .route("/metrics/dashboard", get(handle_dashboard))
        .route("/health", get(handle_health));

    Router::new()
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(weaver)
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

impl From<WeaverError> for AppError {
    fn from(err: WeaverError) -> Self {
        let status = match &err {
            WeaverError::InvalidInput(_) | WeaverError::BatchTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            WeaverError::NotFound(_) => StatusCode::NOT_FOUND,
            WeaverError::Provider { .. } | WeaverError::Timeout { .. } | WeaverError::Index(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Ingestion ============

#[derive(Deserialize)]
struct ProcessRequest {
    messages: Vec<ChatMessage>,
}

async fn handle_process(
    State(weaver): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<crate::processor::ProcessingResult> {
    Ok(Json(weaver.process_chat_logs(req.messages).await?))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    text: String,
}

async fn handle_analyze(
    State(weaver): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<knowledge_weaver_core::models::Classification> {
    Ok(Json(weaver.analyze(&req.text).await?))
}

async fn handle_ingest(
    State(weaver): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<KnowledgeEntry>), AppError> {
    let entry = weaver.ingest(req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// ============ Knowledge ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    verified_only: bool,
}

async fn handle_query(
    State(weaver): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<crate::query::QueryResult> {
    Ok(Json(weaver.query(&req.query, req.verified_only).await?))
}

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<usize>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Serialize)]
struct EntryList {
    entries: Vec<KnowledgeEntry>,
}

async fn handle_recent(
    State(weaver): State<AppState>,
    Query(params): Query<RecentParams>,
) -> ApiResult<EntryList> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let entries = weaver.list_recent(limit, params.deleted).await?;
    Ok(Json(EntryList { entries }))
}

async fn handle_get(
    State(weaver): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<KnowledgeEntry> {
    Ok(Json(weaver.get(&id).await?))
}

async fn handle_edit(
    State(weaver): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<EntryPatch>,
) -> ApiResult<crate::repository::EditOutcome> {
    Ok(Json(weaver.edit(&id, patch).await?))
}

async fn handle_delete(
    State(weaver): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<KnowledgeEntry> {
    Ok(Json(weaver.soft_delete(&id).await?))
}

async fn handle_restore(
    State(weaver): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<KnowledgeEntry> {
    Ok(Json(weaver.restore(&id).await?))
}

// ============ Metrics ============

#[derive(Deserialize)]
struct GapParams {
    days: Option<i64>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct GapList {
    gaps: Vec<knowledge_weaver_core::models::KnowledgeGap>,
}

async fn handle_gaps(
    State(weaver): State<AppState>,
    Query(params): Query<GapParams>,
) -> ApiResult<GapList> {
    let gaps = weaver
        .list_gaps(
            params.days.unwrap_or(DEFAULT_GAP_WINDOW_DAYS),
            params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(GapList { gaps }))
}

#[derive(Serialize)]
struct LearningResponse {
    #[serde(flatten)]
    stats: LearningStats,
    recent: Vec<CorrectionEvent>,
}

async fn handle_learning(State(weaver): State<AppState>) -> ApiResult<LearningResponse> {
    let stats = weaver.learning_stats().await?;
    let recent = weaver.correction_history(HISTORY_LIMIT).await?;
    Ok(Json(LearningResponse { stats, recent }))
}

#[derive(Deserialize)]
struct QueryLogParams {
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct QueryLogList {
    queries: Vec<knowledge_weaver_core::models::QueryLogEntry>,
}

async fn handle_query_logs(
    State(weaver): State<AppState>,
    Query(params): Query<QueryLogParams>,
) -> ApiResult<QueryLogList> {
    let queries = weaver
        .query_logs(
            params.since,
            params.until,
            params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(QueryLogList { queries }))
}

async fn handle_dashboard(
    State(weaver): State<AppState>,
) -> ApiResult<crate::metrics::Dashboard> {
    Ok(Json(weaver.dashboard().await?))
}

// ============ GET /health ============

async fn handle_health(State(weaver): State<AppState>) -> Response {
    let health = weaver.health().await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}
