// Recon Engine - Web Server
// JSON API over the reconciliation engine, with axum

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use recon_engine::{
    logging, AppTransaction, BankTransaction, CategoryClassifier, ConflictResolution,
    DuplicateAction, NoopClassifier, ReconError, ReconciliationConfig, ReconciliationEngine,
    ReconciliationSummary, RuleClassifier, SqliteStore,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<ReconciliationEngine>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Library errors mapped onto HTTP status codes
struct ApiError(ReconError);

impl From<ReconError> for ApiError {
    fn from(err: ReconError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReconError::NotFound(_) => StatusCode::NOT_FOUND,
            ReconError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Request / Response bodies
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileRequest {
    bank_transactions: Vec<BankTransaction>,
    #[serde(default)]
    app_transactions: Vec<AppTransaction>,
}

/// Summary plus the bank batch, with any categories the run attached
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileResponse {
    summary: ReconciliationSummary,
    bank_transactions: Vec<BankTransaction>,
}

#[derive(Deserialize)]
struct ResolveConflictRequest {
    resolution: ConflictResolution,
}

#[derive(Deserialize)]
struct ResolveDuplicateRequest {
    action: DuplicateAction,
}

#[derive(Deserialize)]
struct ReviewRequest {
    reviewer: String,
    #[serde(default = "default_accept")]
    accept: bool,
}

fn default_accept() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualMatchRequest {
    bank_transaction: BankTransaction,
    app_transaction: AppTransaction,
    reviewer: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// POST /api/reconcile - Run one reconciliation
async fn reconcile(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<ReconcileResponse> {
    let mut bank_transactions = request.bank_transactions;
    let summary = state
        .engine
        .reconcile(&mut bank_transactions, &request.app_transactions)
        .await;

    Ok(ApiResponse::ok(ReconcileResponse {
        summary,
        bank_transactions,
    }))
}

/// GET /api/matches
async fn get_matches(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine.matches().await)
}

/// GET /api/conflicts
async fn get_conflicts(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine.conflicts().await)
}

/// GET /api/duplicates
async fn get_duplicates(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine.duplicate_groups().await)
}

/// GET /api/summary - Summary of the last run since startup
async fn get_summary(State(state): State<AppState>) -> ApiResult<ReconciliationSummary> {
    state
        .engine
        .summary()
        .await
        .map(ApiResponse::ok)
        .ok_or_else(|| ReconError::NotFound("no reconciliation has run yet".to_string()).into())
}

/// POST /api/conflicts/:id/resolve
async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveConflictRequest>,
) -> ApiResult<recon_engine::ReconciliationConflict> {
    let conflict = state.engine.resolve_conflict(&id, request.resolution).await?;
    Ok(ApiResponse::ok(conflict))
}

/// POST /api/duplicates/:id/resolve
async fn resolve_duplicate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveDuplicateRequest>,
) -> ApiResult<recon_engine::DuplicateGroup> {
    let group = state.engine.resolve_duplicate(&id, request.action).await?;
    Ok(ApiResponse::ok(group))
}

/// POST /api/matches/:id/review
async fn review_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<recon_engine::ReconciliationMatch> {
    let record = state
        .engine
        .review_match(&id, &request.reviewer, request.accept)
        .await?;
    Ok(ApiResponse::ok(record))
}

/// POST /api/matches/manual
async fn create_manual_match(
    State(state): State<AppState>,
    Json(request): Json<ManualMatchRequest>,
) -> ApiResult<recon_engine::ReconciliationMatch> {
    let record = state
        .engine
        .create_manual_match(
            &request.bank_transaction,
            &request.app_transaction,
            &request.reviewer,
        )
        .await?;
    Ok(ApiResponse::ok(record))
}

fn router(engine: Arc<ReconciliationEngine>) -> Router {
    let state = AppState { engine };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/reconcile", post(reconcile))
        .route("/summary", get(get_summary))
        .route("/matches", get(get_matches))
        .route("/matches/manual", post(create_manual_match))
        .route("/matches/:id/review", post(review_match))
        .route("/conflicts", get(get_conflicts))
        .route("/conflicts/:id/resolve", post(resolve_conflict))
        .route("/duplicates", get(get_duplicates))
        .route("/duplicates/:id/resolve", post(resolve_duplicate))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("RECON_CONFIG") {
        Ok(path) => ReconciliationConfig::from_file(path)?,
        Err(_) => ReconciliationConfig::default(),
    }
    .with_env_overrides()?;
    logging::init(&config.log_level);

    let store = SqliteStore::open(&config.storage.db_path)?;
    info!(db_path = ?config.storage.db_path, "store opened");

    let classifier: Arc<dyn CategoryClassifier> = match &config.classifier.rules_path {
        Some(path) => Arc::new(RuleClassifier::from_file(path)?),
        None => Arc::new(NoopClassifier),
    };

    let engine = ReconciliationEngine::open(config, Arc::new(store), classifier)?;
    let app = router(Arc::new(engine));

    let addr = std::env::var("RECON_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
