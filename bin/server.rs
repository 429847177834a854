// Industry Ledger - Web Server
// REST API over the job store with Axum

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use industry_ledger::{
    categorize_jobs, missing_materials, needs_attention, sales_tax_percent,
    set_sales_tax_percent, BatchPreview, Direction, Job, JobMetrics, JobStore, MissingMaterial,
    PortfolioTotals, PreviewError, SettingsError, SqliteRepository, StoreError, UnitPricing,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<JobStore<SqliteRepository>>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        let body = ApiResponse {
            success: false,
            data: (),
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::JobNotFound(_) | StoreError::TransactionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StoreError::Persistence(_) | StoreError::PartialSubmit { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<PreviewError> for ApiError {
    fn from(err: PreviewError) -> Self {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        let status = match err {
            SettingsError::InvalidSalesTax(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn lock(state: &AppState) -> Result<MutexGuard<'_, JobStore<SqliteRepository>>, ApiError> {
    state
        .store
        .lock()
        .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Store lock poisoned"))
}

fn parse_direction(raw: &str) -> Result<Direction, ApiError> {
    raw.parse()
        .map_err(|e: String| ApiError::new(StatusCode::BAD_REQUEST, e))
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Deserialize)]
struct JobsQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct JobSummary {
    job: Job,
    needs_attention: bool,
}

#[derive(Serialize)]
struct JobsResponse {
    regular: Vec<JobSummary>,
    tracked: Vec<JobSummary>,
}

#[derive(Serialize)]
struct JobMetricsResponse {
    metrics: JobMetrics,
    pricing: Option<UnitPricing>,
}

#[derive(Deserialize)]
struct PasteRequest {
    text: String,
    /// Manual assignments applied on top of the automatic ones
    #[serde(default)]
    assignments: Vec<ManualAssignment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualAssignment {
    group: usize,
    job_id: String,
}

#[derive(Serialize)]
struct CommitResponse {
    created: usize,
    preview: BatchPreview,
}

#[derive(Serialize, Deserialize)]
struct SalesTax {
    percent: f64,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

async fn get_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<JobsResponse> {
    let store = lock(&state)?;
    let now = Utc::now();
    let categorized = categorize_jobs(store.jobs(), &query.q);
    let summarize = |jobs: Vec<Job>| {
        jobs.into_iter()
            .map(|job| JobSummary {
                needs_attention: needs_attention(&job, now),
                job,
            })
            .collect()
    };
    Ok(Json(ApiResponse::ok(JobsResponse {
        regular: summarize(categorized.regular),
        tracked: summarize(categorized.tracked),
    })))
}

async fn get_job_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<JobMetricsResponse> {
    let store = lock(&state)?;
    let job = store.job(&id).ok_or(StoreError::JobNotFound(id.clone()))?;
    let tax = sales_tax_percent(store.repository())?;
    Ok(Json(ApiResponse::ok(JobMetricsResponse {
        metrics: JobMetrics::compute(job),
        pricing: UnitPricing::compute(job, tax),
    })))
}

async fn get_job_missing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<MissingMaterial>> {
    let store = lock(&state)?;
    let job = store.job(&id).ok_or(StoreError::JobNotFound(id.clone()))?;
    Ok(Json(ApiResponse::ok(missing_materials(job))))
}

async fn get_portfolio(State(state): State<AppState>) -> ApiResult<PortfolioTotals> {
    let mut store = lock(&state)?;
    Ok(Json(ApiResponse::ok(store.portfolio_totals())))
}

fn prepare_batch(
    store: &JobStore<SqliteRepository>,
    direction: &str,
    request: &PasteRequest,
) -> Result<BatchPreview, ApiError> {
    let direction = parse_direction(direction)?;
    let mut preview = store.preview_paste(&request.text, direction);
    for manual in &request.assignments {
        preview.assign_job(manual.group, &manual.job_id)?;
    }
    Ok(preview)
}

async fn preview_paste(
    State(state): State<AppState>,
    Path(direction): Path<String>,
    Json(request): Json<PasteRequest>,
) -> ApiResult<BatchPreview> {
    let store = lock(&state)?;
    let preview = prepare_batch(&store, &direction, &request)?;
    Ok(Json(ApiResponse::ok(preview)))
}

async fn commit_paste(
    State(state): State<AppState>,
    Path(direction): Path<String>,
    Json(request): Json<PasteRequest>,
) -> ApiResult<CommitResponse> {
    let mut store = lock(&state)?;
    let preview = prepare_batch(&store, &direction, &request)?;
    if !preview.can_submit() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Nothing to submit",
        ));
    }
    let created = store.submit_batch(&preview)?;
    Ok(Json(ApiResponse::ok(CommitResponse { created, preview })))
}

async fn get_sales_tax(State(state): State<AppState>) -> ApiResult<SalesTax> {
    let store = lock(&state)?;
    let percent = sales_tax_percent(store.repository())?;
    Ok(Json(ApiResponse::ok(SalesTax { percent })))
}

async fn put_sales_tax(
    State(state): State<AppState>,
    Json(body): Json<SalesTax>,
) -> ApiResult<SalesTax> {
    let store = lock(&state)?;
    set_sales_tax_percent(store.repository(), body.percent)?;
    info!(percent = body.percent, "Sales tax updated");
    Ok(Json(ApiResponse::ok(body)))
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/jobs", get(get_jobs))
        .route("/jobs/:id/metrics", get(get_job_metrics))
        .route("/jobs/:id/missing", get(get_job_missing))
        .route("/portfolio", get(get_portfolio))
        .route("/paste/:direction", post(preview_paste))
        .route("/paste/:direction/commit", post(commit_paste))
        .route("/settings/sales-tax", get(get_sales_tax).put(put_sales_tax))
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "industry_ledger=info,ledger_server=info,tower_http=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let settings = industry_ledger::load_settings();
    let repo = SqliteRepository::open(&settings.database_path)?;
    let mut store = JobStore::with_debounce(repo, settings.notify_debounce());
    store.load_jobs(None)?;
    info!(path = %settings.database_path.display(), jobs = store.jobs().len(), "Database opened");

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
    };

    let app = Router::new()
        .nest("/api", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    info!(addr = %settings.listen_addr, "Server running");

    axum::serve(listener, app).await?;
    Ok(())
}
