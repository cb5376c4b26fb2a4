//! HTTP API: usage, prompt testing, the game and diagnostics

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use casefile_core::{Error, ServiceKind};
use casefile_game::{
    AnalysisRequest, AnalysisResponse, DetectiveCase, DetectiveService, DynamicCharacterRequest,
    DynamicCharacterResponse, GenerateCaseRequest, GeneratedCaseResponse, QuestionRequest, QuestionResponse,
    VisualSceneRequest, VisualSceneResponse,
};
use casefile_observability::{HealthState, Metrics, health_router};
use casefile_prompt_tests::{DEFAULT_HISTORY_LIMIT, PromptType, TestRunner};
use casefile_usage::{DEFAULT_RECORDS_LIMIT, RateLimiter, UsageLedger};
use serde::Deserialize;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

/// Shared handles for every handler
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<UsageLedger>,
    pub limiter: Arc<RateLimiter>,
    pub runner: Arc<TestRunner>,
    pub game: Arc<DetectiveService>,
    pub metrics: Arc<Metrics>,
    pub statistics_window_days: u32,
}

/// Build the full API router, health and metrics endpoints included
pub fn router(state: AppState) -> Router {
    let health = health_router(HealthState::new(state.metrics.clone()));

    Router::new()
        .route("/api/usage/session/{session_id}", get(session_usage))
        .route("/api/usage/statistics", get(usage_statistics))
        .route("/api/usage/rate-limits/{session_id}", get(rate_limits))
        .route("/api/usage/records", get(usage_records))
        .route("/api/testing/test-cases", get(test_cases))
        .route("/api/testing/run-tests", post(run_tests))
        .route("/api/testing/test-history", get(test_history))
        .route("/api/testing/validate-prompt", post(validate_prompt))
        .route("/api/testing/health-report", get(health_report))
        .route("/api/generate-case", post(generate_case))
        .route("/api/cases/{case_id}", get(get_case))
        .route("/api/question-character", post(question_character))
        .route("/api/analyze-evidence", post(analyze_evidence))
        .route("/api/case-scenes/{case_id}", get(case_scenes))
        .route("/api/generate-dynamic-character", post(generate_dynamic_character))
        .route("/api/generate-visual-scene", post(generate_visual_scene))
        .route("/api/diagnostics/image-failures", get(image_failures))
        .with_state(state)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Maps core errors onto HTTP statuses with a JSON `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Upstream { .. } | Error::Parse(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = match &self.0 {
            Error::RateLimitExceeded(ceiling) => json!({
                "error": self.0.to_string(),
                "ceiling": ceiling.name(),
            }),
            err => json!({ "error": err.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// Usage

async fn session_usage(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Value> {
    let usage = state.ledger.session_summary(&session_id).await?;
    Ok(Json(json!({ "usage": usage })))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    days: Option<u32>,
}

async fn usage_statistics(State(state): State<AppState>, Query(params): Query<StatisticsQuery>) -> ApiResult<Value> {
    let days = params.days.unwrap_or(state.statistics_window_days);
    if days == 0 {
        return Err(Error::InvalidRequest("days must be at least 1".to_string()).into());
    }
    let statistics = state.ledger.statistics(days).await?;
    Ok(Json(json!({ "statistics": statistics })))
}

async fn rate_limits(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Value> {
    let status = state.limiter.check(&session_id).await?;
    Ok(Json(json!({ "session_id": session_id, "rate_limits": status })))
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    session_id: Option<String>,
    #[serde(default = "default_records_limit")]
    limit: usize,
}

fn default_records_limit() -> usize {
    DEFAULT_RECORDS_LIMIT
}

async fn usage_records(State(state): State<AppState>, Query(params): Query<RecordsQuery>) -> ApiResult<Value> {
    let records = state
        .ledger
        .list_records(params.session_id.as_deref(), params.limit)
        .await?;
    Ok(Json(json!({ "count": records.len(), "records": records })))
}

// Prompt testing

async fn test_cases(State(state): State<AppState>) -> Json<Value> {
    let cases = state.runner.catalog();
    Json(json!({ "test_cases": cases, "count": cases.len() }))
}

#[derive(Debug, Deserialize)]
pub struct RunTestsQuery {
    /// Comma-separated prompt types; all types when absent
    test_types: Option<String>,
}

/// Parse a comma-separated list of prompt types, ignoring blanks
pub fn parse_prompt_types(list: &str) -> casefile_core::Result<Vec<PromptType>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PromptType::from_str)
        .collect()
}

async fn run_tests(State(state): State<AppState>, Query(params): Query<RunTestsQuery>) -> ApiResult<Value> {
    let types = params.test_types.as_deref().map(parse_prompt_types).transpose()?;
    let session_id = state.runner.config().session_id.clone();
    let suite = state.runner.run_suite(&session_id, types.as_deref()).await;
    Ok(Json(json!({ "summary": suite.summary(), "test_suite": suite })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

async fn test_history(State(state): State<AppState>, Query(params): Query<HistoryQuery>) -> ApiResult<Value> {
    let suites = state.runner.history(params.limit).await?;
    Ok(Json(json!({ "count": suites.len(), "test_suites": suites })))
}

#[derive(Debug, Deserialize)]
pub struct ValidatePromptRequest {
    prompt_type: String,
    prompt_text: String,
    #[serde(default)]
    service: Option<String>,
}

async fn validate_prompt(
    State(state): State<AppState>,
    Json(request): Json<ValidatePromptRequest>,
) -> ApiResult<Value> {
    let prompt_type = PromptType::from_str(&request.prompt_type)?;
    let service = request.service.as_deref().map(ServiceKind::from_str).transpose()?;
    let result = state
        .runner
        .validate_single_prompt(prompt_type, &request.prompt_text, service)
        .await?;
    let validation = result.detailed_results.clone();
    Ok(Json(json!({ "test_result": result, "validation": validation })))
}

async fn health_report(State(state): State<AppState>) -> ApiResult<Value> {
    let report = state.runner.health_report().await?;
    Ok(Json(json!({ "report": report })))
}

// Game

async fn generate_case(State(state): State<AppState>, body: Bytes) -> ApiResult<GeneratedCaseResponse> {
    let request: GenerateCaseRequest = if body.iter().all(u8::is_ascii_whitespace) {
        GenerateCaseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| Error::InvalidRequest(format!("Invalid request body: {}", e)))?
    };
    Ok(Json(state.game.generate_case(request.session_id).await?))
}

async fn get_case(State(state): State<AppState>, Path(case_id): Path<String>) -> ApiResult<DetectiveCase> {
    Ok(Json(state.game.get_case(&case_id).await?))
}

async fn question_character(
    State(state): State<AppState>,
    Json(request): Json<QuestionRequest>,
) -> ApiResult<QuestionResponse> {
    Ok(Json(state.game.question_character(request).await?))
}

async fn analyze_evidence(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<AnalysisResponse> {
    Ok(Json(state.game.analyze_evidence(request).await?))
}

async fn case_scenes(State(state): State<AppState>, Path(case_id): Path<String>) -> ApiResult<Value> {
    let scenes = state.game.case_scenes(&case_id).await?;
    Ok(Json(json!({ "count": scenes.len(), "scenes": scenes })))
}

async fn generate_dynamic_character(
    State(state): State<AppState>,
    Json(request): Json<DynamicCharacterRequest>,
) -> ApiResult<DynamicCharacterResponse> {
    Ok(Json(state.game.generate_dynamic_character(request).await?))
}

async fn generate_visual_scene(
    State(state): State<AppState>,
    Json(request): Json<VisualSceneRequest>,
) -> ApiResult<VisualSceneResponse> {
    Ok(Json(state.game.generate_visual_scene(request).await?))
}

// Diagnostics

async fn image_failures(State(state): State<AppState>) -> Json<Value> {
    let failures = state.game.images().failures();
    Json(json!({ "count": failures.len(), "failures": failures }))
}
