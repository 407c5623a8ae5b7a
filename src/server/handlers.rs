// HTTP request handlers

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::streams;
use super::DashboardServer;
use crate::batch;
use crate::errors::DashboardError;
use crate::metrics::{MetricsQuery, MetricsQueryResult, Ratio, StatSource};
use crate::registry::Capability;
use crate::session::{RenderingStatus, SessionState, SessionStatus, ShaderSettings};
use crate::store::{ConfigPatch, ConfigPayload, Configuration, CurrentConfig, DirtyState};

/// Create the main application router
pub fn create_router(server: Arc<DashboardServer>) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/session/start", post(start_session))
        .route("/api/session/stop", post(stop_session))
        .route("/api/session/status", get(session_status))
        .route("/api/session/rendering", get(rendering_status))
        // Viewer filters
        .route("/api/shaders", get(get_shaders))
        .route("/api/shaders/toggle", post(toggle_shader))
        .route("/api/shaders/toggle_all", post(toggle_all_shaders))
        // Configuration catalogue
        .route("/api/configs", get(list_configs).post(save_config))
        .route("/api/configs/default", get(load_default_config))
        .route("/api/configs/:name", get(load_config).delete(delete_config))
        .route(
            "/api/config/current",
            get(current_config).patch(update_current_config),
        )
        .route("/api/config/reset", post(reset_config))
        .route("/api/capabilities", get(list_capabilities))
        .route("/api/batch_sizes", get(batch_sizes))
        // Metrics
        .route("/api/metrics/query", post(query_metrics))
        .route("/api/metrics/ratio", get(metrics_ratio))
        // Telemetry
        .route("/api/logs/recent", get(streams::recent_logs))
        .route("/api/logs/stream", get(streams::stream_logs))
        .route("/api/frames/stream", get(streams::stream_frames))
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(server)
}

/// Parse an optional JSON body; an empty body means "nothing supplied"
fn optional_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<Option<T>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| DashboardError::validation("body", e.to_string()).into())
}

/// Unwrap a JSON body, reporting malformed input as a validation error
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| DashboardError::validation("body", rejection.body_text()).into())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle POST /api/session/start - Launch training with the current config
///
/// An optional configuration body is merged into a copy of the current
/// configuration. The edit is recorded only once the launch was attempted, so
/// a rejected start leaves the current configuration as it was.
async fn start_session(
    State(server): State<Arc<DashboardServer>>,
    body: Bytes,
) -> Result<Json<SessionStatus>, AppError> {
    server.metrics().start_requests.inc();

    let patch: Option<ConfigPatch> = optional_json(&body)?;

    let state = server.controller().status().state;
    if state != SessionState::Stopped {
        return Err(DashboardError::Conflict(format!("cannot start: session is {}", state)).into());
    }

    let config = server.store().prepare_launch(patch.as_ref())?;
    let result = server.controller().start(config).await;

    if matches!(result, Ok(_) | Err(DashboardError::LaunchFailed(_))) {
        if let Err(e) = server.store().commit_launch(patch.as_ref()) {
            tracing::warn!(error = %e, "Failed to record launch configuration as current");
        }
    }
    if matches!(result, Err(DashboardError::LaunchFailed(_))) {
        server.metrics().launch_failures.inc();
    }

    Ok(Json(result?))
}

/// Handle POST /api/session/stop
async fn stop_session(
    State(server): State<Arc<DashboardServer>>,
) -> Result<Json<SessionStatus>, AppError> {
    server.metrics().stop_requests.inc();
    let status = server.controller().stop().await?;
    Ok(Json(status))
}

/// Handle GET /api/session/status
async fn session_status(State(server): State<Arc<DashboardServer>>) -> Json<SessionStatus> {
    Json(server.controller().status())
}

/// Handle GET /api/session/rendering
async fn rendering_status(State(server): State<Arc<DashboardServer>>) -> Json<RenderingStatus> {
    Json(server.controller().rendering_status())
}

// ---------------------------------------------------------------------------
// Shaders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ToggleShaderRequest {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToggleAllRequest {
    pub enabled: bool,
}

async fn get_shaders(State(server): State<Arc<DashboardServer>>) -> Json<ShaderSettings> {
    Json(server.controller().shader_settings())
}

/// Handle POST /api/shaders/toggle
async fn toggle_shader(
    State(server): State<Arc<DashboardServer>>,
    body: Result<Json<ToggleShaderRequest>, JsonRejection>,
) -> Result<Json<ShaderSettings>, AppError> {
    let request = json_body(body)?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(DashboardError::validation("name", "shader name must not be empty").into());
    }
    Ok(Json(server.controller().toggle_shader(name, request.enabled)))
}

/// Handle POST /api/shaders/toggle_all
async fn toggle_all_shaders(
    State(server): State<Arc<DashboardServer>>,
    body: Result<Json<ToggleAllRequest>, JsonRejection>,
) -> Result<Json<ShaderSettings>, AppError> {
    let request = json_body(body)?;
    Ok(Json(server.controller().toggle_all_shaders(request.enabled)))
}

// ---------------------------------------------------------------------------
// Configurations
// ---------------------------------------------------------------------------

/// Configuration as returned to the editor
#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub name: String,
    pub is_default: bool,
    #[serde(flatten)]
    pub payload: ConfigPayload,
}

impl From<&Configuration> for ConfigView {
    fn from(config: &Configuration) -> Self {
        Self {
            name: config.name.clone(),
            is_default: config.is_default,
            payload: config.to_payload(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CurrentConfigView {
    pub config: ConfigView,
    pub dirty: DirtyState,
    pub label: String,
}

impl From<&CurrentConfig> for CurrentConfigView {
    fn from(current: &CurrentConfig) -> Self {
        Self {
            config: ConfigView::from(&current.config),
            dirty: current.dirty.clone(),
            label: current.label.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    #[serde(flatten)]
    pub current: CurrentConfigView,
    /// True only for the edit that made the configuration unsaved
    pub became_dirty: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfigList {
    pub configs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub name: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Configuration to store; the current configuration when absent
    #[serde(default)]
    pub config: Option<ConfigPayload>,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub name: String,
}

/// Handle GET /api/configs - Saved configuration names
async fn list_configs(
    State(server): State<Arc<DashboardServer>>,
) -> Result<Json<ConfigList>, AppError> {
    let configs = server.store().list()?;
    Ok(Json(ConfigList { configs }))
}

/// Handle GET /api/configs/default
async fn load_default_config(State(server): State<Arc<DashboardServer>>) -> Json<ConfigView> {
    Json(ConfigView::from(&server.store().load_default()))
}

/// Handle GET /api/configs/:name
async fn load_config(
    State(server): State<Arc<DashboardServer>>,
    Path(name): Path<String>,
) -> Result<Json<ConfigView>, AppError> {
    let config = server.store().load(&name)?;
    Ok(Json(ConfigView::from(&config)))
}

/// Handle POST /api/configs - Save under a name
async fn save_config(
    State(server): State<Arc<DashboardServer>>,
    body: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Json<SaveResponse>, AppError> {
    let request = json_body(body)?;
    let store = server.store();

    let config = match request.config {
        Some(payload) => Configuration::from_payload(&request.name, payload, store.registry())?,
        None => store.current().config,
    };

    let name = store.save(&request.name, &config, request.overwrite)?;
    Ok(Json(SaveResponse { name }))
}

/// Handle DELETE /api/configs/:name
async fn delete_config(
    State(server): State<Arc<DashboardServer>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    server.store().delete(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handle GET /api/config/current - Active configuration and dirty state
async fn current_config(State(server): State<Arc<DashboardServer>>) -> Json<CurrentConfigView> {
    Json(CurrentConfigView::from(&server.store().current()))
}

/// Handle PATCH /api/config/current - Edit the active configuration
async fn update_current_config(
    State(server): State<Arc<DashboardServer>>,
    body: Result<Json<ConfigPatch>, JsonRejection>,
) -> Result<Json<EditResponse>, AppError> {
    let patch = json_body(body)?;
    let outcome = server.store().update_current(&patch)?;
    Ok(Json(EditResponse {
        current: CurrentConfigView::from(&server.store().current()),
        became_dirty: outcome.became_dirty,
    }))
}

/// Handle POST /api/config/reset
async fn reset_config(State(server): State<Arc<DashboardServer>>) -> Json<CurrentConfigView> {
    server.store().reset_to_default();
    Json(CurrentConfigView::from(&server.store().current()))
}

#[derive(Debug, Serialize)]
pub struct CapabilityList {
    pub capabilities: Vec<Capability>,
}

/// Handle GET /api/capabilities - Wrapper/callback catalogue for the editor
async fn list_capabilities(State(server): State<Arc<DashboardServer>>) -> Json<CapabilityList> {
    let capabilities = server
        .store()
        .registry()
        .all()
        .into_iter()
        .cloned()
        .collect();
    Json(CapabilityList { capabilities })
}

#[derive(Debug, Deserialize)]
pub struct BatchSizeQuery {
    pub n_steps: Option<String>,
    pub num_envs: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchSizes {
    pub sizes: Vec<u64>,
    pub default: Option<u64>,
}

/// Handle GET /api/batch_sizes?n_steps=&num_envs=
async fn batch_sizes(Query(query): Query<BatchSizeQuery>) -> Result<Json<BatchSizes>, AppError> {
    let arg = |field: &str, value: Option<String>| {
        let value = value.ok_or_else(|| {
            DashboardError::InvalidArgument(format!("missing query parameter {}", field))
        })?;
        batch::positive_integer(field, &serde_json::Value::String(value))
    };

    let n_steps = arg("n_steps", query.n_steps)?;
    let num_envs = arg("num_envs", query.num_envs)?;
    let sizes = batch::resolve(n_steps, num_envs)?;
    let default = batch::default_batch_size(&sizes);
    Ok(Json(BatchSizes { sizes, default }))
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Handle POST /api/metrics/query
async fn query_metrics(
    State(server): State<Arc<DashboardServer>>,
    body: Result<Json<MetricsQuery>, JsonRejection>,
) -> Result<Json<MetricsQueryResult>, AppError> {
    let query = json_body(body)?;
    let result = server
        .aggregator()
        .query(&query.stat_keys, &query.group_by)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct RatioQuery {
    pub numerator: String,
    pub denominator: String,
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RatioResponse {
    pub numerator: String,
    pub denominator: String,
    pub source: StatSource,
    pub ratio: Ratio,
}

/// Handle GET /api/metrics/ratio?numerator=&denominator=&source=
async fn metrics_ratio(
    State(server): State<Arc<DashboardServer>>,
    Query(query): Query<RatioQuery>,
) -> Result<Json<RatioResponse>, AppError> {
    let source = match &query.source {
        Some(source) => source.parse::<StatSource>()?,
        None => StatSource::Monitor,
    };
    let ratio = server
        .aggregator()
        .derived_ratio(&query.numerator, &query.denominator, source);

    Ok(Json(RatioResponse {
        numerator: query.numerator,
        denominator: query.denominator,
        source,
        ratio,
    }))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime_seconds: u64,
    pub session_state: SessionState,
}

/// Handle GET /health - Health check endpoint
pub async fn health_check(State(server): State<Arc<DashboardServer>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        uptime_seconds: server.uptime().as_secs(),
        session_state: server.controller().status().state,
    })
}

/// Handle GET /metrics - Prometheus metrics endpoint
pub async fn metrics_endpoint(
    State(server): State<Arc<DashboardServer>>,
) -> Result<Response, AppError> {
    server.metrics().observe(server.controller());
    let body = server.metrics().render()?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Application error wrapper for proper HTTP error responses
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        let Some(err) = self.0.downcast_ref::<DashboardError>() else {
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        };

        let status = match err {
            DashboardError::Validation { .. } | DashboardError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            DashboardError::Forbidden(_) => StatusCode::FORBIDDEN,
            DashboardError::NotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::Conflict(_) | DashboardError::AlreadyExists(_) => StatusCode::CONFLICT,
            DashboardError::LaunchFailed(_) => StatusCode::BAD_GATEWAY,
            DashboardError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, err.kind())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::warn!(error = %self.0, kind = error_type, "Request rejected");
        }

        let body = serde_json::json!({
            "error": {
                "message": self.0.to_string(),
                "type": error_type
            }
        });

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
