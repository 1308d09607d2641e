//! HTTP adapter using Axum. Thin layer over [`LifecycleManager`].
//!
//! [`LifecycleManager`]: crate::lifecycle::LifecycleManager

use crate::error::{ExecutionError, LifecycleError, ProviderError};
use crate::executor::{Diagnostics, JobStatus};
use crate::lifecycle::ExecutionOutcome;
use crate::provider::{CloudProvider, ProviderProfile};
use crate::state::AppState;
use crate::workspace::Pool;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

// Request/Response types
#[derive(Deserialize)]
struct ExecuteRequest {
    code: String,
    /// Passed through untouched.
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    cloud_provider: Option<String>,
}

#[derive(Deserialize)]
struct RerunRequest {
    code: String,
}

#[derive(Serialize)]
struct ExecuteResponse {
    job_id: String,
    status: JobStatus,
    artifacts: Vec<String>,
    image_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_provider: Option<CloudProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_profile: Option<ProviderProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<Diagnostics>,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    error: String,
}

#[derive(Serialize)]
struct RootMessage {
    message: &'static str,
}

/// Error leaving a handler: status code plus a structured body.
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            kind: self.kind,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let (status, kind) = match &err {
            LifecycleError::Workspace(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
            LifecycleError::Execution(ExecutionError::InvalidJob(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_job")
            }
            LifecycleError::Execution(ExecutionError::WorkspaceUnwritable { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "workspace_unwritable")
            }
            LifecycleError::Execution(ExecutionError::LaunchFailed { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "launch_failed")
            }
            LifecycleError::Execution(ExecutionError::IoError(_)) | LifecycleError::Join(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "unrecognized_provider",
            message: err.to_string(),
        }
    }
}

/// Build the router: execution endpoints plus one static mount per pool.
pub fn router(state: AppState) -> Router {
    let generated = ServeDir::new(state.settings.pool_root(Pool::Generated));
    let edited = ServeDir::new(state.settings.pool_root(Pool::Edited));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/diagrams/execute", post(execute))
        .route("/api/v1/diagrams/rerun", post(rerun))
        .nest_service(Pool::Generated.url_prefix(), generated)
        .nest_service(Pool::Edited.url_prefix(), edited)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn root() -> Json<RootMessage> {
    Json(RootMessage {
        message: "Server is running smoothly.",
    })
}

async fn health() -> &'static str {
    "OK"
}

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let cloud_provider = req
        .cloud_provider
        .as_deref()
        .map(str::parse::<CloudProvider>)
        .transpose()?;
    info!("POST /execute - provider: {:?}, {} bytes", cloud_provider, req.code.len());

    let outcome = state.lifecycle.run_generated_code(&req.code).await?;
    let mut response = to_response(&state, outcome);
    response.description = req.description;
    response.provider_profile = cloud_provider.map(CloudProvider::profile);
    response.cloud_provider = cloud_provider;
    Ok(Json(response))
}

async fn rerun(
    State(state): State<AppState>,
    Json(req): Json<RerunRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    info!("POST /rerun - {} bytes", req.code.len());
    let outcome = state.lifecycle.rerun_edited_code(&req.code).await?;
    Ok(Json(to_response(&state, outcome)))
}

fn to_response(state: &AppState, outcome: ExecutionOutcome) -> ExecuteResponse {
    let image_urls = outcome
        .artifact_paths()
        .into_iter()
        .map(|path| format!("{}{}", state.settings.server_url, path))
        .collect();
    ExecuteResponse {
        job_id: outcome.job_id,
        status: outcome.status,
        artifacts: outcome.artifacts,
        image_urls,
        description: None,
        cloud_provider: None,
        provider_profile: None,
        diagnostics: outcome.diagnostics,
    }
}
