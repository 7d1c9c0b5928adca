//! HTTP status surface.
//!
//! Read-only views over the store plus a trigger for a new batch.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/v1/health` | Liveness, version, whether a batch is in flight |
//! | `GET`  | `/v1/categories` | Configured categories |
//! | `GET`  | `/v1/runs/latest` | Latest batch and its category runs |
//! | `GET`  | `/v1/recs/{label}/latest` | Latest completed output for a category |
//! | `POST` | `/v1/run` | Start a batch (`202`), or `409` if one is running |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no completed run for 'Noir'" } }
//! ```
//!
//! Error codes: `not_found` (404), `batch_in_flight` (409),
//! `batch_unavailable` (503), `internal` (500).

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use curator_core::models::{CategoryRun, JobRun};
use curator_core::store::Store;

use crate::batch::{BatchError, BatchRunner};
use crate::config::{CategoryConfig, Config};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    runner: Option<Arc<BatchRunner>>,
    categories: Arc<Vec<CategoryConfig>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Option<Arc<BatchRunner>>,
        categories: Vec<CategoryConfig>,
    ) -> Self {
        Self {
            store,
            runner,
            categories: Arc::new(categories),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/health", get(handle_health))
        .route("/v1/categories", get(handle_categories))
        .route("/v1/runs/latest", get(handle_latest_run))
        .route("/v1/recs/{label}/latest", get(handle_latest_recs))
        .route("/v1/run", post(handle_run))
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until the process exits. When `[schedule]` is
/// set and a runner is available, batches also start on that interval.
pub async fn run_server(
    config: &Config,
    store: Arc<dyn Store>,
    runner: Option<Arc<BatchRunner>>,
) -> anyhow::Result<()> {
    if let (Some(schedule), Some(runner)) = (&config.schedule, &runner) {
        spawn_schedule(
            runner.clone(),
            Duration::from_secs(schedule.interval_minutes * 60),
        );
    }

    let app = router(AppState::new(store, runner, config.categories.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Curator listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_schedule(runner: Arc<BatchRunner>, every: Duration) {
    info!(interval_secs = every.as_secs(), "scheduled batches enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match runner.run("scheduled").await {
                Ok(_) => {}
                Err(BatchError::AlreadyRunning) => {
                    info!("previous batch still running, skipping scheduled run")
                }
                Err(e) => error!(error = %e, "scheduled batch failed"),
            }
        }
    });
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ Handlers ============

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let running = state.runner.as_ref().map(|r| r.is_running()).unwrap_or(false);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "batch_running": running,
    }))
}

async fn handle_categories(State(state): State<AppState>) -> Json<Vec<CategoryConfig>> {
    Json(state.categories.as_ref().clone())
}

#[derive(Serialize)]
struct LatestRun {
    job: JobRun,
    categories: Vec<CategoryRun>,
}

async fn handle_latest_run(State(state): State<AppState>) -> Result<Json<LatestRun>, AppError> {
    let job = state
        .store
        .latest_job()
        .await?
        .ok_or_else(|| not_found("no batch has run yet"))?;
    let categories = state.store.category_runs(job.id).await?;
    Ok(Json(LatestRun { job, categories }))
}

async fn handle_latest_recs(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<Response, AppError> {
    if !state.categories.iter().any(|c| c.label == label) {
        return Err(not_found(format!("unknown category '{}'", label)));
    }
    let output = state
        .store
        .latest_category_output(&label)
        .await?
        .ok_or_else(|| not_found(format!("no completed run for '{}'", label)))?;
    Ok(Json(output).into_response())
}

async fn handle_run(State(state): State<AppState>) -> Result<Response, AppError> {
    let runner = state.runner.clone().ok_or(AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "batch_unavailable",
        message: "batch runner is not configured".to_string(),
    })?;

    let permit = match runner.try_acquire() {
        Ok(permit) => permit,
        Err(BatchError::AlreadyRunning) => {
            return Err(AppError {
                status: StatusCode::CONFLICT,
                code: "batch_in_flight",
                message: "a batch is already running".to_string(),
            })
        }
        Err(e) => return Err(anyhow::Error::new(e).into()),
    };

    tokio::spawn(async move {
        if let Err(e) = runner.run_with(permit, "api").await {
            error!(error = %e, "batch triggered over HTTP failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response())
}
