use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::detection::{detector, trainer::DEFAULT_TEST_SIZE};
use crate::errors::AppError;
use crate::models::anomaly::{DetectionReport, ServiceStatus, DEFAULT_THRESHOLD};
use crate::models::log::{validate_batch, LogRecord};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct TrainRequest {
    pub logs: Vec<LogRecord>,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: String,
    pub message: String,
    pub accuracy: f64,
    pub training_samples: usize,
    pub train_anomalies: usize,
    pub test_anomalies: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DetectRequest {
    pub logs: Vec<LogRecord>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_test_size() -> f64 {
    DEFAULT_TEST_SIZE
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Checks shared by `/train` and `/detect`, run before any model access.
fn validate_logs(logs: &[LogRecord], max_batch_size: usize) -> Result<(), AppError> {
    if logs.len() > max_batch_size {
        return Err(AppError::validation(format!(
            "batch of {} logs exceeds the limit of {}",
            logs.len(),
            max_batch_size
        )));
    }
    validate_batch(logs).map_err(AppError::Validation)
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /health: liveness only; never looks at the model.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics: Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // a publish can outlive the request that started it
    state
        .metrics
        .set_model_trained(state.store.load().await.is_some());
    (
        [(CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        state.metrics.encode(),
    )
}

/// GET /status: current model metadata
pub async fn status(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(state.store.status().await)
}

/// POST /train: fit a new model and make it current
pub async fn train(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>, AppError> {
    let Json(req) = payload?;
    if !(req.test_size > 0.0 && req.test_size < 1.0) {
        return Err(AppError::validation(format!(
            "test_size must be between 0 and 1 (exclusive), got {}",
            req.test_size
        )));
    }
    validate_logs(&req.logs, state.config.max_batch_size)?;

    let result = state
        .trainer
        .train(&state.store, req.logs, req.test_size)
        .await;

    match result {
        Ok(report) => {
            state.metrics.record_training(true);
            Ok(Json(TrainResponse {
                status: "success".into(),
                message: "Model trained successfully".into(),
                accuracy: report.accuracy,
                training_samples: report.training_samples,
                train_anomalies: report.train_anomalies,
                test_anomalies: report.test_anomalies,
                timestamp: report.timestamp,
            }))
        }
        // a rejected concurrent call is not a failed run
        Err(AppError::TrainingInProgress) => Err(AppError::TrainingInProgress),
        Err(e) => {
            state.metrics.record_training(false);
            tracing::warn!(code = e.code(), "Model training failed: {}", e);
            Err(e)
        }
    }
}

/// POST /detect: score a batch against the current model
pub async fn detect(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectionReport>, AppError> {
    let Json(req) = payload?;
    if !req.threshold.is_finite() {
        return Err(AppError::validation("threshold must be a finite number"));
    }
    validate_logs(&req.logs, state.config.max_batch_size)?;

    let report = detector::detect(&state.store, req.logs, req.threshold).await?;
    state
        .metrics
        .record_detection(report.total_logs, report.anomaly_count);

    tracing::info!(
        "Detected {} anomalies out of {} logs",
        report.anomaly_count,
        report.total_logs
    );
    Ok(Json(report))
}

/// POST /load-model: replace the in-memory model with the persisted one
pub async fn load_model(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let guard = state.store.try_write()?;
    let model = state.store.reload_from_disk(&guard).await?;
    state.metrics.set_model_trained(true);

    Ok(Json(json!({
        "status": "success",
        "message": "Model loaded successfully",
        "training_date": model.metadata.trained_at,
    })))
}
