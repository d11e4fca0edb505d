use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid or missing token")]
    Authentication,

    #[error("insufficient training data: got {got} usable samples, need at least {required}")]
    InsufficientData { got: usize, required: usize },

    #[error("model not trained")]
    NotTrained,

    #[error("training already in progress")]
    TrainingInProgress,

    #[error("no trained model found on disk")]
    ModelNotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Stable machine-readable code, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_failed",
            AppError::Authentication => "invalid_token",
            AppError::InsufficientData { .. } => "insufficient_data",
            AppError::NotTrained => "model_not_trained",
            AppError::TrainingInProgress => "training_in_progress",
            AppError::ModelNotFound => "model_not_found",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::Internal(_) => "internal_server_error",
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge;
        }
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, msg) = match &self {
            AppError::Validation(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                reason.clone(),
            ),
            AppError::Authentication => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid authentication credentials".to_string(),
            ),
            AppError::InsufficientData { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                self.to_string(),
            ),
            AppError::NotTrained => (
                StatusCode::CONFLICT,
                "model_state_error",
                "model not trained; train the model first".to_string(),
            ),
            AppError::TrainingInProgress => (
                StatusCode::CONFLICT,
                "model_state_error",
                "another training run is in progress".to_string(),
            ),
            AppError::ModelNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "no trained model found on disk".to_string(),
            ),
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "invalid_request_error",
                "request body exceeds size limit".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": self.code(),
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::Authentication) {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
