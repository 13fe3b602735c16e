use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;

/// Crate-wide error taxonomy, one variant per §7 error kind.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("camera not connected")]
    TransientCamera,

    #[error("camera backend unavailable, falling back")]
    CameraUnavailable,

    #[error("sensor timeout or too many events")]
    SensorTimeout,

    #[error("client write blocked too long, stream closed")]
    SlowClient,

    #[error("file not found after all resolution strategies")]
    FileNotFound { attempted: Vec<PathBuf> },

    #[error("cache I/O failure: {0}")]
    CacheIo(String),

    #[error("configuration rejected")]
    ConfigValidation { violations: Vec<String> },

    #[error("database error: {0}")]
    Db(String),

    #[error("unrecoverable startup error: {0}")]
    Startup(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::TransientCamera => (
                StatusCode::OK,
                json!({ "status": "no_frame" }),
            ),
            AppError::CameraUnavailable => (
                StatusCode::OK,
                json!({ "status": "fallback", "error": self.to_string() }),
            ),
            AppError::SensorTimeout => (
                StatusCode::OK,
                json!({ "error": self.to_string() }),
            ),
            AppError::SlowClient => (
                StatusCode::REQUEST_TIMEOUT,
                json!({ "error": self.to_string() }),
            ),
            AppError::FileNotFound { attempted } => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not-found", "attempted": attempted }),
            ),
            AppError::CacheIo(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": detail }),
            ),
            AppError::ConfigValidation { violations } => (
                StatusCode::BAD_REQUEST,
                json!({ "violations": violations }),
            ),
            AppError::Db(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": detail }),
            ),
            AppError::Startup(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": detail }),
            ),
            AppError::Other(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
