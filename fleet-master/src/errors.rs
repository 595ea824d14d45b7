//! HTTP-boundary error type, grounded directly on `ferrex-server`'s
//! `errors.rs`: a flat `{status, message}` struct with one constructor per
//! status code, translated to JSON by `IntoResponse`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self { status: StatusCode::CONFLICT, message: message.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<fleet_core::Error> for AppError {
    fn from(err: fleet_core::Error) -> Self {
        match err {
            fleet_core::Error::NotFound(id) => AppError::not_found(format!("file {id} not found")),
            fleet_core::Error::UnknownWorker(id) => AppError::not_found(format!("worker {id} not found")),
            fleet_core::Error::Conflict(msg) => AppError::conflict(msg),
            fleet_core::Error::Protocol(msg) => AppError::bad_request(msg),
            err @ (fleet_core::Error::Database(_) | fleet_core::Error::Io(_) | fleet_core::Error::Internal(_)) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
