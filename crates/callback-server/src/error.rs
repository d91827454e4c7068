//! Error types for the callback server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use settlement::SettlementError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ServerError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ServerError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            ServerError::Settlement(e) => match e {
                // Providers redeliver on 5xx, which is what a transport failure wants.
                SettlementError::Transport(_) => (StatusCode::SERVICE_UNAVAILABLE, "TRANSPORT_ERROR"),
                SettlementError::VerificationFailed(_) => {
                    (StatusCode::BAD_REQUEST, "VERIFICATION_FAILED")
                }
                SettlementError::ConfigurationMissing(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_MISSING")
                }
                SettlementError::UsernameCollision(_) => (StatusCode::CONFLICT, "USERNAME_COLLISION"),
                SettlementError::RecordNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                SettlementError::InvalidCallback(_) => (StatusCode::BAD_REQUEST, "INVALID_CALLBACK"),
                SettlementError::InvalidPurpose(_) => (StatusCode::BAD_REQUEST, "INVALID_PURPOSE"),
                SettlementError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                SettlementError::InsufficientPayment { .. } => {
                    (StatusCode::BAD_REQUEST, "INSUFFICIENT_PAYMENT")
                }
                SettlementError::GatewayUnavailable(_) => {
                    (StatusCode::NOT_FOUND, "GATEWAY_UNAVAILABLE")
                }
                SettlementError::Gateway(_) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
                SettlementError::Panel(_) => (StatusCode::BAD_GATEWAY, "PANEL_ERROR"),
                SettlementError::Notification(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "NOTIFICATION_ERROR")
                }
                SettlementError::Storage(_) | SettlementError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
