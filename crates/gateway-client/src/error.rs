//! Gateway client errors.

use crate::types::GatewayKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A merchant credential needed for the call is absent from configuration.
    #[error("{gateway} is not configured: missing {field}")]
    ConfigurationMissing {
        gateway: GatewayKind,
        field: &'static str,
    },

    /// The provider answered but refused to create the payment.
    #[error("{gateway} rejected the request: {message}")]
    Rejected {
        gateway: GatewayKind,
        code: Option<String>,
        message: String,
    },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),
}

impl GatewayError {
    /// Whether the failure happened on the way to the provider (network,
    /// timeout, provider-side 5xx) rather than being an answer from it.
    pub fn is_transport(&self) -> bool {
        match self {
            GatewayError::Http(_) => true,
            GatewayError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
