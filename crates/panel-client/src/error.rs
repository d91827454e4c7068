//! Panel adapter errors.

use crate::types::{BackendKind, Capability};
use thiserror::Error;

/// Errors that can occur when talking to an account-management backend.
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{backend} authentication failed: {message}")]
    AuthenticationFailed {
        backend: BackendKind,
        message: String,
    },

    /// The backend has no equivalent for this operation.
    #[error("{backend} does not support {capability}")]
    Unsupported {
        backend: BackendKind,
        capability: Capability,
    },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// A session issued by one backend was handed to another.
    #[error("session is not valid for {0}")]
    SessionMismatch(BackendKind),

    #[error("panel is missing configuration: {0}")]
    ConfigurationMissing(&'static str),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl PanelError {
    pub fn unsupported(backend: BackendKind, capability: Capability) -> Self {
        PanelError::Unsupported {
            backend,
            capability,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, PanelError::Unsupported { .. })
    }
}
