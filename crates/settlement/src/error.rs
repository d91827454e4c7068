//! Settlement error types.

use gateway_client::{GatewayError, GatewayKind};
use panel_client::PanelError;
use thiserror::Error;

/// Errors that can occur while initiating or settling a payment.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Network failure or provider outage. The provider will redeliver.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider explicitly declined the payment. The record stays unpaid.
    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    /// A merchant credential is absent.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The backend already has an account with this username.
    #[error("Username already taken: {0}")]
    UsernameCollision(String),

    #[error("Not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Invalid purpose: {0}")]
    InvalidPurpose(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The paid amount does not cover the product's price, in toman.
    #[error("Payment of {paid} does not cover price {price}")]
    InsufficientPayment { paid: u64, price: u64 },

    #[error("Gateway not enabled: {0}")]
    GatewayUnavailable(GatewayKind),

    #[error("Gateway error: {0}")]
    Gateway(GatewayError),

    #[error("Panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SettlementError {
    /// Whether the same callback may succeed if delivered again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementError::Transport(_) => true,
            SettlementError::Panel(PanelError::Http(_)) => true,
            SettlementError::Panel(PanelError::Api { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

impl From<GatewayError> for SettlementError {
    fn from(e: GatewayError) -> Self {
        if e.is_transport() {
            return SettlementError::Transport(e.to_string());
        }
        match e {
            GatewayError::ConfigurationMissing { .. } => {
                SettlementError::ConfigurationMissing(e.to_string())
            }
            GatewayError::InvalidCallback(msg) => SettlementError::InvalidCallback(msg),
            other => SettlementError::Gateway(other),
        }
    }
}

impl From<std::io::Error> for SettlementError {
    fn from(e: std::io::Error) -> Self {
        SettlementError::Storage(e.to_string())
    }
}
