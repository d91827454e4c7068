//! Request and response bodies.

use gateway_client::GatewayKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Providers accepting payments
    pub gateways: Vec<GatewayKind>,
}

/// Body of `POST /v1/payments`.
#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: i64,
    /// Toman. Required for top-ups; for accounts it must equal the price
    /// when given.
    #[serde(default)]
    pub amount: Option<u64>,
    pub method: GatewayKind,
    /// `create|<username>`, `extend|<username>`, or anything else for a
    /// wallet top-up
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Product and panel for `create`/`extend`, bound to the payment
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub panel_name: Option<String>,
    /// Chat message with the payment instructions
    #[serde(default)]
    pub message_id: Option<i64>,
}

/// Acknowledgement for server-to-server callbacks.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackAck {
    pub status: String,
    pub order_id: String,
}
