//! HTTP request handlers.

use super::render;
use super::types::{CallbackAck, HealthResponse, InitiatePaymentRequest};
use super::AppState;
use crate::error::ServerError;
use axum::{
    extract::{Query, State},
    response::Response,
    Form, Json,
};
use gateway_client::{CallbackPayload, GatewayKind};
use serde_json::Value;
use settlement::{InitiatedPayment, PendingSelection, PurposeRequest};
use std::collections::HashMap;
use tracing::{info, warn};

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        gateways: state.gateways.list_enabled(),
    })
}

/// ZarinPal redirects the user back with `Authority` and `Status`.
pub async fn zarinpal_callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    browser_callback(&state, GatewayKind::ZarinPal, CallbackPayload::Query(params)).await
}

/// AqayePardakht posts a form from the user's browser.
pub async fn aqayepardakht_callback(
    State(state): State<AppState>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    browser_callback(&state, GatewayKind::AqayePardakht, CallbackPayload::Form(params)).await
}

pub async fn nowpayments_callback(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<CallbackAck>, ServerError> {
    server_callback(&state, GatewayKind::NowPayments, body).await
}

pub async fn tronado_callback(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<CallbackAck>, ServerError> {
    server_callback(&state, GatewayKind::Tronado, body).await
}

pub async fn iranpay_callback(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<CallbackAck>, ServerError> {
    server_callback(&state, GatewayKind::IranPay, body).await
}

async fn browser_callback(state: &AppState, kind: GatewayKind, payload: CallbackPayload) -> Response {
    let result = state.pipeline.handle(kind, &payload).await;
    if let Err(e) = &result {
        warn!(gateway = %kind, "Callback not settled: {}", e);
    }
    render::result_page(result)
}

async fn server_callback(
    state: &AppState,
    kind: GatewayKind,
    body: Value,
) -> Result<Json<CallbackAck>, ServerError> {
    let outcome = state
        .pipeline
        .handle(kind, &CallbackPayload::Json(body))
        .await
        .map_err(|e| {
            warn!(gateway = %kind, "Callback not settled: {}", e);
            e
        })?;
    Ok(Json(render::ack(&outcome)))
}

/// Start a payment and return the provider URL to send the user to.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatedPayment>, ServerError> {
    state.limiter.check(request.user_id)?;
    let purpose = PurposeRequest::from_token(request.purpose.as_deref().unwrap_or_default())?;

    match (request.product_code, request.panel_name) {
        (Some(product_code), Some(panel_name)) => {
            state
                .payments
                .select_product(
                    request.user_id,
                    PendingSelection {
                        product_code,
                        panel_name,
                    },
                )
                .await?;
        }
        (None, None) => {}
        _ => {
            return Err(ServerError::BadRequest(
                "product_code and panel_name go together".into(),
            ))
        }
    }

    let description = request
        .description
        .unwrap_or_else(|| describe(&purpose));
    let payment = state
        .payments
        .initiate(request.user_id, purpose, request.amount, request.method, &description)
        .await?;

    if let Some(message_id) = request.message_id {
        state
            .payments
            .attach_message(&payment.order_id, message_id)
            .await?;
    }

    info!(order_id = %payment.order_id, "Payment link issued");
    Ok(Json(payment))
}

fn describe(purpose: &PurposeRequest) -> String {
    match purpose {
        PurposeRequest::Create { username } => format!("New account {}", username),
        PurposeRequest::Extend { username } => format!("Renewal of {}", username),
        PurposeRequest::WalletTopUp => "Wallet top-up".to_string(),
    }
}
