//! NOWPayments: invoice-based crypto payments with JSON IPN callbacks.

use super::{credential, http_client, json_text, quote, reject_server_error, require};
use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::gateway::PaymentGateway;
use crate::types::{
    parse_decimal_units, CallbackData, CallbackPayload, CallbackStatus, GatewayKind,
    PaymentRequest, PaymentResult, VerifyRequest, VerifyResult,
};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://api.nowpayments.io";
const PRICE_CURRENCY: &str = "usd";
const FINISHED: &str = "finished";

pub struct NowPayments {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    exchange_rate: Option<u64>,
}

#[derive(Serialize)]
struct InvoiceBody<'a> {
    price_amount: u64,
    price_currency: &'a str,
    order_id: &'a str,
    order_description: &'a str,
    ipn_callback_url: &'a str,
}

impl NowPayments {
    pub fn new(config: &ProviderConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            api_key: credential(config),
            exchange_rate: config.exchange_rate,
        })
    }

    fn api_key(&self) -> Result<&SecretString, GatewayError> {
        require(&self.api_key, GatewayKind::NowPayments, "api_key")
    }
}

#[async_trait]
impl PaymentGateway for NowPayments {
    fn kind(&self) -> GatewayKind {
        GatewayKind::NowPayments
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, GatewayError> {
        let api_key = self.api_key()?;
        let body = InvoiceBody {
            price_amount: request.amount,
            price_currency: PRICE_CURRENCY,
            order_id: &request.order_id,
            order_description: &request.description,
            ipn_callback_url: &request.callback_url,
        };

        let response = self
            .client
            .post(format!("{}/v1/invoice", self.base_url))
            .header("x-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let response = reject_server_error(response).await?;
        let status = response.status();
        let body: Value = response.json().await?;

        let invoice_id = body.get("id").and_then(json_text);
        let invoice_url = body.get("invoice_url").and_then(Value::as_str);
        match (status.is_success(), invoice_id, invoice_url) {
            (true, Some(invoice_id), Some(url)) => {
                debug!(invoice_id = %invoice_id, "NOWPayments invoice created");
                Ok(PaymentResult {
                    payment_url: url.to_string(),
                    correlation_token: invoice_id,
                })
            }
            _ => Err(GatewayError::Rejected {
                gateway: GatewayKind::NowPayments,
                code: body.get("code").and_then(json_text),
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("invoice creation failed")
                    .to_string(),
            }),
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .get(format!("{}/v1/payment/{}", self.base_url, request.token))
            .header("x-api-key", api_key.expose_secret())
            .send()
            .await?;
        let response = reject_server_error(response).await?;
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "NOWPayments payment lookup refused");
            return Ok(VerifyResult::declined("payment not found"));
        }
        let body: Value = response.json().await?;

        let status = body
            .get("payment_status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if status != FINISHED {
            return Ok(VerifyResult::declined(format!("payment status {}", status)));
        }

        // A finished payment only settles the order it was made for.
        let paid_order = body.get("order_id").and_then(json_text);
        if paid_order.as_deref() != Some(request.order_id.as_str()) {
            warn!(?paid_order, "NOWPayments payment belongs to another order");
            return Ok(VerifyResult::declined("payment belongs to another order"));
        }

        let priced = body
            .get("price_amount")
            .and_then(json_text)
            .and_then(|text| parse_decimal_units(&text, 0));
        if let Some(priced) = priced {
            if priced != request.amount {
                warn!(expected = request.amount, priced, "NOWPayments amount mismatch");
                return Ok(VerifyResult::declined("amount mismatch"));
            }
        }

        info!(payment_id = %request.token, "NOWPayments payment verified");
        Ok(VerifyResult::verified(&request.token, "payment finished"))
    }

    fn quote(&self, toman: u64) -> Result<u64, GatewayError> {
        quote(self.exchange_rate, GatewayKind::NowPayments, toman, 1)
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError> {
        let payment_id = payload.require("payment_id")?;
        let status = match payload.require("payment_status")?.as_str() {
            FINISHED => CallbackStatus::Success,
            other => CallbackStatus::Failed(format!("payment status {}", other)),
        };

        Ok(CallbackData {
            order_id: payload.field("order_id").filter(|v| !v.is_empty()),
            correlation_token: payload.field("invoice_id").filter(|v| !v.is_empty()),
            verify_token: payment_id,
            reported_amount: None,
            status,
        })
    }
}
