//! Tronado: TRX payments through a Telegram mini-app.
//!
//! The callback carries our order id inside `Hash`, after the literal
//! `TrndOrderID_` marker. Amounts are decimal TRX on the wire and integer sun
//! (10^-6 TRX) everywhere else.

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

const DEFAULT_BASE_URL: &str = "https://bot.tronado.cloud/api/v1";
const PAYMENT_LINK: &str = "https://t.me/tronado_robot/customerpayment?startapp=";
const ORDER_MARKER: &str = "TrndOrderID_";
const SUN_SCALE: u32 = 6;
const SUN_PER_TRX: u64 = 1_000_000;

pub struct Tronado {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    wallet_address: Option<String>,
    exchange_rate: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct OrderTokenBody<'a> {
    #[serde(rename = "PaymentID")]
    payment_id: String,
    wallet_address: &'a str,
    tron_amount: String,
    callback_url: &'a str,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    #[serde(rename = "Id")]
    id: &'a str,
}

/// Render integer sun as a decimal TRX string without trailing zeros.
fn format_trx(sun: u64) -> String {
    let whole = sun / SUN_PER_TRX;
    let frac = sun % SUN_PER_TRX;
    if frac == 0 {
        whole.to_string()
    } else {
        let frac = format!("{:06}", frac);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    }
}

/// Extract the order id embedded after the marker in a callback hash.
pub fn order_id_from_hash(hash: &str) -> Option<&str> {
    hash.split_once(ORDER_MARKER)
        .map(|(_, order_id)| order_id.trim())
        .filter(|order_id| !order_id.is_empty())
}

fn tron_amount(value: Option<&Value>) -> Option<u64> {
    value
        .and_then(json_text)
        .and_then(|text| parse_decimal_units(&text, SUN_SCALE))
}

impl Tronado {
    pub fn new(config: &ProviderConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            api_key: credential(config),
            wallet_address: config.wallet_address.clone().filter(|w| !w.is_empty()),
            exchange_rate: config.exchange_rate,
        })
    }

    fn api_key(&self) -> Result<&SecretString, GatewayError> {
        require(&self.api_key, GatewayKind::Tronado, "api_key")
    }
}

#[async_trait]
impl PaymentGateway for Tronado {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Tronado
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, GatewayError> {
        let api_key = self.api_key()?;
        let wallet_address =
            self.wallet_address
                .as_deref()
                .ok_or(GatewayError::ConfigurationMissing {
                    gateway: GatewayKind::Tronado,
                    field: "wallet_address",
                })?;

        let body = OrderTokenBody {
            payment_id: format!("{}{}", ORDER_MARKER, request.order_id),
            wallet_address,
            tron_amount: format_trx(request.amount),
            callback_url: &request.callback_url,
        };

        let response = self
            .client
            .post(format!("{}/Order/GetOrderToken", self.base_url))
            .header("x-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let body: Value = reject_server_error(response).await?.json().await?;

        let successful = body
            .get("IsSuccessful")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let token = body.pointer("/Data/Token").and_then(json_text);
        match (successful, token) {
            (true, Some(token)) => {
                debug!("Tronado order token issued");
                Ok(PaymentResult {
                    payment_url: format!("{}{}", PAYMENT_LINK, token),
                    correlation_token: token,
                })
            }
            _ => Err(GatewayError::Rejected {
                gateway: GatewayKind::Tronado,
                code: body.get("Code").and_then(json_text),
                message: body
                    .get("Message")
                    .and_then(Value::as_str)
                    .unwrap_or("order token refused")
                    .to_string(),
            }),
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .post(format!("{}/Order/GetStatus", self.base_url))
            .header("x-api-key", api_key.expose_secret())
            .json(&StatusBody { id: &request.token })
            .send()
            .await?;
        let response = reject_server_error(response).await?;
        if !response.status().is_success() {
            return Ok(VerifyResult::declined("order not found"));
        }
        let body: Value = response.json().await?;

        let paid = body.get("IsPaid").and_then(Value::as_bool).unwrap_or(false);
        if !paid {
            return Ok(VerifyResult::declined("order is not paid"));
        }

        match tron_amount(body.get("TronAmount")) {
            Some(paid_amount) if paid_amount == request.amount => {
                let ref_id = body
                    .get("PaymentID")
                    .and_then(json_text)
                    .unwrap_or_else(|| request.token.clone());
                info!(ref_id = %ref_id, "Tronado payment verified");
                Ok(VerifyResult::verified(ref_id, "payment verified"))
            }
            paid_amount => {
                warn!(expected = request.amount, ?paid_amount, "Tronado amount mismatch");
                Ok(VerifyResult::declined("amount mismatch"))
            }
        }
    }

    fn quote(&self, toman: u64) -> Result<u64, GatewayError> {
        quote(self.exchange_rate, GatewayKind::Tronado, toman, SUN_PER_TRX)
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError> {
        let hash = payload.require("Hash")?;
        let order_id = order_id_from_hash(&hash)
            .ok_or_else(|| {
                GatewayError::InvalidCallback(format!("hash has no {} marker", ORDER_MARKER))
            })?
            .to_string();

        let reported_amount = match payload.field("TronAmount") {
            Some(text) => Some(parse_decimal_units(&text, SUN_SCALE).ok_or_else(|| {
                GatewayError::InvalidCallback(format!("invalid TronAmount `{}`", text))
            })?),
            None => None,
        };

        let status = match payload.field("IsPaid").as_deref() {
            Some("true") => CallbackStatus::Success,
            _ => CallbackStatus::Failed("not paid".into()),
        };

        Ok(CallbackData {
            order_id: Some(order_id.clone()),
            correlation_token: None,
            verify_token: order_id,
            reported_amount,
            status,
        })
    }
}
