//! ZarinPal: browser redirect with `Authority`/`Status` query parameters.
//!
//! Amounts are held in toman and sent in rial, so every outbound amount is
//! multiplied by ten.

use super::{credential, http_client, json_text, reject_server_error, require};
use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::gateway::PaymentGateway;
use crate::types::{
    CallbackData, CallbackPayload, CallbackStatus, GatewayKind, PaymentRequest, PaymentResult,
    VerifyRequest, VerifyResult,
};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://payment.zarinpal.com";
const RIAL_PER_TOMAN: u64 = 10;

pub struct ZarinPal {
    client: Client,
    base_url: String,
    merchant_id: Option<SecretString>,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    merchant_id: &'a str,
    amount: u64,
    description: &'a str,
    callback_url: &'a str,
    metadata: Metadata<'a>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    order_id: &'a str,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    merchant_id: &'a str,
    amount: u64,
    authority: &'a str,
}

impl ZarinPal {
    pub fn new(config: &ProviderConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            merchant_id: credential(config),
        })
    }

    fn merchant_id(&self) -> Result<&SecretString, GatewayError> {
        require(&self.merchant_id, GatewayKind::ZarinPal, "merchant_id")
    }

    fn rial(amount: u64) -> Result<u64, GatewayError> {
        amount.checked_mul(RIAL_PER_TOMAN).ok_or_else(|| GatewayError::Rejected {
            gateway: GatewayKind::ZarinPal,
            code: None,
            message: format!("amount {} out of range", amount),
        })
    }

    /// `data` is an object on success and an empty array on failure, where
    /// `errors` carries the code instead.
    fn result_code(body: &Value) -> Option<i64> {
        body.pointer("/data/code")
            .or_else(|| body.pointer("/errors/code"))
            .and_then(Value::as_i64)
    }

    fn error_message(body: &Value) -> String {
        body.pointer("/errors/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string()
    }
}

#[async_trait]
impl PaymentGateway for ZarinPal {
    fn kind(&self) -> GatewayKind {
        GatewayKind::ZarinPal
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, GatewayError> {
        let merchant_id = self.merchant_id()?;
        let body = RequestBody {
            merchant_id: merchant_id.expose_secret(),
            amount: Self::rial(request.amount)?,
            description: &request.description,
            callback_url: &request.callback_url,
            metadata: Metadata {
                order_id: &request.order_id,
            },
        };

        let response = self
            .client
            .post(format!("{}/pg/v4/payment/request.json", self.base_url))
            .json(&body)
            .send()
            .await?;
        let body: Value = reject_server_error(response).await?.json().await?;

        let code = Self::result_code(&body);
        let authority = body.pointer("/data/authority").and_then(json_text);
        match (code, authority) {
            (Some(100), Some(authority)) => {
                debug!(authority = %authority, "ZarinPal payment created");
                Ok(PaymentResult {
                    payment_url: format!("{}/pg/StartPay/{}", self.base_url, authority),
                    correlation_token: authority,
                })
            }
            (code, _) => Err(GatewayError::Rejected {
                gateway: GatewayKind::ZarinPal,
                code: code.map(|c| c.to_string()),
                message: Self::error_message(&body),
            }),
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError> {
        let merchant_id = self.merchant_id()?;
        let body = VerifyBody {
            merchant_id: merchant_id.expose_secret(),
            amount: Self::rial(request.amount)?,
            authority: &request.token,
        };

        let response = self
            .client
            .post(format!("{}/pg/v4/payment/verify.json", self.base_url))
            .json(&body)
            .send()
            .await?;
        let body: Value = reject_server_error(response).await?.json().await?;

        match Self::result_code(&body) {
            Some(code @ (100 | 101)) => {
                let ref_id = body
                    .pointer("/data/ref_id")
                    .and_then(json_text)
                    .unwrap_or_default();
                info!(code, ref_id = %ref_id, "ZarinPal payment verified");
                let message = if code == 101 {
                    "payment already verified"
                } else {
                    "payment verified"
                };
                Ok(VerifyResult::verified(ref_id, message))
            }
            code => {
                warn!(?code, "ZarinPal declined verification");
                Ok(VerifyResult::declined(Self::error_message(&body)))
            }
        }
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError> {
        let authority = payload.require("Authority")?;
        let status = match payload.field("Status").as_deref() {
            Some("OK") => CallbackStatus::Success,
            Some(other) => CallbackStatus::Failed(format!("status {}", other)),
            None => CallbackStatus::Failed("status missing".into()),
        };

        Ok(CallbackData {
            order_id: None,
            correlation_token: Some(authority.clone()),
            verify_token: authority,
            reported_amount: None,
            status,
        })
    }
}
