//! IranPay: success is signalled by HTTP status alone.

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
use tracing::{info, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://pay.iranpay.biz";
const STATUS_PAID: &str = "100";

pub struct IranPay {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    api_key: &'a str,
    amount: u64,
    order_id: &'a str,
    description: &'a str,
    callback_url: &'a str,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    api_key: &'a str,
    authority: &'a str,
    amount: u64,
}

impl IranPay {
    pub fn new(config: &ProviderConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            api_key: credential(config),
        })
    }

    fn api_key(&self) -> Result<&SecretString, GatewayError> {
        require(&self.api_key, GatewayKind::IranPay, "api_key")
    }

    fn message(body: &Value, fallback: &str) -> String {
        body.get("message")
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    }
}

#[async_trait]
impl PaymentGateway for IranPay {
    fn kind(&self) -> GatewayKind {
        GatewayKind::IranPay
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, GatewayError> {
        let api_key = self.api_key()?;
        let body = CreateBody {
            api_key: api_key.expose_secret(),
            amount: request.amount,
            order_id: &request.order_id,
            description: &request.description,
            callback_url: &request.callback_url,
        };

        let response = self
            .client
            .post(format!("{}/api/v1/create", self.base_url))
            .json(&body)
            .send()
            .await?;
        let response = reject_server_error(response).await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        let authority = body.get("authority").and_then(json_text);
        let url = body.get("payment_url").and_then(Value::as_str);
        match (status.is_success(), authority, url) {
            (true, Some(authority), Some(url)) => Ok(PaymentResult {
                payment_url: url.to_string(),
                correlation_token: authority,
            }),
            _ => Err(GatewayError::Rejected {
                gateway: GatewayKind::IranPay,
                code: Some(status.as_u16().to_string()),
                message: Self::message(&body, "payment creation failed"),
            }),
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError> {
        let api_key = self.api_key()?;
        let body = VerifyBody {
            api_key: api_key.expose_secret(),
            authority: &request.token,
            amount: request.amount,
        };

        let response = self
            .client
            .post(format!("{}/api/v1/verify", self.base_url))
            .json(&body)
            .send()
            .await?;
        let response = reject_server_error(response).await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            let ref_id = body
                .get("ref_id")
                .or_else(|| body.get("hashid"))
                .and_then(json_text)
                .unwrap_or_else(|| request.token.clone());
            info!(ref_id = %ref_id, "IranPay payment verified");
            Ok(VerifyResult::verified(ref_id, "payment verified"))
        } else {
            warn!(status = status.as_u16(), "IranPay declined verification");
            Ok(VerifyResult::declined(Self::message(&body, "verification refused")))
        }
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError> {
        let authority = payload.require("authority")?;
        let status = match payload.field("status") {
            Some(code) if code == STATUS_PAID => CallbackStatus::Success,
            Some(code) => CallbackStatus::Failed(format!("status {}", code)),
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
