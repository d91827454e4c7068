//! AqayePardakht: browser redirect posting a form back to us.

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

const DEFAULT_BASE_URL: &str = "https://panel.aqayepardakht.ir";
const CODE_VERIFIED: &str = "1";

pub struct AqayePardakht {
    client: Client,
    base_url: String,
    pin: Option<SecretString>,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    pin: &'a str,
    amount: u64,
    callback: &'a str,
    invoice_id: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    pin: &'a str,
    amount: u64,
    transid: &'a str,
}

impl AqayePardakht {
    pub fn new(config: &ProviderConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            pin: credential(config),
        })
    }

    fn pin(&self) -> Result<&SecretString, GatewayError> {
        require(&self.pin, GatewayKind::AqayePardakht, "pin")
    }
}

#[async_trait]
impl PaymentGateway for AqayePardakht {
    fn kind(&self) -> GatewayKind {
        GatewayKind::AqayePardakht
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, GatewayError> {
        let pin = self.pin()?;
        let body = CreateBody {
            pin: pin.expose_secret(),
            amount: request.amount,
            callback: &request.callback_url,
            invoice_id: &request.order_id,
            description: &request.description,
        };

        let response = self
            .client
            .post(format!("{}/api/v2/create", self.base_url))
            .json(&body)
            .send()
            .await?;
        let body: Value = reject_server_error(response).await?.json().await?;

        let success = body.get("status").and_then(Value::as_str) == Some("success");
        match (success, body.get("transid").and_then(json_text)) {
            (true, Some(transid)) => Ok(PaymentResult {
                payment_url: format!("{}/startpayment/{}", self.base_url, transid),
                correlation_token: transid,
            }),
            _ => Err(GatewayError::Rejected {
                gateway: GatewayKind::AqayePardakht,
                code: body.get("code").and_then(json_text),
                message: "payment creation refused".into(),
            }),
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError> {
        let pin = self.pin()?;
        let body = VerifyBody {
            pin: pin.expose_secret(),
            amount: request.amount,
            transid: &request.token,
        };

        let response = self
            .client
            .post(format!("{}/api/v2/verify", self.base_url))
            .json(&body)
            .send()
            .await?;
        let body: Value = reject_server_error(response)
            .await?
            .json()
            .await
            .unwrap_or(Value::Null);

        match body.get("code").and_then(json_text) {
            Some(code) if code == CODE_VERIFIED => {
                info!(transid = %request.token, "AqayePardakht payment verified");
                Ok(VerifyResult::verified(&request.token, "payment verified"))
            }
            code => {
                warn!(?code, "AqayePardakht declined verification");
                Ok(VerifyResult::declined(format!(
                    "verification code {}",
                    code.unwrap_or_else(|| "missing".into())
                )))
            }
        }
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError> {
        let transid = payload.require("transid")?;
        let invoice_id = payload.require("invoice_id")?;
        // The form only carries `status` on some plans; absent means verify decides.
        let status = match payload.field("status") {
            Some(s) if s != "1" => CallbackStatus::Failed(format!("status {}", s)),
            _ => CallbackStatus::Success,
        };

        Ok(CallbackData {
            order_id: Some(invoice_id),
            correlation_token: Some(transid.clone()),
            verify_token: transid,
            reported_amount: None,
            status,
        })
    }
}
