//! Telegram Bot API HTTP client.

use crate::error::BotError;
use crate::types::*;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Telegram Bot API client.
///
/// The bot token is part of every request path, so it is kept in a
/// `SecretString` and never logged.
#[derive(Clone)]
pub struct BotClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl BotClient {
    /// Create a new bot client.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: SecretString::new(token.into()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token.expose_secret(), method)
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T, BotError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await?;
        match envelope {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(BotError::Api {
                code: other.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: other.description.unwrap_or_default(),
            }),
        }
    }

    /// Check if the bot token is accepted.
    pub async fn health_check(&self) -> bool {
        self.get_me().await.is_ok()
    }

    /// Get the bot's own account.
    #[instrument(skip(self))]
    pub async fn get_me(&self) -> Result<BotUser, BotError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Send a text message to a chat.
    #[instrument(skip(self, text))]
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage, BotError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            disable_web_page_preview: true,
        };

        match self.call::<_, SentMessage>("sendMessage", &request).await {
            Ok(sent) => {
                debug!(message_id = sent.message_id, "Sent message");
                Ok(sent)
            }
            Err(BotError::Api { code, description }) => {
                warn!(code, "Send failed: {}", description);
                Err(BotError::SendFailed(description))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a previously sent message.
    #[instrument(skip(self))]
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), BotError> {
        let request = DeleteMessageRequest {
            chat_id,
            message_id,
        };
        let _: bool = self.call("deleteMessage", &request).await?;
        Ok(())
    }
}
