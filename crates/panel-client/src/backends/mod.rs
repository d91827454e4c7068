//! Concrete backends.

mod hiddify;
mod marzban;
mod mikrotik;
mod xui;

pub use hiddify::Hiddify;
pub use marzban::Marzban;
pub use mikrotik::Mikrotik;
pub use xui::XUi;

use crate::error::PanelError;
use crate::types::PanelConfig;
use reqwest::{Client, Response};
use secrecy::SecretString;
use tracing::warn;

fn http_client(config: &PanelConfig) -> Result<Client, PanelError> {
    Ok(Client::builder().timeout(config.timeout).build()?)
}

fn base_url(config: &PanelConfig) -> String {
    config.base_url.trim_end_matches('/').to_string()
}

fn credentials(config: &PanelConfig) -> Result<(String, SecretString), PanelError> {
    let username = config
        .username
        .clone()
        .ok_or(PanelError::ConfigurationMissing("username"))?;
    let password = config
        .password
        .clone()
        .ok_or(PanelError::ConfigurationMissing("password"))?;
    Ok((username, SecretString::new(password)))
}

/// Turn any non-2xx response into `PanelError::Api`.
async fn check(response: Response) -> Result<Response, PanelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    warn!(status = status.as_u16(), "Panel request failed");
    Err(PanelError::Api {
        status: status.as_u16(),
        message,
    })
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
