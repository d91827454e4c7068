//! Concrete payment providers.

mod aqayepardakht;
mod iranpay;
mod nowpayments;
mod tronado;
mod zarinpal;

pub use aqayepardakht::AqayePardakht;
pub use iranpay::IranPay;
pub use nowpayments::NowPayments;
pub use tronado::Tronado;
pub use zarinpal::ZarinPal;

use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::types::GatewayKind;
use reqwest::{Client, Response};
use secrecy::SecretString;
use tracing::warn;

fn http_client(config: &ProviderConfig) -> Result<Client, GatewayError> {
    Ok(Client::builder().timeout(config.timeout).build()?)
}

fn credential(config: &ProviderConfig) -> Option<SecretString> {
    config
        .credential
        .as_ref()
        .filter(|c| !c.trim().is_empty())
        .map(|c| SecretString::new(c.clone()))
}

fn require<'a>(
    value: &'a Option<SecretString>,
    gateway: GatewayKind,
    field: &'static str,
) -> Result<&'a SecretString, GatewayError> {
    value
        .as_ref()
        .ok_or(GatewayError::ConfigurationMissing { gateway, field })
}

/// Map a 5xx to a transport error; other statuses are left to the caller.
async fn reject_server_error(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_server_error() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(status = status.as_u16(), "Provider server error");
        return Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

/// Read a JSON value as text, accepting both strings and numbers.
fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert a toman price into provider units, where `units_per_whole` units
/// make one TRX or USD and `rate` is toman per whole unit. Rounds up so the
/// shop is never short-changed.
fn quote(
    rate: Option<u64>,
    gateway: GatewayKind,
    toman: u64,
    units_per_whole: u64,
) -> Result<u64, GatewayError> {
    let rate = rate
        .filter(|rate| *rate > 0)
        .ok_or(GatewayError::ConfigurationMissing {
            gateway,
            field: "exchange_rate",
        })?;
    let units = (u128::from(toman) * u128::from(units_per_whole)).div_ceil(u128::from(rate));
    u64::try_from(units).map_err(|_| GatewayError::Rejected {
        gateway,
        code: None,
        message: format!("amount {} out of range", toman),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_rounds_up() {
        // 100,000 toman at 60,000 toman/USD is 1.67 USD.
        assert_eq!(quote(Some(60_000), GatewayKind::NowPayments, 100_000, 1).unwrap(), 2);
        assert_eq!(quote(Some(60_000), GatewayKind::NowPayments, 120_000, 1).unwrap(), 2);
        // 36,000 toman at 6,000 toman/TRX is exactly 6 TRX.
        assert_eq!(
            quote(Some(6_000), GatewayKind::Tronado, 36_000, 1_000_000).unwrap(),
            6_000_000
        );

        for rate in [None, Some(0)] {
            assert!(matches!(
                quote(rate, GatewayKind::Tronado, 1, 1),
                Err(GatewayError::ConfigurationMissing {
                    field: "exchange_rate",
                    ..
                })
            ));
        }
    }
}
