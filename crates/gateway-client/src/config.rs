//! Provider configuration.

use crate::types::GatewayKind;
use serde::Deserialize;
use std::time::Duration;

/// Settings for every payment provider, keyed by provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaysConfig {
    #[serde(default)]
    pub zarinpal: ProviderConfig,
    #[serde(default)]
    pub nowpayments: ProviderConfig,
    #[serde(default)]
    pub tronado: ProviderConfig,
    #[serde(default)]
    pub iranpay: ProviderConfig,
    #[serde(default)]
    pub aqayepardakht: ProviderConfig,
}

impl GatewaysConfig {
    pub fn get(&self, kind: GatewayKind) -> &ProviderConfig {
        match kind {
            GatewayKind::ZarinPal => &self.zarinpal,
            GatewayKind::NowPayments => &self.nowpayments,
            GatewayKind::Tronado => &self.tronado,
            GatewayKind::IranPay => &self.iranpay,
            GatewayKind::AqayePardakht => &self.aqayepardakht,
        }
    }

    /// Cashback percentage for a provider. Disabled providers grant none.
    pub fn cashback_percent(&self, kind: GatewayKind) -> u8 {
        let provider = self.get(kind);
        if provider.enabled {
            provider.cashback_percent.min(100)
        } else {
            0
        }
    }
}

/// Settings for a single provider.
///
/// A provider may be enabled before its merchant credential is filled in;
/// calls then fail with `ConfigurationMissing`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Merchant id, API key or pin, depending on the provider.
    #[serde(default, alias = "merchant_id", alias = "api_key", alias = "pin")]
    pub credential: Option<String>,

    /// Wallet that receives funds (Tronado only).
    #[serde(default)]
    pub wallet_address: Option<String>,

    /// Overrides the provider's public API endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Extra wallet credit granted after settlement, in percent of the amount.
    #[serde(default)]
    pub cashback_percent: u8,

    /// Toman per whole unit of the provider's currency (TRX, USD). Only
    /// providers that do not charge in toman use it.
    #[serde(default)]
    pub exchange_rate: Option<u64>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            credential: None,
            wallet_address: None,
            base_url: None,
            timeout: default_timeout(),
            cashback_percent: 0,
            exchange_rate: None,
        }
    }
}

impl ProviderConfig {
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}
