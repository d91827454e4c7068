//! Configuration for the callback server.

use anyhow::{Context, Result};
use gateway_client::GatewaysConfig;
use serde::Deserialize;
use settlement::{PanelRecord, Product, SettlementConfig, StoreConfig};
use std::path::{Path, PathBuf};

/// Server configuration, read from the environment (`SECTION__FIELD`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Bot API used for user notifications
    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub settlement: SettlementConfig,

    /// Payment providers, one section each
    #[serde(default)]
    pub gateways: GatewaysConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Panels and products loaded into the store at startup
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL providers use to reach the callback routes
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_api_url")]
    pub api_url: String,

    /// Without a token, notices are logged and dropped.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Payment initiations per minute, per user
    #[serde(default = "default_payments_per_minute")]
    pub payments_per_minute: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// JSON file with `panels` and `products` arrays
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Contents of the catalog file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub panels: Vec<PanelRecord>,
    #[serde(default)]
    pub products: Vec<Product>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_url: default_bot_api_url(),
            token: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            payments_per_minute: default_payments_per_minute(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_bot_api_url() -> String {
    "https://api.telegram.org".into()
}

fn default_payments_per_minute() -> u32 {
    60
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Catalog {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_client::GatewayKind;
    use settlement::ExtendPolicy;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.settlement.queue_capacity, 256);
        assert!(config.bot.token.is_none());
        assert!(!config.gateways.get(GatewayKind::ZarinPal).enabled);
    }

    #[tokio::test]
    async fn test_catalog_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{
                "panels": [{
                    "config": {
                        "name": "de-1",
                        "kind": "marzban",
                        "base_url": "https://panel.example",
                        "username": "admin",
                        "password": "secret"
                    },
                    "extend_policy": 2
                }],
                "products": [{
                    "code": "p30",
                    "name": "30 GB / 30 days",
                    "volume_gb": 30,
                    "duration_days": 30,
                    "price": 100000
                }]
            }"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).await.unwrap();
        assert_eq!(catalog.panels.len(), 1);
        assert_eq!(catalog.panels[0].extend_policy, ExtendPolicy::AccumulateAll);
        assert_eq!(catalog.products[0].volume_gb, 30);

        assert!(Catalog::load(&dir.path().join("missing.json")).await.is_err());
    }
}
