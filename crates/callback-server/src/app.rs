//! Wiring configuration into a running application state.

use crate::api::AppState;
use crate::config::{Catalog, Config};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bot_client::BotClient;
use gateway_client::{GatewayKind, GatewayRegistry};
use settlement::{
    CallbackPipeline, MemoryRepository, Notice, NotificationQueue, Notifier, PanelConnector,
    PaymentService, Provisioner, QueueHandle, Repository, SettlementEngine, SettlementError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Stand-in notifier when no bot token is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), SettlementError> {
        info!(?notice, "Notice (no bot configured)");
        Ok(())
    }
}

/// Build the state behind the router. The returned handle owns the
/// notification worker and must be shut down to drain it.
pub async fn build(config: &Config) -> Result<(AppState, QueueHandle)> {
    let repo: Arc<MemoryRepository> = if config.store.persist {
        Arc::new(
            MemoryRepository::open(config.store.path.clone())
                .await
                .context("Failed to open store")?,
        )
    } else {
        info!("Persistence disabled, using in-memory storage");
        Arc::new(MemoryRepository::new())
    };

    if let Some(path) = &config.catalog.path {
        let catalog = Catalog::load(path).await?;
        seed(repo.as_ref(), catalog).await?;
    }

    let gateways = Arc::new(
        GatewayRegistry::from_config(&config.gateways).context("Failed to configure gateways")?,
    );
    let enabled = gateways.list_enabled();
    if enabled.is_empty() {
        warn!("No payment gateway enabled");
    } else {
        info!(?enabled, "Payment gateways ready");
    }

    let notifier: Arc<dyn Notifier> = match &config.bot.token {
        Some(token) => {
            let bot = BotClient::new(&config.bot.api_url, token.clone())
                .context("Failed to create bot client")?;
            if !bot.health_check().await {
                warn!("Bot API health check failed - notices may be lost");
            }
            Arc::new(bot)
        }
        None => {
            warn!("No bot token configured, notices will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let (queue, handle) = NotificationQueue::spawn(notifier, config.settlement.queue_capacity);

    let cashback: HashMap<GatewayKind, u8> = GatewayKind::ALL
        .iter()
        .map(|kind| (*kind, config.gateways.cashback_percent(*kind)))
        .filter(|(_, percent)| *percent > 0)
        .collect();

    let provisioner = Provisioner::new(repo.clone(), Arc::new(PanelConnector));
    let engine = SettlementEngine::new(repo.clone(), provisioner, queue)
        .with_cashback(cashback)
        .with_report_chat(config.settlement.report_chat_id);
    let pipeline = CallbackPipeline::new(repo.clone(), gateways.clone(), engine);
    let payments = PaymentService::new(repo, gateways.clone(), &config.server.public_url);

    let state = AppState::new(pipeline, payments, gateways)
        .with_rate_limit(config.rate_limit.payments_per_minute);
    Ok((state, handle))
}

/// Upsert catalog panels and products. Usage counters already in the store
/// are kept.
pub async fn seed(repo: &dyn Repository, catalog: Catalog) -> Result<()> {
    let (panels, products) = (catalog.panels.len(), catalog.products.len());

    for mut panel in catalog.panels {
        if let Some(existing) = repo.get_panel(panel.name()).await? {
            panel.usage_count = existing.usage_count;
        }
        repo.upsert_panel(panel).await?;
    }
    for product in catalog.products {
        repo.upsert_product(product).await?;
    }

    info!(panels, products, "Catalog loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use panel_client::{BackendKind, PanelConfig};
    use settlement::PanelRecord;

    #[tokio::test]
    async fn test_seed_keeps_usage_count() {
        let repo = MemoryRepository::new();
        let config = PanelConfig::new("de-1", BackendKind::Marzban, "http://panel.test");
        let mut existing = PanelRecord::new(config.clone());
        existing.usage_count = 5;
        repo.upsert_panel(existing).await.unwrap();

        seed(
            &repo,
            Catalog {
                panels: vec![PanelRecord::new(config)],
                products: Vec::new(),
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.get_panel("de-1").await.unwrap().unwrap().usage_count, 5);
    }

    #[tokio::test]
    async fn test_build_in_memory() {
        let mut config = Config::default();
        config.store.persist = false;

        let (state, handle) = build(&config).await.unwrap();
        assert!(state.gateways.list_enabled().is_empty());
        assert_eq!(handle.shutdown().await, 0);
    }
}
