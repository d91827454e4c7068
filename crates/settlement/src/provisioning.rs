//! Account creation and renewal on the configured backends.

use crate::error::SettlementError;
use crate::policy::Extension;
use crate::store::Repository;
use crate::types::{
    normalize_username, ExtensionEvent, PanelRecord, Product, ServiceRecord, ServiceStatus, User,
    UserId,
};
use chrono::Utc;
use panel_client::{
    CreateAccountRequest, ModifyAccountRequest, PanelAdapter, PanelConfig, PanelError,
    PanelSession,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Builds adapters from panel configuration.
pub trait AdapterFactory: Send + Sync {
    fn connect(&self, config: &PanelConfig) -> Result<Arc<dyn PanelAdapter>, PanelError>;
}

/// Factory for the real HTTP backends.
pub struct PanelConnector;

impl AdapterFactory for PanelConnector {
    fn connect(&self, config: &PanelConfig) -> Result<Arc<dyn PanelAdapter>, PanelError> {
        panel_client::connect(config)
    }
}

/// Result of a successful renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renewal {
    pub service: ServiceRecord,
    pub extension: Extension,
}

pub struct Provisioner {
    repo: Arc<dyn Repository>,
    factory: Arc<dyn AdapterFactory>,
}

impl Provisioner {
    pub fn new(repo: Arc<dyn Repository>, factory: Arc<dyn AdapterFactory>) -> Self {
        Self { repo, factory }
    }

    /// Create `username` from the product and panel bound to the payment.
    ///
    /// `paid` (toman) must cover the product's price for the user's tier.
    /// The backend is asked first; an existing account there is a collision
    /// and nothing is created.
    #[instrument(skip(self))]
    pub async fn create_account(
        &self,
        user_id: UserId,
        username: &str,
        product_code: &str,
        panel_name: &str,
        paid: u64,
    ) -> Result<ServiceRecord, SettlementError> {
        let username = normalize_username(username);
        let user = self.user(user_id).await?;
        let product = self.product(product_code).await?;
        let panel = self.panel(panel_name).await?;
        let settings = panel.tiers.resolve(user.tier);
        covers(paid, settings.price_of(&product))?;

        if self.repo.get_service(&username).await?.is_some() {
            return Err(SettlementError::UsernameCollision(username));
        }

        let (adapter, session) = self.open(&panel).await?;
        if adapter.get_account(&session, &username).await?.is_some() {
            return Err(SettlementError::UsernameCollision(username));
        }

        let note = settings
            .note_prefix
            .as_deref()
            .map(|prefix| format!("{} {}", prefix.trim(), user_id));
        let mut request =
            CreateAccountRequest::new(username.clone(), product.volume_bytes(), product.duration_days);
        request.inbounds = settings.inbounds.clone();
        request.note = note.clone();
        request.reset_strategy = settings.reset_strategy;

        let account = adapter.create_account(&session, &request).await?;
        let subscription_url = match account.subscription_url.filter(|url| !url.is_empty()) {
            Some(url) => Some(url),
            None => match adapter.get_subscription_link(&session, &username).await {
                Ok(url) => Some(url),
                Err(e) if e.is_unsupported() => None,
                Err(e) => {
                    warn!(%username, "Account created but link lookup failed: {}", e);
                    None
                }
            },
        };

        let now = Utc::now();
        let service = ServiceRecord {
            username: username.clone(),
            user_id,
            panel_name: panel.name().to_string(),
            product_code: product.code.clone(),
            volume_gb: product.volume_gb,
            duration_days: product.duration_days,
            status: ServiceStatus::Active,
            subscription_url,
            note,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_service(service.clone()).await?;
        self.repo.increment_panel_usage(panel.name()).await?;

        info!(%username, panel = %panel.name(), "Account created");
        Ok(service)
    }

    /// Renew `username` with the product bound to the payment.
    #[instrument(skip(self))]
    pub async fn extend_account(
        &self,
        user_id: UserId,
        username: &str,
        product_code: &str,
        paid: u64,
        now: i64,
    ) -> Result<Renewal, SettlementError> {
        let username = normalize_username(username);
        let mut service = self
            .repo
            .get_service(&username)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("service {}", username)))?;
        if service.user_id != user_id {
            return Err(SettlementError::InvalidRequest(format!(
                "service {} does not belong to user {}",
                username, user_id
            )));
        }

        let user = self.user(user_id).await?;
        let product = self.product(product_code).await?;
        let panel = self.panel(&service.panel_name).await?;
        covers(paid, panel.tiers.resolve(user.tier).price_of(&product))?;

        let (adapter, session) = self.open(&panel).await?;
        let account = adapter
            .get_account(&session, &username)
            .await?
            .ok_or_else(|| PanelError::AccountNotFound(username.clone()))?;

        let extension = renewal_limits(&panel, &product, account.expire, account.data_limit, now);
        let request = ModifyAccountRequest {
            data_limit: Some(extension.data_limit),
            expire: Some(extension.expire),
            note: None,
        };
        adapter.modify_account(&session, &username, &request).await?;

        if extension.reset_traffic {
            if let Err(e) = adapter.reset_traffic(&session, &username).await {
                warn!(%username, "Renewed but traffic reset failed: {}", e);
            }
        }

        service.product_code = product.code.clone();
        service.volume_gb = product.volume_gb;
        service.duration_days = product.duration_days;
        service.status = ServiceStatus::Active;
        service.updated_at = Utc::now();
        self.repo.update_service(service.clone()).await?;
        self.repo
            .append_extension(ExtensionEvent {
                username: username.clone(),
                user_id,
                product_code: product.code.clone(),
                amount: paid,
                at: Utc::now(),
            })
            .await?;

        info!(%username, expire = extension.expire, "Account renewed");
        Ok(Renewal { service, extension })
    }

    async fn open(
        &self,
        panel: &PanelRecord,
    ) -> Result<(Arc<dyn PanelAdapter>, PanelSession), SettlementError> {
        let adapter = self.factory.connect(&panel.config)?;
        let session = adapter.authenticate().await?;
        Ok((adapter, session))
    }

    async fn user(&self, id: UserId) -> Result<User, SettlementError> {
        self.repo
            .get_user(id)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("user {}", id)))
    }

    async fn product(&self, code: &str) -> Result<Product, SettlementError> {
        self.repo
            .get_product(code)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("product {}", code)))
    }

    async fn panel(&self, name: &str) -> Result<PanelRecord, SettlementError> {
        self.repo
            .get_panel(name)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("panel {}", name)))
    }
}

fn covers(paid: u64, price: u64) -> Result<(), SettlementError> {
    if paid < price {
        return Err(SettlementError::InsufficientPayment { paid, price });
    }
    Ok(())
}

/// Apply the panel's policy. Unlimited products (zero days or zero volume)
/// stay unlimited.
fn renewal_limits(
    panel: &PanelRecord,
    product: &Product,
    current_expire: i64,
    current_limit: u64,
    now: i64,
) -> Extension {
    let mut extension = panel.extend_policy.resolve(
        current_expire,
        current_limit,
        product.duration_days,
        product.volume_bytes(),
        now,
    );
    if product.duration_days == 0 {
        extension.expire = 0;
    }
    if product.volume_gb == 0 {
        extension.data_limit = 0;
    }
    extension
}
