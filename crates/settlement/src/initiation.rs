//! Starting a payment: the record is stored before the provider is called.

use crate::error::SettlementError;
use crate::store::Repository;
use crate::types::{
    normalize_username, PaymentRecord, PendingSelection, Purpose, PurposeRequest, User, UserId,
};
use gateway_client::{GatewayKind, GatewayRegistry, PaymentRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Where to send the user to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiatedPayment {
    pub order_id: String,
    pub payment_url: String,
    /// Charge in the provider's unit.
    pub amount: u64,
    /// Toman value.
    pub credit: u64,
}

pub struct PaymentService {
    repo: Arc<dyn Repository>,
    gateways: Arc<GatewayRegistry>,
    callback_base: String,
}

impl PaymentService {
    /// `callback_base` is the public URL providers reach this server at.
    pub fn new(
        repo: Arc<dyn Repository>,
        gateways: Arc<GatewayRegistry>,
        callback_base: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            gateways,
            callback_base: callback_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn callback_url(&self, kind: GatewayKind) -> String {
        format!("{}/callbacks/{}", self.callback_base, kind.as_str())
    }

    /// Start a payment for `request`.
    ///
    /// Account purposes are charged the price of the product the user
    /// selected, for their tier; `amount`, when given, must equal it. Top-ups
    /// take `amount` as is. The charge is quoted in the provider's currency
    /// while the record keeps the toman value separately.
    #[instrument(skip(self, description))]
    pub async fn initiate(
        &self,
        user_id: UserId,
        request: PurposeRequest,
        amount: Option<u64>,
        method: GatewayKind,
        description: &str,
    ) -> Result<InitiatedPayment, SettlementError> {
        let gateway = self
            .gateways
            .get(method)
            .ok_or(SettlementError::GatewayUnavailable(method))?;
        let user = match self.repo.get_user(user_id).await? {
            Some(user) => user,
            None => {
                info!(user_id, "Registering first-time payer");
                let user = User::new(user_id);
                self.repo.upsert_user(user.clone()).await?;
                user
            }
        };

        let (purpose, credit) = self.bind(&user, request, amount).await?;
        if credit == 0 {
            return Err(SettlementError::InvalidRequest("amount must be positive".into()));
        }
        let charge = gateway.quote(credit)?;
        let bound_product = !matches!(purpose, Purpose::WalletTopUp);

        let record = PaymentRecord::new_unpaid(user_id, charge, purpose, method).with_credit(credit);
        let order_id = record.order_id.clone();
        self.repo.insert_payment(record).await?;

        let request = PaymentRequest {
            amount: charge,
            order_id: order_id.clone(),
            description: description.to_string(),
            callback_url: self.callback_url(method),
        };
        let result = gateway.initiate_payment(&request).await?;
        self.repo
            .set_correlation(&order_id, &result.correlation_token)
            .await?;
        if bound_product {
            self.repo.clear_pending(user_id).await?;
        }

        info!(%order_id, %method, amount = charge, credit, "Payment initiated");
        Ok(InitiatedPayment {
            order_id,
            payment_url: result.payment_url,
            amount: charge,
            credit,
        })
    }

    /// Resolve the product a purpose pays for and its toman price.
    async fn bind(
        &self,
        user: &User,
        request: PurposeRequest,
        amount: Option<u64>,
    ) -> Result<(Purpose, u64), SettlementError> {
        match request {
            PurposeRequest::WalletTopUp => Ok((Purpose::WalletTopUp, amount.unwrap_or(0))),
            PurposeRequest::Create { username } => {
                let selection = user.pending.clone().ok_or_else(|| {
                    SettlementError::InvalidRequest("no product selected".into())
                })?;
                let purpose = Purpose::create(&username, &selection);
                if let Purpose::CreateAccount { username, .. } = &purpose {
                    if self.repo.get_service(username).await?.is_some() {
                        return Err(SettlementError::UsernameCollision(username.clone()));
                    }
                }
                let price = self
                    .price(user, &selection.product_code, &selection.panel_name)
                    .await?;
                Ok((purpose, agreed(price, amount)?))
            }
            PurposeRequest::Extend { username } => {
                let username = normalize_username(&username);
                let service = self
                    .repo
                    .get_service(&username)
                    .await?
                    .ok_or_else(|| SettlementError::RecordNotFound(format!("service {}", username)))?;
                if service.user_id != user.id {
                    return Err(SettlementError::InvalidRequest(format!(
                        "service {} does not belong to user {}",
                        username, user.id
                    )));
                }
                let product_code = user
                    .pending
                    .as_ref()
                    .map(|selection| selection.product_code.clone())
                    .unwrap_or(service.product_code);
                let price = self.price(user, &product_code, &service.panel_name).await?;
                Ok((Purpose::extend(&username, &product_code), agreed(price, amount)?))
            }
        }
    }

    async fn price(&self, user: &User, product_code: &str, panel_name: &str) -> Result<u64, SettlementError> {
        let product = self
            .repo
            .get_product(product_code)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("product {}", product_code)))?;
        let panel = self
            .repo
            .get_panel(panel_name)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("panel {}", panel_name)))?;
        Ok(panel.tiers.resolve(user.tier).price_of(&product))
    }

    /// Store the product and panel a later `create` or `extend` payment is for.
    pub async fn select_product(
        &self,
        user_id: UserId,
        selection: PendingSelection,
    ) -> Result<(), SettlementError> {
        if self.repo.get_product(&selection.product_code).await?.is_none() {
            return Err(SettlementError::RecordNotFound(format!(
                "product {}",
                selection.product_code
            )));
        }
        if self.repo.get_panel(&selection.panel_name).await?.is_none() {
            return Err(SettlementError::RecordNotFound(format!(
                "panel {}",
                selection.panel_name
            )));
        }

        let mut user = self
            .repo
            .get_user(user_id)
            .await?
            .unwrap_or_else(|| User::new(user_id));
        user.pending = Some(selection);
        self.repo.upsert_user(user).await
    }

    /// Remember the chat message that shows the payment instructions, so it
    /// can be removed once the payment settles.
    pub async fn attach_message(&self, order_id: &str, message_id: i64) -> Result<(), SettlementError> {
        self.repo.set_message_id(order_id, message_id).await
    }
}

fn agreed(price: u64, amount: Option<u64>) -> Result<u64, SettlementError> {
    match amount {
        Some(amount) if amount != price => Err(SettlementError::InvalidRequest(format!(
            "amount {} does not match price {}",
            amount, price
        ))),
        _ => Ok(price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;
    use crate::testing::FakeGateway;
    use crate::types::{PanelRecord, Product, ServiceRecord, ServiceStatus, Tier, TierSettings};
    use chrono::Utc;
    use gateway_client::{ProviderConfig, Tronado};
    use panel_client::{BackendKind, PanelConfig};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service() -> (Arc<MemoryRepository>, PaymentService) {
        let repo = Arc::new(MemoryRepository::new());
        repo.upsert_user(User::new(42)).await.unwrap();
        let mut registry = GatewayRegistry::new();
        registry.register(Arc::new(FakeGateway::new(GatewayKind::ZarinPal)));
        let service = PaymentService::new(repo.clone(), Arc::new(registry), "https://shop.test/");
        (repo, service)
    }

    async fn with_catalog(repo: &MemoryRepository) {
        repo.upsert_product(Product {
            code: "p30".into(),
            name: "30 GB".into(),
            volume_gb: 30,
            duration_days: 30,
            price: 100_000,
        })
        .await
        .unwrap();
        let mut panel = PanelRecord::new(PanelConfig::new(
            "de-1",
            BackendKind::Marzban,
            "http://panel.test",
        ));
        let mut agent = TierSettings::default();
        agent.prices.insert("p30".into(), 80_000);
        panel.tiers.agent = Some(agent);
        repo.upsert_panel(panel).await.unwrap();
    }

    fn selection() -> PendingSelection {
        PendingSelection {
            product_code: "p30".into(),
            panel_name: "de-1".into(),
        }
    }

    fn create(username: &str) -> PurposeRequest {
        PurposeRequest::Create {
            username: username.into(),
        }
    }

    #[tokio::test]
    async fn test_initiate_stores_unpaid_record() {
        let (repo, service) = service().await;

        let payment = service
            .initiate(42, PurposeRequest::WalletTopUp, Some(10_000), GatewayKind::ZarinPal, "Top up")
            .await
            .unwrap();
        service.attach_message(&payment.order_id, 77).await.unwrap();

        assert_eq!(payment.payment_url, format!("https://pay.test/{}", payment.order_id));
        let record = repo.get_payment(&payment.order_id).await.unwrap().unwrap();
        assert!(!record.is_paid());
        assert_eq!(record.amount, 10_000);
        assert_eq!(record.credit, 10_000);
        assert_eq!(record.correlation, Some(format!("T-{}", payment.order_id)));
        assert_eq!(record.message_id, Some(77));
    }

    #[tokio::test]
    async fn test_initiate_rejects_bad_requests() {
        let (_, service) = service().await;

        assert!(matches!(
            service
                .initiate(42, PurposeRequest::WalletTopUp, Some(0), GatewayKind::ZarinPal, "")
                .await,
            Err(SettlementError::InvalidRequest(_))
        ));
        assert!(matches!(
            service
                .initiate(42, PurposeRequest::WalletTopUp, None, GatewayKind::ZarinPal, "")
                .await,
            Err(SettlementError::InvalidRequest(_))
        ));
        assert!(matches!(
            service
                .initiate(42, PurposeRequest::WalletTopUp, Some(1), GatewayKind::Tronado, "")
                .await,
            Err(SettlementError::GatewayUnavailable(GatewayKind::Tronado))
        ));
    }

    #[tokio::test]
    async fn test_initiate_registers_new_user() {
        let (repo, service) = service().await;

        service
            .initiate(7, PurposeRequest::WalletTopUp, Some(500), GatewayKind::ZarinPal, "")
            .await
            .unwrap();

        assert_eq!(repo.get_user(7).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_create_charges_product_price_and_binds_it() {
        let (repo, service) = service().await;
        with_catalog(&repo).await;
        service.select_product(42, selection()).await.unwrap();

        let payment = service
            .initiate(42, create("Alice"), None, GatewayKind::ZarinPal, "")
            .await
            .unwrap();

        assert_eq!(payment.amount, 100_000);
        let record = repo.get_payment(&payment.order_id).await.unwrap().unwrap();
        assert_eq!(
            record.purpose,
            Purpose::CreateAccount {
                username: "alice".into(),
                product_code: "p30".into(),
                panel_name: "de-1".into(),
            }
        );
        assert_eq!(record.credit, 100_000);
        // Changing the selection later cannot alter what was paid for.
        assert_eq!(repo.get_user(42).await.unwrap().unwrap().pending, None);
    }

    #[tokio::test]
    async fn test_caller_amount_must_match_price() {
        let (repo, service) = service().await;
        with_catalog(&repo).await;
        service.select_product(42, selection()).await.unwrap();

        let result = service
            .initiate(42, create("alice"), Some(1), GatewayKind::ZarinPal, "")
            .await;

        assert!(matches!(result, Err(SettlementError::InvalidRequest(_))));
        assert_eq!(repo.get_user(42).await.unwrap().unwrap().pending, Some(selection()));
    }

    #[tokio::test]
    async fn test_agent_tier_price() {
        let (repo, service) = service().await;
        with_catalog(&repo).await;
        let mut agent = User::new(9);
        agent.tier = Tier::Agent;
        repo.upsert_user(agent).await.unwrap();
        service.select_product(9, selection()).await.unwrap();

        let payment = service
            .initiate(9, create("bob"), Some(80_000), GatewayKind::ZarinPal, "")
            .await
            .unwrap();

        assert_eq!(payment.credit, 80_000);
    }

    #[tokio::test]
    async fn test_create_without_selection_or_with_taken_name() {
        let (repo, service) = service().await;
        with_catalog(&repo).await;

        assert!(matches!(
            service.initiate(42, create("alice"), None, GatewayKind::ZarinPal, "").await,
            Err(SettlementError::InvalidRequest(_))
        ));

        repo.insert_service(owned_service("alice", 7)).await.unwrap();
        service.select_product(42, selection()).await.unwrap();
        assert!(matches!(
            service.initiate(42, create("Alice"), None, GatewayKind::ZarinPal, "").await,
            Err(SettlementError::UsernameCollision(_))
        ));
    }

    fn owned_service(username: &str, user_id: UserId) -> ServiceRecord {
        ServiceRecord {
            username: username.into(),
            user_id,
            panel_name: "de-1".into(),
            product_code: "p30".into(),
            volume_gb: 30,
            duration_days: 30,
            status: ServiceStatus::Active,
            subscription_url: None,
            note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_extend_binds_current_product_of_own_service() {
        let (repo, service) = service().await;
        with_catalog(&repo).await;
        repo.insert_service(owned_service("alice", 42)).await.unwrap();
        repo.insert_service(owned_service("carol", 7)).await.unwrap();

        let payment = service
            .initiate(
                42,
                PurposeRequest::Extend {
                    username: "alice".into(),
                },
                None,
                GatewayKind::ZarinPal,
                "",
            )
            .await
            .unwrap();
        let record = repo.get_payment(&payment.order_id).await.unwrap().unwrap();
        assert_eq!(record.purpose, Purpose::extend("alice", "p30"));
        assert_eq!(record.credit, 100_000);

        assert!(matches!(
            service
                .initiate(
                    42,
                    PurposeRequest::Extend {
                        username: "carol".into(),
                    },
                    None,
                    GatewayKind::ZarinPal,
                    "",
                )
                .await,
            Err(SettlementError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_tronado_charge_is_quoted_in_sun() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Order/GetOrderToken"))
            .and(body_partial_json(json!({ "TronAmount": "6" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IsSuccessful": true,
                "Data": { "Token": "tok-1" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let repo = Arc::new(MemoryRepository::new());
        let config = ProviderConfig {
            enabled: true,
            credential: Some("key".into()),
            wallet_address: Some("TWallet".into()),
            base_url: Some(mock_server.uri()),
            exchange_rate: Some(6_000),
            ..ProviderConfig::default()
        };
        let mut registry = GatewayRegistry::new();
        registry.register(Arc::new(Tronado::new(&config).unwrap()));
        let service = PaymentService::new(repo.clone(), Arc::new(registry), "https://shop.test");

        let payment = service
            .initiate(42, PurposeRequest::WalletTopUp, Some(36_000), GatewayKind::Tronado, "")
            .await
            .unwrap();

        assert_eq!(payment.amount, 6_000_000);
        assert_eq!(payment.credit, 36_000);
        let record = repo.get_payment(&payment.order_id).await.unwrap().unwrap();
        assert_eq!(record.amount, 6_000_000);
        assert_eq!(record.credit, 36_000);
        assert_eq!(record.correlation.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_unpriced_provider_is_refused() {
        let repo = Arc::new(MemoryRepository::new());
        let config = ProviderConfig {
            enabled: true,
            credential: Some("key".into()),
            wallet_address: Some("TWallet".into()),
            ..ProviderConfig::default()
        };
        let mut registry = GatewayRegistry::new();
        registry.register(Arc::new(Tronado::new(&config).unwrap()));
        let service = PaymentService::new(repo, Arc::new(registry), "https://shop.test");

        let result = service
            .initiate(42, PurposeRequest::WalletTopUp, Some(36_000), GatewayKind::Tronado, "")
            .await;
        assert!(matches!(result, Err(SettlementError::ConfigurationMissing(_))));
    }

    #[tokio::test]
    async fn test_select_product_requires_catalog_entries() {
        let (repo, service) = service().await;

        assert!(matches!(
            service.select_product(42, selection()).await,
            Err(SettlementError::RecordNotFound(_))
        ));

        with_catalog(&repo).await;
        service.select_product(42, selection()).await.unwrap();
        assert_eq!(repo.get_user(42).await.unwrap().unwrap().pending, Some(selection()));
    }

    #[test]
    fn test_callback_url() {
        let repo = Arc::new(MemoryRepository::new());
        let service = PaymentService::new(repo, Arc::new(GatewayRegistry::new()), "https://shop.test/");
        assert_eq!(
            service.callback_url(GatewayKind::AqayePardakht),
            "https://shop.test/callbacks/aqayepardakht"
        );
    }
}
