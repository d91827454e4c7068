//! Persistence boundary for payments, users, products, panels and services.

mod memory;

pub use memory::MemoryRepository;

use crate::error::SettlementError;
use crate::types::{
    ExtensionEvent, PanelRecord, PaymentRecord, Product, ServiceRecord, User, UserId,
};
use async_trait::async_trait;
use gateway_client::GatewayKind;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_payment(&self, record: PaymentRecord) -> Result<(), SettlementError>;

    async fn get_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>, SettlementError>;

    async fn find_payment_by_correlation(
        &self,
        method: GatewayKind,
        correlation: &str,
    ) -> Result<Option<PaymentRecord>, SettlementError>;

    async fn set_correlation(&self, order_id: &str, correlation: &str) -> Result<(), SettlementError>;

    async fn set_message_id(&self, order_id: &str, message_id: i64) -> Result<(), SettlementError>;

    /// Move a record from unpaid to paid.
    ///
    /// The status check and the write must be one atomic step: of any number
    /// of concurrent callers for the same order, exactly one gets `true`.
    async fn mark_paid_if_unpaid(
        &self,
        order_id: &str,
        ref_id: Option<String>,
    ) -> Result<bool, SettlementError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, SettlementError>;

    async fn upsert_user(&self, user: User) -> Result<(), SettlementError>;

    /// Add to a wallet and return the new balance.
    async fn credit_wallet(&self, id: UserId, amount: u64) -> Result<u64, SettlementError>;

    async fn clear_pending(&self, id: UserId) -> Result<(), SettlementError>;

    async fn get_product(&self, code: &str) -> Result<Option<Product>, SettlementError>;

    async fn upsert_product(&self, product: Product) -> Result<(), SettlementError>;

    async fn get_panel(&self, name: &str) -> Result<Option<PanelRecord>, SettlementError>;

    async fn upsert_panel(&self, panel: PanelRecord) -> Result<(), SettlementError>;

    async fn increment_panel_usage(&self, name: &str) -> Result<(), SettlementError>;

    async fn get_service(&self, username: &str) -> Result<Option<ServiceRecord>, SettlementError>;

    /// Store a new service. Fails with `UsernameCollision` if one exists.
    async fn insert_service(&self, service: ServiceRecord) -> Result<(), SettlementError>;

    async fn update_service(&self, service: ServiceRecord) -> Result<(), SettlementError>;

    async fn append_extension(&self, event: ExtensionEvent) -> Result<(), SettlementError>;

    async fn extensions(&self, username: &str) -> Result<Vec<ExtensionEvent>, SettlementError>;
}
