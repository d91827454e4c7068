//! In-memory repository with optional JSON file persistence.

use super::Repository;
use crate::error::SettlementError;
use crate::types::{
    normalize_username, ExtensionEvent, PanelRecord, PaymentRecord, PaymentStatus, Product,
    ServiceRecord, User, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use gateway_client::GatewayKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    version: u32,
    payments: HashMap<String, PaymentRecord>,
    users: HashMap<UserId, User>,
    products: HashMap<String, Product>,
    panels: HashMap<String, PanelRecord>,
    services: HashMap<String, ServiceRecord>,
    extensions: Vec<ExtensionEvent>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            payments: HashMap::new(),
            users: HashMap::new(),
            products: HashMap::new(),
            panels: HashMap::new(),
            services: HashMap::new(),
            extensions: Vec::new(),
        }
    }
}

/// Repository backed by a single `RwLock`.
///
/// When opened with a path, every mutation rewrites the file through a
/// temp file and rename while the write lock is still held, so snapshots
/// reach the disk in the order they were taken.
pub struct MemoryRepository {
    data: RwLock<StoreData>,
    storage_path: Option<PathBuf>,
}

impl MemoryRepository {
    /// A repository that lives only in memory.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            storage_path: None,
        }
    }

    /// Open a persistent repository, loading existing data if present.
    pub async fn open(storage_path: PathBuf) -> Result<Self, SettlementError> {
        let repo = Self {
            data: RwLock::new(StoreData::default()),
            storage_path: Some(storage_path),
        };
        repo.load().await?;
        Ok(repo)
    }

    async fn load(&self) -> Result<(), SettlementError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if !path.exists() {
            info!("Store not found at {:?}, starting fresh", path);
            return Ok(());
        }

        let bytes = fs::read(path).await?;
        let data: StoreData = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded store: {} payments, {} users, {} services",
            data.payments.len(),
            data.users.len(),
            data.services.len()
        );
        *self.data.write().await = data;
        Ok(())
    }

    /// Write `data` to disk. Callers hold the write guard `data` came from.
    async fn persist(&self, data: &StoreData) -> Result<(), SettlementError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&temp_path, &bytes).await?;
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Saved store ({} bytes) to {:?}", bytes.len(), path);
        Ok(())
    }

    fn not_found(kind: &str, key: impl std::fmt::Display) -> SettlementError {
        SettlementError::RecordNotFound(format!("{} {}", kind, key))
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_payment(&self, record: PaymentRecord) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        if data.payments.contains_key(&record.order_id) {
            return Err(SettlementError::InvalidRequest(format!(
                "order {} already exists",
                record.order_id
            )));
        }
        data.payments.insert(record.order_id.clone(), record);
        self.persist(&data).await
    }

    async fn get_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>, SettlementError> {
        Ok(self.data.read().await.payments.get(order_id).cloned())
    }

    async fn find_payment_by_correlation(
        &self,
        method: GatewayKind,
        correlation: &str,
    ) -> Result<Option<PaymentRecord>, SettlementError> {
        let data = self.data.read().await;
        Ok(data
            .payments
            .values()
            .find(|p| p.method == method && p.correlation.as_deref() == Some(correlation))
            .cloned())
    }

    async fn set_correlation(&self, order_id: &str, correlation: &str) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        let record = data
            .payments
            .get_mut(order_id)
            .ok_or_else(|| Self::not_found("order", order_id))?;
        record.correlation = Some(correlation.to_string());
        self.persist(&data).await
    }

    async fn set_message_id(&self, order_id: &str, message_id: i64) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        let record = data
            .payments
            .get_mut(order_id)
            .ok_or_else(|| Self::not_found("order", order_id))?;
        record.message_id = Some(message_id);
        self.persist(&data).await
    }

    async fn mark_paid_if_unpaid(
        &self,
        order_id: &str,
        ref_id: Option<String>,
    ) -> Result<bool, SettlementError> {
        let mut data = self.data.write().await;
        let record = data
            .payments
            .get_mut(order_id)
            .ok_or_else(|| Self::not_found("order", order_id))?;
        if record.status != PaymentStatus::Unpaid {
            return Ok(false);
        }

        let previous = record.clone();
        record.status = PaymentStatus::Paid;
        record.paid_at = Some(Utc::now());
        record.ref_id = ref_id;

        // An unsaved transition is undone so a redelivered callback can
        // still settle the order.
        if let Err(e) = self.persist(&data).await {
            error!(order_id, "Could not save paid status, reverting: {}", e);
            data.payments.insert(order_id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, SettlementError> {
        Ok(self.data.read().await.users.get(&id).cloned())
    }

    async fn upsert_user(&self, user: User) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        data.users.insert(user.id, user);
        self.persist(&data).await
    }

    async fn credit_wallet(&self, id: UserId, amount: u64) -> Result<u64, SettlementError> {
        let mut data = self.data.write().await;
        let user = data
            .users
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("user", id))?;
        let previous = user.balance;
        user.balance = previous.saturating_add(amount);
        let balance = user.balance;

        if let Err(e) = self.persist(&data).await {
            error!(user_id = id, "Could not save wallet credit, reverting: {}", e);
            if let Some(user) = data.users.get_mut(&id) {
                user.balance = previous;
            }
            return Err(e);
        }
        Ok(balance)
    }

    async fn clear_pending(&self, id: UserId) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        if let Some(user) = data.users.get_mut(&id) {
            user.pending = None;
        }
        self.persist(&data).await
    }

    async fn get_product(&self, code: &str) -> Result<Option<Product>, SettlementError> {
        Ok(self.data.read().await.products.get(code).cloned())
    }

    async fn upsert_product(&self, product: Product) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        data.products.insert(product.code.clone(), product);
        self.persist(&data).await
    }

    async fn get_panel(&self, name: &str) -> Result<Option<PanelRecord>, SettlementError> {
        Ok(self.data.read().await.panels.get(name).cloned())
    }

    async fn upsert_panel(&self, panel: PanelRecord) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        data.panels.insert(panel.name().to_string(), panel);
        self.persist(&data).await
    }

    async fn increment_panel_usage(&self, name: &str) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        let panel = data
            .panels
            .get_mut(name)
            .ok_or_else(|| Self::not_found("panel", name))?;
        panel.usage_count += 1;
        self.persist(&data).await
    }

    async fn get_service(&self, username: &str) -> Result<Option<ServiceRecord>, SettlementError> {
        let key = normalize_username(username);
        Ok(self.data.read().await.services.get(&key).cloned())
    }

    async fn insert_service(&self, service: ServiceRecord) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        let key = normalize_username(&service.username);
        if data.services.contains_key(&key) {
            return Err(SettlementError::UsernameCollision(key));
        }
        data.services.insert(key, service);
        self.persist(&data).await
    }

    async fn update_service(&self, service: ServiceRecord) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        let key = normalize_username(&service.username);
        let slot = data
            .services
            .get_mut(&key)
            .ok_or_else(|| Self::not_found("service", &key))?;
        *slot = service;
        self.persist(&data).await
    }

    async fn append_extension(&self, event: ExtensionEvent) -> Result<(), SettlementError> {
        let mut data = self.data.write().await;
        data.extensions.push(event);
        self.persist(&data).await
    }

    async fn extensions(&self, username: &str) -> Result<Vec<ExtensionEvent>, SettlementError> {
        let key = normalize_username(username);
        let data = self.data.read().await;
        Ok(data
            .extensions
            .iter()
            .filter(|e| e.username == key)
            .cloned()
            .collect())
    }
}
