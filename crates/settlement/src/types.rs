//! Core records of the settlement pipeline.

use crate::error::SettlementError;
use crate::policy::ExtendPolicy;
use chrono::{DateTime, Utc};
use gateway_client::GatewayKind;
use panel_client::{PanelConfig, ResetStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chat id of the user on the bot platform.
pub type UserId = i64;

/// Usernames are unique regardless of case.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// What a verified payment is for.
///
/// Account purposes carry the product (and panel) bound when the payment
/// was started, so later storefront activity cannot change what it buys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Purpose {
    CreateAccount {
        username: String,
        product_code: String,
        panel_name: String,
    },
    ExtendAccount {
        username: String,
        product_code: String,
    },
    WalletTopUp,
}

impl Purpose {
    pub fn create(username: &str, selection: &PendingSelection) -> Self {
        Purpose::CreateAccount {
            username: normalize_username(username),
            product_code: selection.product_code.clone(),
            panel_name: selection.panel_name.clone(),
        }
    }

    pub fn extend(username: &str, product_code: &str) -> Self {
        Purpose::ExtendAccount {
            username: normalize_username(username),
            product_code: product_code.to_string(),
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Purpose::CreateAccount {
                username,
                product_code,
                ..
            } => write!(f, "new account {} ({})", username, product_code),
            Purpose::ExtendAccount {
                username,
                product_code,
            } => write!(f, "renewal of {} ({})", username, product_code),
            Purpose::WalletTopUp => write!(f, "wallet top-up"),
        }
    }
}

/// A storefront purpose token, before a product is bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurposeRequest {
    Create { username: String },
    Extend { username: String },
    WalletTopUp,
}

impl PurposeRequest {
    /// Parse a `purpose|payload` token.
    ///
    /// `create|<username>` and `extend|<username>` need a username; every
    /// other purpose is a wallet top-up.
    pub fn from_token(token: &str) -> Result<Self, SettlementError> {
        let (purpose, payload) = token.split_once('|').unwrap_or((token, ""));
        let username = normalize_username(payload);
        match purpose.trim() {
            "create" | "extend" if username.is_empty() => Err(SettlementError::InvalidPurpose(
                format!("`{}` requires a username", purpose.trim()),
            )),
            "create" => Ok(PurposeRequest::Create { username }),
            "extend" => Ok(PurposeRequest::Extend { username }),
            _ => Ok(PurposeRequest::WalletTopUp),
        }
    }

    pub fn to_token(&self) -> String {
        match self {
            PurposeRequest::Create { username } => format!("create|{}", username),
            PurposeRequest::Extend { username } => format!("extend|{}", username),
            PurposeRequest::WalletTopUp => "wallet|".to_string(),
        }
    }
}

/// A single payment attempt.
///
/// `amount` and `credit` never change after creation, and `status` moves
/// from unpaid to paid at most once, through
/// `Repository::mark_paid_if_unpaid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub order_id: String,
    pub user_id: UserId,
    /// What the provider charges, in its own unit (toman, sun, USD).
    pub amount: u64,
    /// The same payment in toman: what wallets are credited with and
    /// prices are compared against.
    pub credit: u64,
    /// Provider-assigned id (authority, invoice id, order token).
    pub correlation: Option<String>,
    pub purpose: Purpose,
    pub method: GatewayKind,
    pub status: PaymentStatus,
    /// Pending payment instruction to delete once settled.
    pub message_id: Option<i64>,
    pub ref_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// A record for a provider that charges in toman.
    pub fn new_unpaid(user_id: UserId, amount: u64, purpose: Purpose, method: GatewayKind) -> Self {
        Self {
            order_id: uuid::Uuid::new_v4().simple().to_string(),
            user_id,
            amount,
            credit: amount,
            correlation: None,
            purpose,
            method,
            status: PaymentStatus::Unpaid,
            message_id: None,
            ref_id: None,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    /// Set the toman value of a payment charged in another unit.
    pub fn with_credit(mut self, credit: u64) -> Self {
        self.credit = credit;
        self
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }
}

/// Pricing/limit class of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Regular,
    Agent,
    Reseller,
}

/// Product/panel chosen in the storefront, awaiting payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSelection {
    pub product_code: String,
    pub panel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub balance: u64,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub pending: Option<PendingSelection>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            balance: 0,
            tier: Tier::Regular,
            pending: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub name: String,
    /// Zero for unlimited.
    pub volume_gb: u64,
    /// Zero for unlimited.
    pub duration_days: u32,
    /// Toman.
    pub price: u64,
}

impl Product {
    pub fn volume_bytes(&self) -> u64 {
        self.volume_gb.saturating_mul(panel_client::BYTES_PER_GB)
    }
}

/// Settings that differ per user tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    #[serde(default)]
    pub inbounds: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub note_prefix: Option<String>,
    #[serde(default)]
    pub reset_strategy: ResetStrategy,
    /// Price overrides by product code, in toman.
    #[serde(default)]
    pub prices: BTreeMap<String, u64>,
}

impl TierSettings {
    pub fn price_of(&self, product: &Product) -> u64 {
        self.prices
            .get(&product.code)
            .copied()
            .unwrap_or(product.price)
    }
}

/// One value per tier. Tiers without their own entry use `regular`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable<T> {
    pub regular: T,
    #[serde(default)]
    pub agent: Option<T>,
    #[serde(default)]
    pub reseller: Option<T>,
}

impl<T> TierTable<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            regular: value,
            agent: None,
            reseller: None,
        }
    }

    pub fn resolve(&self, tier: Tier) -> &T {
        let specific = match tier {
            Tier::Regular => None,
            Tier::Agent => self.agent.as_ref(),
            Tier::Reseller => self.reseller.as_ref(),
        };
        specific.unwrap_or(&self.regular)
    }
}

/// A configured backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRecord {
    pub config: PanelConfig,
    #[serde(default)]
    pub extend_policy: ExtendPolicy,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub tiers: TierTable<TierSettings>,
}

impl PanelRecord {
    pub fn new(config: PanelConfig) -> Self {
        Self {
            config,
            extend_policy: ExtendPolicy::default(),
            usage_count: 0,
            tiers: TierTable::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Disabled,
}

/// Locally tracked account, created once per username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub username: String,
    pub user_id: UserId,
    pub panel_name: String,
    pub product_code: String,
    pub volume_gb: u64,
    pub duration_days: u32,
    pub status: ServiceStatus,
    pub subscription_url: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit entry written for every renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionEvent {
    pub username: String,
    pub user_id: UserId,
    pub product_code: String,
    pub amount: u64,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_from_token() {
        assert_eq!(
            PurposeRequest::from_token("create|Alice").unwrap(),
            PurposeRequest::Create {
                username: "alice".into()
            }
        );
        assert_eq!(
            PurposeRequest::from_token("extend|bob|extra").unwrap(),
            PurposeRequest::Extend {
                username: "bob|extra".into()
            }
        );
        assert_eq!(
            PurposeRequest::from_token("wallet|").unwrap(),
            PurposeRequest::WalletTopUp
        );
        assert_eq!(PurposeRequest::from_token("").unwrap(), PurposeRequest::WalletTopUp);
        assert_eq!(
            PurposeRequest::from_token("anything").unwrap(),
            PurposeRequest::WalletTopUp
        );

        assert!(matches!(
            PurposeRequest::from_token("create|"),
            Err(SettlementError::InvalidPurpose(_))
        ));
        assert!(PurposeRequest::from_token("extend|  ").is_err());
    }

    #[test]
    fn test_purpose_token_round_trip() {
        for request in [
            PurposeRequest::Create {
                username: "alice".into(),
            },
            PurposeRequest::Extend {
                username: "bob".into(),
            },
            PurposeRequest::WalletTopUp,
        ] {
            assert_eq!(PurposeRequest::from_token(&request.to_token()).unwrap(), request);
        }
    }

    #[test]
    fn test_bound_purpose_serializes_its_product() {
        let selection = PendingSelection {
            product_code: "p30".into(),
            panel_name: "de-1".into(),
        };
        let purpose = Purpose::create("Alice", &selection);
        let json = serde_json::to_value(&purpose).unwrap();

        assert_eq!(json["kind"], "create_account");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["product_code"], "p30");
        assert_eq!(json["panel_name"], "de-1");
        assert_eq!(serde_json::from_value::<Purpose>(json).unwrap(), purpose);
    }

    #[test]
    fn test_tier_price_override() {
        let product = Product {
            code: "p30".into(),
            name: "30 GB".into(),
            volume_gb: 30,
            duration_days: 30,
            price: 100_000,
        };
        let mut agent = TierSettings::default();
        agent.prices.insert("p30".into(), 80_000);

        assert_eq!(TierSettings::default().price_of(&product), 100_000);
        assert_eq!(agent.price_of(&product), 80_000);
    }

    #[test]
    fn test_tier_table_falls_back_to_regular() {
        let table = TierTable {
            regular: 1,
            agent: Some(2),
            reseller: None,
        };
        assert_eq!(*table.resolve(Tier::Regular), 1);
        assert_eq!(*table.resolve(Tier::Agent), 2);
        assert_eq!(*table.resolve(Tier::Reseller), 1);
    }

    #[test]
    fn test_new_record_is_unpaid() {
        let record = PaymentRecord::new_unpaid(42, 10_000, Purpose::WalletTopUp, GatewayKind::ZarinPal);
        assert!(!record.is_paid());
        assert_eq!(record.order_id.len(), 32);
        assert!(record.correlation.is_none());
        assert_eq!(record.credit, 10_000);

        let record = PaymentRecord::new_unpaid(42, 6_000_000, Purpose::WalletTopUp, GatewayKind::Tronado)
            .with_credit(36_000);
        assert_eq!((record.amount, record.credit), (6_000_000, 36_000));
    }
}
