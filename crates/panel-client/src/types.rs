//! Backend-independent account types.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Supported account-management backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Marzban,
    #[serde(alias = "x-ui", alias = "3x-ui")]
    XUi,
    Hiddify,
    Mikrotik,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Marzban => write!(f, "Marzban"),
            BackendKind::XUi => write!(f, "X-UI"),
            BackendKind::Hiddify => write!(f, "Hiddify"),
            BackendKind::Mikrotik => write!(f, "Mikrotik"),
        }
    }
}

/// Operations a backend may or may not offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateAccount,
    GetAccount,
    ModifyAccount,
    DeleteAccount,
    Enable,
    Disable,
    ResetTraffic,
    GetSubscriptionLink,
    GetAccountTemplate,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::CreateAccount => "account creation",
            Capability::GetAccount => "account lookup",
            Capability::ModifyAccount => "account modification",
            Capability::DeleteAccount => "account deletion",
            Capability::Enable => "enabling accounts",
            Capability::Disable => "disabling accounts",
            Capability::ResetTraffic => "traffic reset",
            Capability::GetSubscriptionLink => "subscription links",
            Capability::GetAccountTemplate => "account templates",
        };
        write!(f, "{}", name)
    }
}

/// Connection settings for one backend instance.
///
/// Credentials stay plain strings here so the record can be persisted; they
/// are wrapped in `SecretString` as soon as an adapter is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub name: String,
    pub kind: BackendKind,
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-shared key (Hiddify).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Inbound that new clients are attached to (X-UI).
    #[serde(default)]
    pub inbound_id: Option<u32>,
    /// Public prefix for subscription links, when it differs from `base_url`.
    #[serde(default)]
    pub subscription_base: Option<String>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl PanelConfig {
    pub fn new(name: impl Into<String>, kind: BackendKind, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: base_url.into(),
            username: None,
            password: None,
            api_key: None,
            inbound_id: None,
            subscription_base: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_inbound(mut self, inbound_id: u32) -> Self {
        self.inbound_id = Some(inbound_id);
        self
    }
}

/// Proof of authentication, obtained from `PanelAdapter::authenticate`.
///
/// Sessions are short-lived values; callers authenticate again for every
/// operation batch instead of caching them.
#[derive(Debug, Clone)]
pub enum PanelSession {
    Bearer(SecretString),
    Cookie(SecretString),
    Basic {
        username: String,
        password: SecretString,
    },
    ApiKey(SecretString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
    Limited,
    Expired,
    OnHold,
}

/// Periodic traffic reset a backend applies on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStrategy {
    #[default]
    NoReset,
    Day,
    Week,
    Month,
    Year,
}

/// An account as seen through an adapter.
///
/// Limits and usage are bytes, `expire` is epoch seconds, and zero means
/// unlimited for both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelAccount {
    pub username: String,
    pub status: AccountStatus,
    pub data_limit: u64,
    pub used_traffic: u64,
    pub expire: i64,
    pub subscription_url: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub online_at: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountRequest {
    pub username: String,
    /// Bytes, zero for unlimited.
    pub data_limit: u64,
    /// Days from now, zero for unlimited.
    pub expire_days: u32,
    /// Protocol to inbound tags.
    pub inbounds: BTreeMap<String, Vec<String>>,
    pub note: Option<String>,
    pub reset_strategy: ResetStrategy,
}

impl CreateAccountRequest {
    pub fn new(username: impl Into<String>, data_limit: u64, expire_days: u32) -> Self {
        Self {
            username: username.into(),
            data_limit,
            expire_days,
            inbounds: BTreeMap::new(),
            note: None,
            reset_strategy: ResetStrategy::NoReset,
        }
    }

    /// Absolute expiry for this request, given the current time.
    pub fn expire_at(&self, now: i64) -> i64 {
        if self.expire_days == 0 {
            0
        } else {
            now + i64::from(self.expire_days) * SECONDS_PER_DAY
        }
    }
}

/// Fields to change on an existing account. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyAccountRequest {
    pub data_limit: Option<u64>,
    /// Absolute epoch seconds, zero for unlimited.
    pub expire: Option<i64>,
    pub note: Option<String>,
}

/// Inbound selection a backend offers for new accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTemplate {
    pub inbounds: BTreeMap<String, Vec<String>>,
}

/// Parse the timestamp formats backends use for "last seen" into epoch seconds.
pub(crate) fn parse_timestamp(text: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.and_utc().timestamp())
}
