//! Hiddify: API-key REST API measuring limits in gigabytes and validity as
//! `package_days` counted from a `start_date`.

use super::{base_url, check, http_client, now};
use crate::adapter::PanelAdapter;
use crate::error::PanelError;
use crate::types::{
    parse_timestamp, AccountStatus, BackendKind, CreateAccountRequest, ModifyAccountRequest,
    PanelAccount, PanelConfig, PanelSession, ResetStrategy, BYTES_PER_GB, SECONDS_PER_DAY,
};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

const API_KEY_HEADER: &str = "Hiddify-API-Key";
/// Hiddify has no "unlimited"; these stand in for it.
const UNLIMITED_GB: f64 = 1_000_000.0;
const UNLIMITED_DAYS: i64 = 10_000;

pub struct Hiddify {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    subscription_base: String,
}

#[derive(Deserialize)]
#[allow(non_snake_case)]
struct User {
    uuid: String,
    name: String,
    #[serde(default)]
    usage_limit_GB: f64,
    #[serde(default)]
    current_usage_GB: f64,
    #[serde(default)]
    package_days: i64,
    start_date: Option<String>,
    #[serde(default = "default_enable")]
    enable: bool,
    last_online: Option<String>,
    comment: Option<String>,
}

fn default_enable() -> bool {
    true
}

fn gb_to_bytes(gb: f64) -> u64 {
    if gb <= 0.0 || gb >= UNLIMITED_GB {
        0
    } else {
        (gb * BYTES_PER_GB as f64).round() as u64
    }
}

fn bytes_to_gb(bytes: u64) -> f64 {
    if bytes == 0 {
        UNLIMITED_GB
    } else {
        bytes as f64 / BYTES_PER_GB as f64
    }
}

fn mode(strategy: ResetStrategy) -> &'static str {
    match strategy {
        ResetStrategy::Day => "daily",
        ResetStrategy::Week => "weekly",
        ResetStrategy::Month => "monthly",
        ResetStrategy::NoReset | ResetStrategy::Year => "no_reset",
    }
}

fn midnight(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
        .unwrap_or(0)
}

/// Convert an absolute expiry into `(start_date, package_days)` counted from today.
fn package_from_expire(expire: i64, now: i64) -> (String, i64) {
    let today = Utc
        .timestamp_opt(now, 0)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_default();
    let days = if expire == 0 {
        UNLIMITED_DAYS
    } else {
        let remaining = (expire - midnight(today)).max(0);
        (remaining + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    };
    (today.format("%Y-%m-%d").to_string(), days)
}

impl Hiddify {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        let base_url = base_url(config);
        Ok(Self {
            client: http_client(config)?,
            subscription_base: config
                .subscription_base
                .as_ref()
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| base_url.clone()),
            base_url,
            api_key: config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .map(SecretString::new),
        })
    }

    fn key<'a>(&self, session: &'a PanelSession) -> Result<&'a str, PanelError> {
        match session {
            PanelSession::ApiKey(key) => Ok(key.expose_secret().as_str()),
            _ => Err(PanelError::SessionMismatch(BackendKind::Hiddify)),
        }
    }

    fn user_url(&self, uuid: &str) -> String {
        format!("{}/admin/user/{}/", self.base_url, uuid)
    }

    async fn find_user(&self, key: &str, username: &str) -> Result<Option<User>, PanelError> {
        let response = self
            .client
            .get(format!("{}/admin/user/", self.base_url))
            .header(API_KEY_HEADER, key)
            .send()
            .await?;
        let users: Vec<User> = check(response).await?.json().await?;
        Ok(users.into_iter().find(|u| u.name == username))
    }

    async fn require_user(&self, key: &str, username: &str) -> Result<User, PanelError> {
        self.find_user(key, username)
            .await?
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))
    }

    async fn patch(&self, key: &str, uuid: &str, body: Value) -> Result<User, PanelError> {
        let response = self
            .client
            .patch(self.user_url(uuid))
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    fn normalize(&self, user: User) -> PanelAccount {
        let now = now();
        let (expire, started) = match user
            .start_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        {
            Some(start) if user.package_days < UNLIMITED_DAYS => {
                (midnight(start) + user.package_days * SECONDS_PER_DAY, true)
            }
            Some(_) => (0, true),
            // Not used yet: the package starts counting on first connection.
            None => (now + user.package_days * SECONDS_PER_DAY, false),
        };
        let data_limit = gb_to_bytes(user.usage_limit_GB);
        let used_traffic = gb_to_bytes(user.current_usage_GB);

        let status = if !user.enable {
            AccountStatus::Disabled
        } else if !started {
            AccountStatus::OnHold
        } else if data_limit > 0 && used_traffic >= data_limit {
            AccountStatus::Limited
        } else if expire > 0 && expire < now {
            AccountStatus::Expired
        } else {
            AccountStatus::Active
        };

        PanelAccount {
            subscription_url: Some(format!("{}/{}/", self.subscription_base, user.uuid)),
            username: user.name,
            status,
            data_limit,
            used_traffic,
            expire,
            links: Vec::new(),
            online_at: user.last_online.as_deref().and_then(parse_timestamp),
            note: user.comment.filter(|c| !c.is_empty()),
        }
    }
}

#[async_trait]
impl PanelAdapter for Hiddify {
    fn kind(&self) -> BackendKind {
        BackendKind::Hiddify
    }

    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<PanelSession, PanelError> {
        let key = self
            .api_key
            .clone()
            .ok_or(PanelError::ConfigurationMissing("api_key"))?;

        let response = self
            .client
            .get(format!("{}/admin/me/", self.base_url))
            .header(API_KEY_HEADER, key.expose_secret())
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PanelError::AuthenticationFailed {
                    backend: BackendKind::Hiddify,
                    message: "API key rejected".into(),
                })
            }
            _ => {
                check(response).await?;
                Ok(PanelSession::ApiKey(key))
            }
        }
    }

    #[instrument(skip(self, session, request), fields(username = %request.username))]
    async fn create_account(
        &self,
        session: &PanelSession,
        request: &CreateAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let key = self.key(session)?;
        let days = if request.expire_days == 0 {
            UNLIMITED_DAYS
        } else {
            i64::from(request.expire_days)
        };
        let body = json!({
            "uuid": uuid::Uuid::new_v4().to_string(),
            "name": request.username,
            "usage_limit_GB": bytes_to_gb(request.data_limit),
            "package_days": days,
            "mode": mode(request.reset_strategy),
            "comment": request.note.clone().unwrap_or_default(),
            "enable": true,
        });

        let response = self
            .client
            .post(format!("{}/admin/user/", self.base_url))
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await?;
        let user: User = check(response).await?.json().await?;
        info!("Hiddify account created");
        Ok(self.normalize(user))
    }

    async fn get_account(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<Option<PanelAccount>, PanelError> {
        let key = self.key(session)?;
        Ok(self
            .find_user(key, username)
            .await?
            .map(|user| self.normalize(user)))
    }

    #[instrument(skip(self, session, request))]
    async fn modify_account(
        &self,
        session: &PanelSession,
        username: &str,
        request: &ModifyAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let key = self.key(session)?;
        let user = self.require_user(key, username).await?;

        let mut body = Map::new();
        if let Some(expire) = request.expire {
            let (start_date, days) = package_from_expire(expire, now());
            body.insert("start_date".into(), json!(start_date));
            body.insert("package_days".into(), json!(days));
        }
        if let Some(limit) = request.data_limit {
            body.insert("usage_limit_GB".into(), json!(bytes_to_gb(limit)));
        }
        if let Some(note) = &request.note {
            body.insert("comment".into(), json!(note));
        }

        let user = self.patch(key, &user.uuid, Value::Object(body)).await?;
        Ok(self.normalize(user))
    }

    async fn delete_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let key = self.key(session)?;
        let user = self.require_user(key, username).await?;
        let response = self
            .client
            .delete(self.user_url(&user.uuid))
            .header(API_KEY_HEADER, key)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn enable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let key = self.key(session)?;
        let user = self.require_user(key, username).await?;
        self.patch(key, &user.uuid, json!({ "enable": true })).await?;
        Ok(())
    }

    async fn disable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let key = self.key(session)?;
        let user = self.require_user(key, username).await?;
        self.patch(key, &user.uuid, json!({ "enable": false })).await?;
        Ok(())
    }

    async fn reset_traffic(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let key = self.key(session)?;
        let user = self.require_user(key, username).await?;
        self.patch(key, &user.uuid, json!({ "current_usage_GB": 0 }))
            .await?;
        Ok(())
    }

    async fn get_subscription_link(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<String, PanelError> {
        let key = self.key(session)?;
        let user = self.require_user(key, username).await?;
        Ok(format!("{}/{}/", self.subscription_base, user.uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(mock_server: &MockServer) -> Hiddify {
        Hiddify::new(
            &PanelConfig::new("fi-1", BackendKind::Hiddify, format!("{}/api/v2", mock_server.uri()))
                .with_api_key("hk-1"),
        )
        .unwrap()
    }

    fn session() -> PanelSession {
        PanelSession::ApiKey(SecretString::new("hk-1".into()))
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(gb_to_bytes(10.0), 10 * BYTES_PER_GB);
        assert_eq!(gb_to_bytes(0.0), 0);
        assert_eq!(gb_to_bytes(UNLIMITED_GB), 0);
        assert_eq!(bytes_to_gb(0), UNLIMITED_GB);
        assert_eq!(bytes_to_gb(5 * BYTES_PER_GB), 5.0);
    }

    #[test]
    fn test_package_from_expire() {
        // 2024-01-01T12:00:00Z
        let now = 1_704_110_400;
        let midnight = 1_704_067_200;
        let (start, days) = package_from_expire(midnight + 30 * SECONDS_PER_DAY, now);
        assert_eq!(start, "2024-01-01");
        assert_eq!(days, 30);

        let (_, days) = package_from_expire(now + 30 * SECONDS_PER_DAY, now);
        assert_eq!(days, 31);

        let (_, days) = package_from_expire(0, now);
        assert_eq!(days, UNLIMITED_DAYS);
    }

    #[tokio::test]
    async fn test_authenticate_checks_admin_endpoint() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/admin/me/"))
            .and(header("Hiddify-API-Key", "hk-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "owner" })))
            .mount(&mock_server)
            .await;

        let session = adapter(&mock_server).authenticate().await.unwrap();
        assert!(matches!(session, PanelSession::ApiKey(_)));
    }

    #[tokio::test]
    async fn test_authenticate_rejected_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/admin/me/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            adapter(&mock_server).authenticate().await,
            Err(PanelError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_account_converts_gigabytes_and_days() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/admin/user/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "uuid": "u-1",
                    "name": "alice",
                    "usage_limit_GB": 20.0,
                    "current_usage_GB": 1.5,
                    "package_days": 30,
                    "start_date": "2100-01-01",
                    "enable": true,
                    "last_online": "2099-12-31 23:00:00",
                    "comment": "agent"
                }
            ])))
            .mount(&mock_server)
            .await;

        let adapter = adapter(&mock_server);
        let account = adapter.get_account(&session(), "alice").await.unwrap().unwrap();
        assert_eq!(account.data_limit, 20 * BYTES_PER_GB);
        assert_eq!(account.used_traffic, 3 * BYTES_PER_GB / 2);
        assert_eq!(account.expire, 4_102_444_800 + 30 * SECONDS_PER_DAY);
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.note.as_deref(), Some("agent"));
        assert!(account.subscription_url.unwrap().ends_with("/u-1/"));

        assert!(adapter.get_account(&session(), "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_account_sends_gigabytes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/admin/user/"))
            .and(body_partial_json(json!({
                "name": "alice",
                "usage_limit_GB": 10.0,
                "package_days": 30,
                "mode": "monthly"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uuid": "u-1",
                "name": "alice",
                "usage_limit_GB": 10.0,
                "current_usage_GB": 0.0,
                "package_days": 30,
                "start_date": null,
                "enable": true
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut request = CreateAccountRequest::new("alice", 10 * BYTES_PER_GB, 30);
        request.reset_strategy = ResetStrategy::Month;

        let account = adapter(&mock_server)
            .create_account(&session(), &request)
            .await
            .unwrap();
        assert_eq!(account.status, AccountStatus::OnHold);
        assert_eq!(account.data_limit, 10 * BYTES_PER_GB);
    }

    #[tokio::test]
    async fn test_template_is_unsupported() {
        let mock_server = MockServer::start().await;
        let err = adapter(&mock_server)
            .get_account_template(&session())
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }
}
