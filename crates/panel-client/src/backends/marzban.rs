//! Marzban: bearer-token REST API with byte and epoch-second fields.

use super::{base_url, check, credentials, http_client, now};
use crate::adapter::PanelAdapter;
use crate::error::PanelError;
use crate::types::{
    parse_timestamp, AccountStatus, AccountTemplate, BackendKind, CreateAccountRequest,
    ModifyAccountRequest, PanelAccount, PanelConfig, PanelSession,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

pub struct Marzban {
    client: Client,
    base_url: String,
    username: String,
    password: SecretString,
    subscription_base: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct User {
    username: String,
    status: String,
    #[serde(default)]
    used_traffic: u64,
    data_limit: Option<u64>,
    expire: Option<i64>,
    #[serde(default)]
    links: Vec<String>,
    subscription_url: Option<String>,
    online_at: Option<String>,
    note: Option<String>,
}

#[derive(Deserialize)]
struct Inbound {
    tag: String,
}

impl Marzban {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        let (username, password) = credentials(config)?;
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(config),
            username,
            password,
            subscription_base: config
                .subscription_base
                .as_ref()
                .map(|s| s.trim_end_matches('/').to_string()),
        })
    }

    fn token<'a>(&self, session: &'a PanelSession) -> Result<&'a str, PanelError> {
        match session {
            PanelSession::Bearer(token) => Ok(token.expose_secret().as_str()),
            _ => Err(PanelError::SessionMismatch(BackendKind::Marzban)),
        }
    }

    fn user_url(&self, username: &str) -> String {
        format!("{}/api/user/{}", self.base_url, username)
    }

    fn normalize(&self, user: User) -> PanelAccount {
        let status = match user.status.as_str() {
            "active" => AccountStatus::Active,
            "limited" => AccountStatus::Limited,
            "expired" => AccountStatus::Expired,
            "on_hold" => AccountStatus::OnHold,
            _ => AccountStatus::Disabled,
        };
        // Marzban returns relative subscription paths unless XRAY_SUBSCRIPTION_URL_PREFIX is set.
        let subscription_url = user.subscription_url.map(|url| {
            if url.starts_with('/') {
                let prefix = self.subscription_base.as_deref().unwrap_or(&self.base_url);
                format!("{}{}", prefix, url)
            } else {
                url
            }
        });

        PanelAccount {
            username: user.username,
            status,
            data_limit: user.data_limit.unwrap_or(0),
            used_traffic: user.used_traffic,
            expire: user.expire.unwrap_or(0),
            subscription_url,
            links: user.links,
            online_at: user.online_at.as_deref().and_then(parse_timestamp),
            note: user.note.filter(|n| !n.is_empty()),
        }
    }

    async fn put_user(&self, token: &str, username: &str, body: &Value) -> Result<PanelAccount, PanelError> {
        let response = self
            .client
            .put(self.user_url(username))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let user: User = check(response).await?.json().await?;
        Ok(self.normalize(user))
    }
}

#[async_trait]
impl PanelAdapter for Marzban {
    fn kind(&self) -> BackendKind {
        BackendKind::Marzban
    }

    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<PanelSession, PanelError> {
        let response = self
            .client
            .post(format!("{}/api/admin/token", self.base_url))
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.expose_secret().as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PanelError::AuthenticationFailed {
                backend: BackendKind::Marzban,
                message: format!("token request returned {}", response.status()),
            });
        }
        let token: TokenResponse = response.json().await?;
        debug!("Marzban token issued");
        Ok(PanelSession::Bearer(SecretString::new(token.access_token)))
    }

    #[instrument(skip(self, session, request), fields(username = %request.username))]
    async fn create_account(
        &self,
        session: &PanelSession,
        request: &CreateAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let token = self.token(session)?;

        let mut proxies = Map::new();
        for protocol in request.inbounds.keys() {
            proxies.insert(protocol.clone(), json!({}));
        }
        if proxies.is_empty() {
            proxies.insert("vless".into(), json!({}));
        }

        let body = json!({
            "username": request.username,
            "proxies": proxies,
            "inbounds": request.inbounds,
            "expire": request.expire_at(now()),
            "data_limit": request.data_limit,
            "data_limit_reset_strategy": request.reset_strategy,
            "note": request.note.clone().unwrap_or_default(),
            "status": "active",
        });

        let response = self
            .client
            .post(format!("{}/api/user", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let user: User = check(response).await?.json().await?;
        info!("Marzban account created");
        Ok(self.normalize(user))
    }

    #[instrument(skip(self, session))]
    async fn get_account(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<Option<PanelAccount>, PanelError> {
        let token = self.token(session)?;
        let response = self
            .client
            .get(self.user_url(username))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user: User = check(response).await?.json().await?;
        Ok(Some(self.normalize(user)))
    }

    #[instrument(skip(self, session, request))]
    async fn modify_account(
        &self,
        session: &PanelSession,
        username: &str,
        request: &ModifyAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let token = self.token(session)?;

        let mut body = Map::new();
        if let Some(expire) = request.expire {
            body.insert("expire".into(), json!(expire));
        }
        if let Some(limit) = request.data_limit {
            body.insert("data_limit".into(), json!(limit));
        }
        if let Some(note) = &request.note {
            body.insert("note".into(), json!(note));
        }

        self.put_user(token, username, &Value::Object(body)).await
    }

    #[instrument(skip(self, session))]
    async fn delete_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let token = self.token(session)?;
        let response = self
            .client
            .delete(self.user_url(username))
            .bearer_auth(token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn enable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let token = self.token(session)?;
        self.put_user(token, username, &json!({ "status": "active" }))
            .await
            .map(|_| ())
    }

    async fn disable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let token = self.token(session)?;
        self.put_user(token, username, &json!({ "status": "disabled" }))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, session))]
    async fn reset_traffic(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let token = self.token(session)?;
        let response = self
            .client
            .post(format!("{}/reset", self.user_url(username)))
            .bearer_auth(token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn get_subscription_link(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<String, PanelError> {
        self.get_account(session, username)
            .await?
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))?
            .subscription_url
            .ok_or_else(|| PanelError::InvalidResponse("user has no subscription_url".into()))
    }

    async fn get_account_template(&self, session: &PanelSession) -> Result<AccountTemplate, PanelError> {
        let token = self.token(session)?;
        let response = self
            .client
            .get(format!("{}/api/inbounds", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        let inbounds: BTreeMap<String, Vec<Inbound>> = check(response).await?.json().await?;

        Ok(AccountTemplate {
            inbounds: inbounds
                .into_iter()
                .map(|(protocol, list)| (protocol, list.into_iter().map(|i| i.tag).collect()))
                .collect(),
        })
    }
}
