//! X-UI (3x-ui): session-cookie API where accounts are clients of an inbound.
//!
//! Expiry is epoch milliseconds on the wire. Client settings travel as a JSON
//! document encoded inside a string field.

use super::{base_url, check, credentials, http_client, now};
use crate::adapter::PanelAdapter;
use crate::error::PanelError;
use crate::types::{
    AccountStatus, BackendKind, CreateAccountRequest, ModifyAccountRequest, PanelAccount,
    PanelConfig, PanelSession,
};
use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

pub struct XUi {
    client: Client,
    base_url: String,
    username: String,
    password: SecretString,
    inbound_id: u32,
    subscription_base: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    obj: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientTraffic {
    email: String,
    enable: bool,
    #[serde(default)]
    up: u64,
    #[serde(default)]
    down: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    expiry_time: i64,
}

/// Stable subscription id derived from the username.
fn sub_id(username: &str) -> String {
    let digest = Sha256::digest(username.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn millis(seconds: i64) -> i64 {
    seconds.saturating_mul(1000)
}

impl XUi {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        let (username, password) = credentials(config)?;
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(config),
            username,
            password,
            inbound_id: config
                .inbound_id
                .ok_or(PanelError::ConfigurationMissing("inbound_id"))?,
            subscription_base: config
                .subscription_base
                .as_ref()
                .map(|s| s.trim_end_matches('/').to_string()),
        })
    }

    fn cookie<'a>(&self, session: &'a PanelSession) -> Result<&'a str, PanelError> {
        match session {
            PanelSession::Cookie(cookie) => Ok(cookie.expose_secret().as_str()),
            _ => Err(PanelError::SessionMismatch(BackendKind::XUi)),
        }
    }

    fn subscription_url(&self, username: &str) -> String {
        match &self.subscription_base {
            Some(base) => format!("{}/{}", base, sub_id(username)),
            None => format!("{}/sub/{}", self.base_url, sub_id(username)),
        }
    }

    /// Send a request and unwrap the `{success, msg, obj}` envelope.
    async fn call(&self, request: RequestBuilder, cookie: &str) -> Result<Value, PanelError> {
        let response = request.header(COOKIE, cookie).send().await?;
        let envelope: Envelope = check(response).await?.json().await?;
        if !envelope.success {
            return Err(PanelError::Api {
                status: 200,
                message: envelope.msg,
            });
        }
        Ok(envelope.obj)
    }

    fn settings(client: &Value) -> Result<String, PanelError> {
        Ok(serde_json::to_string(&json!({ "clients": [client] }))?)
    }

    /// Find the stored client entry for `username` inside the inbound settings.
    async fn find_client(&self, cookie: &str, username: &str) -> Result<Value, PanelError> {
        let inbound = self
            .call(
                self.client.get(format!(
                    "{}/panel/api/inbounds/get/{}",
                    self.base_url, self.inbound_id
                )),
                cookie,
            )
            .await?;
        let settings = inbound
            .get("settings")
            .and_then(Value::as_str)
            .ok_or_else(|| PanelError::InvalidResponse("inbound has no settings".into()))?;
        let settings: Value = serde_json::from_str(settings)?;

        settings
            .get("clients")
            .and_then(Value::as_array)
            .and_then(|clients| {
                clients
                    .iter()
                    .find(|c| c.get("email").and_then(Value::as_str) == Some(username))
            })
            .cloned()
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))
    }

    fn client_id(client: &Value) -> Result<String, PanelError> {
        client
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| PanelError::InvalidResponse("client has no id".into()))
    }

    async fn update_client(&self, cookie: &str, client: &Value) -> Result<(), PanelError> {
        let id = Self::client_id(client)?;
        self.call(
            self.client
                .post(format!(
                    "{}/panel/api/inbounds/updateClient/{}",
                    self.base_url, id
                ))
                .json(&json!({ "id": self.inbound_id, "settings": Self::settings(client)? })),
            cookie,
        )
        .await?;
        Ok(())
    }

    async fn set_enabled(&self, session: &PanelSession, username: &str, enable: bool) -> Result<(), PanelError> {
        let cookie = self.cookie(session)?;
        let mut client = self.find_client(cookie, username).await?;
        client["enable"] = json!(enable);
        self.update_client(cookie, &client).await
    }

    async fn fetch(&self, session: &PanelSession, username: &str) -> Result<PanelAccount, PanelError> {
        self.get_account(session, username)
            .await?
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))
    }

    fn normalize(&self, traffic: ClientTraffic) -> PanelAccount {
        let used = traffic.up + traffic.down;
        // Negative expiry means "starts on first use" in 3x-ui.
        let expire = if traffic.expiry_time > 0 {
            traffic.expiry_time / 1000
        } else {
            0
        };
        let status = if !traffic.enable {
            AccountStatus::Disabled
        } else if traffic.total > 0 && used >= traffic.total {
            AccountStatus::Limited
        } else if expire > 0 && expire < now() {
            AccountStatus::Expired
        } else if traffic.expiry_time < 0 {
            AccountStatus::OnHold
        } else {
            AccountStatus::Active
        };

        PanelAccount {
            subscription_url: Some(self.subscription_url(&traffic.email)),
            username: traffic.email,
            status,
            data_limit: traffic.total,
            used_traffic: used,
            expire,
            links: Vec::new(),
            online_at: None,
            note: None,
        }
    }
}

#[async_trait]
impl PanelAdapter for XUi {
    fn kind(&self) -> BackendKind {
        BackendKind::XUi
    }

    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<PanelSession, PanelError> {
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.expose_secret().as_str()),
            ])
            .send()
            .await?;

        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        let envelope: Envelope = check(response).await?.json().await?;
        if !envelope.success || cookie.is_empty() {
            return Err(PanelError::AuthenticationFailed {
                backend: BackendKind::XUi,
                message: if envelope.msg.is_empty() {
                    "no session cookie".into()
                } else {
                    envelope.msg
                },
            });
        }
        debug!("X-UI session established");
        Ok(PanelSession::Cookie(SecretString::new(cookie)))
    }

    #[instrument(skip(self, session, request), fields(username = %request.username))]
    async fn create_account(
        &self,
        session: &PanelSession,
        request: &CreateAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let cookie = self.cookie(session)?;
        let client = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "email": request.username,
            "enable": true,
            "limitIp": 0,
            "totalGB": request.data_limit,
            "expiryTime": millis(request.expire_at(now())),
            "tgId": "",
            "subId": sub_id(&request.username),
            "comment": request.note.clone().unwrap_or_default(),
            "reset": 0,
        });

        self.call(
            self.client
                .post(format!("{}/panel/api/inbounds/addClient", self.base_url))
                .json(&json!({ "id": self.inbound_id, "settings": Self::settings(&client)? })),
            cookie,
        )
        .await?;
        info!(inbound_id = self.inbound_id, "X-UI client created");

        self.fetch(session, &request.username).await
    }

    #[instrument(skip(self, session))]
    async fn get_account(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<Option<PanelAccount>, PanelError> {
        let cookie = self.cookie(session)?;
        let obj = self
            .call(
                self.client.get(format!(
                    "{}/panel/api/inbounds/getClientTraffics/{}",
                    self.base_url, username
                )),
                cookie,
            )
            .await?;

        if obj.is_null() {
            return Ok(None);
        }
        let traffic: ClientTraffic = serde_json::from_value(obj)?;
        Ok(Some(self.normalize(traffic)))
    }

    #[instrument(skip(self, session, request))]
    async fn modify_account(
        &self,
        session: &PanelSession,
        username: &str,
        request: &ModifyAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let cookie = self.cookie(session)?;
        let mut client = self.find_client(cookie, username).await?;
        if let Some(limit) = request.data_limit {
            client["totalGB"] = json!(limit);
        }
        if let Some(expire) = request.expire {
            client["expiryTime"] = json!(millis(expire));
        }
        if let Some(note) = &request.note {
            client["comment"] = json!(note);
        }
        self.update_client(cookie, &client).await?;

        self.fetch(session, username).await
    }

    #[instrument(skip(self, session))]
    async fn delete_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let cookie = self.cookie(session)?;
        let client = self.find_client(cookie, username).await?;
        let id = Self::client_id(&client)?;
        self.call(
            self.client.post(format!(
                "{}/panel/api/inbounds/{}/delClient/{}",
                self.base_url, self.inbound_id, id
            )),
            cookie,
        )
        .await?;
        Ok(())
    }

    async fn enable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        self.set_enabled(session, username, true).await
    }

    async fn disable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        self.set_enabled(session, username, false).await
    }

    #[instrument(skip(self, session))]
    async fn reset_traffic(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let cookie = self.cookie(session)?;
        self.call(
            self.client.post(format!(
                "{}/panel/api/inbounds/{}/resetClientTraffic/{}",
                self.base_url, self.inbound_id, username
            )),
            cookie,
        )
        .await?;
        Ok(())
    }

    async fn get_subscription_link(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<String, PanelError> {
        let account = self.fetch(session, username).await?;
        Ok(self.subscription_url(&account.username))
    }
}
