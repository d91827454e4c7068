//! Mikrotik RouterOS user-manager over the REST API.
//!
//! Limits and validity are governed by user-manager profiles on the router,
//! so this backend only creates, inspects, removes and toggles users.

use super::{base_url, check, credentials, http_client};
use crate::adapter::PanelAdapter;
use crate::error::PanelError;
use crate::types::{
    AccountStatus, BackendKind, CreateAccountRequest, PanelAccount, PanelConfig, PanelSession,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

pub struct Mikrotik {
    client: Client,
    base_url: String,
    username: String,
    password: SecretString,
}

#[derive(Deserialize)]
struct User {
    #[serde(rename = ".id")]
    id: String,
    name: String,
    #[serde(default)]
    disabled: String,
    comment: Option<String>,
}

impl Mikrotik {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        let (username, password) = credentials(config)?;
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(config),
            username,
            password,
        })
    }

    fn authed(&self, request: RequestBuilder, session: &PanelSession) -> Result<RequestBuilder, PanelError> {
        match session {
            PanelSession::Basic { username, password } => {
                Ok(request.basic_auth(username, Some(password.expose_secret())))
            }
            _ => Err(PanelError::SessionMismatch(BackendKind::Mikrotik)),
        }
    }

    async fn find_user(&self, session: &PanelSession, username: &str) -> Result<Option<User>, PanelError> {
        let request = self
            .client
            .get(format!("{}/rest/user-manager/user", self.base_url))
            .query(&[("name", username)]);
        let response = self.authed(request, session)?.send().await?;
        let users: Vec<User> = check(response).await?.json().await?;
        Ok(users.into_iter().find(|u| u.name == username))
    }

    async fn set_disabled(&self, session: &PanelSession, username: &str, disabled: bool) -> Result<(), PanelError> {
        let user = self
            .find_user(session, username)
            .await?
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))?;
        let request = self
            .client
            .patch(format!("{}/rest/user-manager/user/{}", self.base_url, user.id))
            .json(&json!({ "disabled": if disabled { "true" } else { "false" } }));
        check(self.authed(request, session)?.send().await?).await?;
        Ok(())
    }

    fn normalize(user: User) -> PanelAccount {
        let disabled = matches!(user.disabled.as_str(), "true" | "yes");
        PanelAccount {
            username: user.name,
            status: if disabled {
                AccountStatus::Disabled
            } else {
                AccountStatus::Active
            },
            data_limit: 0,
            used_traffic: 0,
            expire: 0,
            subscription_url: None,
            links: Vec::new(),
            online_at: None,
            note: user.comment.filter(|c| !c.is_empty()),
        }
    }
}

#[async_trait]
impl PanelAdapter for Mikrotik {
    fn kind(&self) -> BackendKind {
        BackendKind::Mikrotik
    }

    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<PanelSession, PanelError> {
        let session = PanelSession::Basic {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        let request = self
            .client
            .get(format!("{}/rest/system/resource", self.base_url));
        let response = self.authed(request, &session)?.send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PanelError::AuthenticationFailed {
                backend: BackendKind::Mikrotik,
                message: "credentials rejected".into(),
            });
        }
        check(response).await?;
        Ok(session)
    }

    #[instrument(skip(self, session, request), fields(username = %request.username))]
    async fn create_account(
        &self,
        session: &PanelSession,
        request: &CreateAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        let password = uuid::Uuid::new_v4().simple().to_string();
        let body = json!({
            "name": request.username,
            "password": &password[..12],
            "comment": request.note.clone().unwrap_or_default(),
        });

        let put = self
            .client
            .put(format!("{}/rest/user-manager/user", self.base_url))
            .json(&body);
        let user: User = check(self.authed(put, session)?.send().await?)
            .await?
            .json()
            .await?;
        info!("Mikrotik user created");
        Ok(Self::normalize(user))
    }

    async fn get_account(
        &self,
        session: &PanelSession,
        username: &str,
    ) -> Result<Option<PanelAccount>, PanelError> {
        Ok(self.find_user(session, username).await?.map(Self::normalize))
    }

    async fn delete_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        let user = self
            .find_user(session, username)
            .await?
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))?;
        let request = self
            .client
            .delete(format!("{}/rest/user-manager/user/{}", self.base_url, user.id));
        check(self.authed(request, session)?.send().await?).await?;
        Ok(())
    }

    async fn enable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        self.set_disabled(session, username, false).await
    }

    async fn disable_account(&self, session: &PanelSession, username: &str) -> Result<(), PanelError> {
        self.set_disabled(session, username, true).await
    }
}
