//! In-process fakes for gateways, panels and notifications.

use crate::error::SettlementError;
use crate::notify::{Notice, Notifier};
use crate::provisioning::AdapterFactory;
use async_trait::async_trait;
use gateway_client::{
    CallbackData, CallbackPayload, CallbackStatus, GatewayError, GatewayKind, PaymentGateway,
    PaymentRequest, PaymentResult, VerifyRequest, VerifyResult,
};
use panel_client::{
    AccountStatus, BackendKind, CreateAccountRequest, ModifyAccountRequest, PanelAccount,
    PanelAdapter, PanelConfig, PanelError, PanelSession,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Gateway whose verification answer is scripted per token.
///
/// Callback payloads are JSON objects with `order_id`, `token`, `status`
/// (`"ok"` for success) and optional `amount`.
pub struct FakeGateway {
    kind: GatewayKind,
    verdicts: Mutex<HashMap<String, Result<VerifyResult, u16>>>,
    pub verify_calls: Mutex<Vec<VerifyRequest>>,
}

impl FakeGateway {
    pub fn new(kind: GatewayKind) -> Self {
        Self {
            kind,
            verdicts: Mutex::new(HashMap::new()),
            verify_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn verify_as(&self, token: &str, result: VerifyResult) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(token.to_string(), Ok(result));
    }

    /// Make verification of `token` fail with an HTTP status.
    pub fn fail_with(&self, token: &str, status: u16) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(token.to_string(), Err(status));
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, GatewayError> {
        Ok(PaymentResult {
            payment_url: format!("https://pay.test/{}", request.order_id),
            correlation_token: format!("T-{}", request.order_id),
        })
    }

    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError> {
        self.verify_calls.lock().unwrap().push(request.clone());
        match self.verdicts.lock().unwrap().get(&request.token) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(status)) => Err(GatewayError::Api {
                status: *status,
                message: "scripted failure".into(),
            }),
            None => Ok(VerifyResult::declined("unknown token")),
        }
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError> {
        let token = payload.require("token")?;
        let status = match payload.field("status").as_deref() {
            Some("ok") => CallbackStatus::Success,
            other => CallbackStatus::Failed(other.unwrap_or("missing").to_string()),
        };
        Ok(CallbackData {
            order_id: payload.field("order_id"),
            correlation_token: Some(token.clone()),
            verify_token: token,
            reported_amount: payload.field("amount").and_then(|a| a.parse().ok()),
            status,
        })
    }
}

/// Calls observed by a [`FakePanel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCall {
    Authenticate,
    Get(String),
    Create(CreateAccountRequest),
    Modify(String, ModifyAccountRequest),
    Reset(String),
}

/// Panel backed by a map of accounts.
#[derive(Default)]
pub struct FakePanel {
    pub accounts: Mutex<HashMap<String, PanelAccount>>,
    pub calls: Mutex<Vec<PanelCall>>,
    pub fail_create: bool,
    pub fail_auth: bool,
}

impl FakePanel {
    pub fn with_account(self, account: PanelAccount) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.username.clone(), account);
        self
    }

    pub fn calls(&self) -> Vec<PanelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PanelCall::Create(_)))
            .count()
    }

    fn record(&self, call: PanelCall) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn account(username: &str, data_limit: u64, expire: i64) -> PanelAccount {
    PanelAccount {
        username: username.to_string(),
        status: AccountStatus::Active,
        data_limit,
        used_traffic: 0,
        expire,
        subscription_url: None,
        links: Vec::new(),
        online_at: None,
        note: None,
    }
}

#[async_trait]
impl PanelAdapter for FakePanel {
    fn kind(&self) -> BackendKind {
        BackendKind::Marzban
    }

    async fn authenticate(&self) -> Result<PanelSession, PanelError> {
        self.record(PanelCall::Authenticate);
        if self.fail_auth {
            return Err(PanelError::AuthenticationFailed {
                backend: BackendKind::Marzban,
                message: "bad credentials".into(),
            });
        }
        Ok(PanelSession::Bearer(SecretString::new("fake-token".into())))
    }

    async fn create_account(
        &self,
        _session: &PanelSession,
        request: &CreateAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        self.record(PanelCall::Create(request.clone()));
        if self.fail_create {
            return Err(PanelError::Api {
                status: 500,
                message: "panel down".into(),
            });
        }
        let mut created = account(&request.username, request.data_limit, 0);
        created.subscription_url = Some(format!("https://sub.test/{}", request.username));
        self.accounts
            .lock()
            .unwrap()
            .insert(request.username.clone(), created.clone());
        Ok(created)
    }

    async fn get_account(
        &self,
        _session: &PanelSession,
        username: &str,
    ) -> Result<Option<PanelAccount>, PanelError> {
        self.record(PanelCall::Get(username.to_string()));
        Ok(self.accounts.lock().unwrap().get(username).cloned())
    }

    async fn modify_account(
        &self,
        _session: &PanelSession,
        username: &str,
        request: &ModifyAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        self.record(PanelCall::Modify(username.to_string(), request.clone()));
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| PanelError::AccountNotFound(username.to_string()))?;
        if let Some(limit) = request.data_limit {
            account.data_limit = limit;
        }
        if let Some(expire) = request.expire {
            account.expire = expire;
        }
        Ok(account.clone())
    }

    async fn reset_traffic(&self, _session: &PanelSession, username: &str) -> Result<(), PanelError> {
        self.record(PanelCall::Reset(username.to_string()));
        Ok(())
    }
}

/// Hands out the same [`FakePanel`] for every configuration.
pub struct FakeFactory(pub Arc<FakePanel>);

impl AdapterFactory for FakeFactory {
    fn connect(&self, _config: &PanelConfig) -> Result<Arc<dyn PanelAdapter>, PanelError> {
        Ok(self.0.clone())
    }
}

/// Notifier that records every notice it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), SettlementError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
