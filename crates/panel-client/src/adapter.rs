//! The uniform account lifecycle every backend is driven through.

use crate::backends::{Hiddify, Marzban, Mikrotik, XUi};
use crate::error::PanelError;
use crate::types::{
    AccountTemplate, BackendKind, Capability, CreateAccountRequest, ModifyAccountRequest,
    PanelAccount, PanelConfig, PanelSession,
};
use async_trait::async_trait;
use std::sync::Arc;

/// An account-management backend.
///
/// `authenticate` must be called first; its session is passed to every other
/// operation. Backends override only the operations they support, the rest
/// return [`PanelError::Unsupported`].
#[async_trait]
pub trait PanelAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn authenticate(&self) -> Result<PanelSession, PanelError>;

    async fn create_account(
        &self,
        _session: &PanelSession,
        _request: &CreateAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::CreateAccount))
    }

    /// Look an account up. `Ok(None)` means the backend has no such user.
    async fn get_account(
        &self,
        _session: &PanelSession,
        _username: &str,
    ) -> Result<Option<PanelAccount>, PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::GetAccount))
    }

    async fn modify_account(
        &self,
        _session: &PanelSession,
        _username: &str,
        _request: &ModifyAccountRequest,
    ) -> Result<PanelAccount, PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::ModifyAccount))
    }

    async fn delete_account(&self, _session: &PanelSession, _username: &str) -> Result<(), PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::DeleteAccount))
    }

    async fn enable_account(&self, _session: &PanelSession, _username: &str) -> Result<(), PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::Enable))
    }

    async fn disable_account(&self, _session: &PanelSession, _username: &str) -> Result<(), PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::Disable))
    }

    async fn reset_traffic(&self, _session: &PanelSession, _username: &str) -> Result<(), PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::ResetTraffic))
    }

    async fn get_subscription_link(
        &self,
        _session: &PanelSession,
        _username: &str,
    ) -> Result<String, PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::GetSubscriptionLink))
    }

    async fn get_account_template(&self, _session: &PanelSession) -> Result<AccountTemplate, PanelError> {
        Err(PanelError::unsupported(self.kind(), Capability::GetAccountTemplate))
    }
}

/// Build the adapter for a configured backend.
pub fn connect(config: &PanelConfig) -> Result<Arc<dyn PanelAdapter>, PanelError> {
    let adapter: Arc<dyn PanelAdapter> = match config.kind {
        BackendKind::Marzban => Arc::new(Marzban::new(config)?),
        BackendKind::XUi => Arc::new(XUi::new(config)?),
        BackendKind::Hiddify => Arc::new(Hiddify::new(config)?),
        BackendKind::Mikrotik => Arc::new(Mikrotik::new(config)?),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_dispatches_on_kind() {
        for kind in [
            BackendKind::Marzban,
            BackendKind::XUi,
            BackendKind::Hiddify,
            BackendKind::Mikrotik,
        ] {
            let config = PanelConfig::new("p", kind, "http://127.0.0.1:1")
                .with_credentials("admin", "secret")
                .with_api_key("key")
                .with_inbound(1);
            assert_eq!(connect(&config).unwrap().kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_unsupported_capability_is_typed() {
        let config = PanelConfig::new("router", BackendKind::Mikrotik, "http://127.0.0.1:1")
            .with_credentials("admin", "secret");
        let adapter = connect(&config).unwrap();
        let session = PanelSession::Basic {
            username: "admin".into(),
            password: secrecy::SecretString::new("secret".into()),
        };

        let err = adapter
            .reset_traffic(&session, "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PanelError::Unsupported {
                backend: BackendKind::Mikrotik,
                capability: Capability::ResetTraffic
            }
        ));
    }
}
