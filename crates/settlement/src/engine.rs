//! Side effects of a verified payment.

use crate::messages;
use crate::notify::{Notice, NotificationQueue};
use crate::provisioning::Provisioner;
use crate::store::Repository;
use crate::types::{PaymentRecord, Purpose, ServiceRecord};
use chrono::Utc;
use gateway_client::GatewayKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the purpose branch of a settlement did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    WalletCredited { balance: u64 },
    Created { service: ServiceRecord },
    Extended {
        username: String,
        expire: i64,
        data_limit: u64,
    },
    /// The payment stays paid; support has to finish the job by hand.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub order_id: String,
    /// Toman value of the payment.
    pub amount: u64,
    pub outcome: ProvisioningOutcome,
    /// Cashback credited on top of the purpose branch, if any.
    pub cashback: Option<u64>,
}

/// Runs the purpose branch, cashback and notifications for a record that
/// has already been marked paid.
pub struct SettlementEngine {
    repo: Arc<dyn Repository>,
    provisioner: Provisioner,
    notices: NotificationQueue,
    cashback: HashMap<GatewayKind, u8>,
    report_chat_id: Option<i64>,
}

impl SettlementEngine {
    pub fn new(repo: Arc<dyn Repository>, provisioner: Provisioner, notices: NotificationQueue) -> Self {
        Self {
            repo,
            provisioner,
            notices,
            cashback: HashMap::new(),
            report_chat_id: None,
        }
    }

    /// Cashback percentage per provider. Missing providers get none.
    pub fn with_cashback(mut self, cashback: HashMap<GatewayKind, u8>) -> Self {
        self.cashback = cashback;
        self
    }

    pub fn with_report_chat(mut self, chat_id: Option<i64>) -> Self {
        self.report_chat_id = chat_id;
        self
    }

    /// Settle a paid record. Never fails: provisioning errors are reported
    /// to the user and the paid status is left in place.
    pub async fn settle(&self, record: &PaymentRecord) -> SettlementReport {
        let order_id = record.order_id.as_str();
        let outcome = self.run_purpose(record).await;

        match &outcome {
            ProvisioningOutcome::Failed { reason } => {
                error!(order_id, user_id = record.user_id, purpose = %record.purpose, "Provisioning failed after payment: {}", reason);
                self.notify(record.user_id, messages::provisioning_failed(order_id));
            }
            ProvisioningOutcome::WalletCredited { balance } => {
                self.notify(record.user_id, messages::wallet_credited(record.credit, *balance));
            }
            ProvisioningOutcome::Created { service } => {
                self.notify(record.user_id, messages::account_created(service));
            }
            ProvisioningOutcome::Extended {
                username,
                expire,
                data_limit,
            } => {
                self.notify(
                    record.user_id,
                    messages::account_extended(username, *expire, *data_limit),
                );
            }
        }

        let cashback = self.apply_cashback(record).await;

        if let Some(message_id) = record.message_id {
            self.notices.enqueue(Notice::DeleteMessage {
                chat_id: record.user_id,
                message_id,
            });
        }

        if let Some(chat_id) = self.report_chat_id {
            self.notify(chat_id, messages::report(record, &outcome));
        }

        info!(order_id, amount = record.amount, credit = record.credit, method = %record.method, "Payment settled");
        SettlementReport {
            order_id: record.order_id.clone(),
            amount: record.credit,
            outcome,
            cashback,
        }
    }

    async fn run_purpose(&self, record: &PaymentRecord) -> ProvisioningOutcome {
        let result = match &record.purpose {
            Purpose::CreateAccount {
                username,
                product_code,
                panel_name,
            } => self
                .provisioner
                .create_account(record.user_id, username, product_code, panel_name, record.credit)
                .await
                .map(|service| ProvisioningOutcome::Created { service }),
            Purpose::ExtendAccount {
                username,
                product_code,
            } => self
                .provisioner
                .extend_account(
                    record.user_id,
                    username,
                    product_code,
                    record.credit,
                    Utc::now().timestamp(),
                )
                .await
                .map(|renewal| ProvisioningOutcome::Extended {
                    username: renewal.service.username,
                    expire: renewal.extension.expire,
                    data_limit: renewal.extension.data_limit,
                }),
            Purpose::WalletTopUp => self
                .repo
                .credit_wallet(record.user_id, record.credit)
                .await
                .map(|balance| ProvisioningOutcome::WalletCredited { balance }),
        };

        result.unwrap_or_else(|e| ProvisioningOutcome::Failed {
            reason: e.to_string(),
        })
    }

    async fn apply_cashback(&self, record: &PaymentRecord) -> Option<u64> {
        let percent = self.cashback.get(&record.method).copied().unwrap_or(0).min(100);
        if percent == 0 {
            return None;
        }
        let bonus = record.credit.saturating_mul(u64::from(percent)) / 100;
        if bonus == 0 {
            return None;
        }

        match self.repo.credit_wallet(record.user_id, bonus).await {
            Ok(balance) => {
                self.notify(record.user_id, messages::cashback(bonus, balance));
                Some(bonus)
            }
            Err(e) => {
                warn!(order_id = %record.order_id, "Cashback credit failed: {}", e);
                None
            }
        }
    }

    fn notify(&self, chat_id: i64, text: String) {
        self.notices.enqueue(Notice::message(chat_id, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::QueueHandle;
    use crate::store::MemoryRepository;
    use crate::testing::{FakeFactory, FakePanel, RecordingNotifier};
    use crate::types::{PanelRecord, PaymentStatus, PendingSelection, Product, User};
    use panel_client::{BackendKind, PanelConfig};

    struct Harness {
        repo: Arc<MemoryRepository>,
        panel: Arc<FakePanel>,
        notifier: Arc<RecordingNotifier>,
        engine: SettlementEngine,
        handle: QueueHandle,
    }

    async fn harness(panel: FakePanel, cashback: u8) -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        repo.upsert_user(User::new(42)).await.unwrap();
        repo.upsert_product(Product {
            code: "p30".into(),
            name: "30 GB".into(),
            volume_gb: 30,
            duration_days: 30,
            price: 10_000,
        })
        .await
        .unwrap();
        repo.upsert_panel(PanelRecord::new(PanelConfig::new(
            "de-1",
            BackendKind::Marzban,
            "http://panel.test",
        )))
        .await
        .unwrap();

        let panel = Arc::new(panel);
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, handle) = NotificationQueue::spawn(notifier.clone(), 32);
        let provisioner = Provisioner::new(repo.clone(), Arc::new(FakeFactory(panel.clone())));
        let engine = SettlementEngine::new(repo.clone(), provisioner, queue)
            .with_cashback(HashMap::from([
                (GatewayKind::ZarinPal, cashback),
                (GatewayKind::Tronado, cashback),
                (GatewayKind::NowPayments, cashback),
            ]))
            .with_report_chat(Some(-100));

        Harness {
            repo,
            panel,
            notifier,
            engine,
            handle,
        }
    }

    fn paid(purpose: Purpose, amount: u64) -> PaymentRecord {
        let mut record = PaymentRecord::new_unpaid(42, amount, purpose, GatewayKind::ZarinPal);
        record.status = PaymentStatus::Paid;
        record
    }

    fn create_alice() -> Purpose {
        Purpose::create(
            "alice",
            &PendingSelection {
                product_code: "p30".into(),
                panel_name: "de-1".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_top_up_credits_wallet() {
        let h = harness(FakePanel::default(), 0).await;
        let mut record = paid(Purpose::WalletTopUp, 10_000);
        record.message_id = Some(9);

        let report = h.engine.settle(&record).await;

        assert_eq!(report.outcome, ProvisioningOutcome::WalletCredited { balance: 10_000 });
        assert_eq!(report.cashback, None);
        assert_eq!(h.repo.get_user(42).await.unwrap().unwrap().balance, 10_000);

        let Harness { handle, notifier, .. } = h;
        assert_eq!(handle.shutdown().await, 3);
        let notices = notifier.notices();
        assert!(matches!(&notices[0], Notice::Message { chat_id: 42, text } if text.contains("10,000")));
        assert_eq!(
            notices[1],
            Notice::DeleteMessage {
                chat_id: 42,
                message_id: 9
            }
        );
        assert!(matches!(&notices[2], Notice::Message { chat_id: -100, .. }));
    }

    #[tokio::test]
    async fn test_cashback_is_independent_credit() {
        let h = harness(FakePanel::default(), 10).await;

        let report = h.engine.settle(&paid(Purpose::WalletTopUp, 10_000)).await;

        assert_eq!(report.cashback, Some(1_000));
        assert_eq!(h.repo.get_user(42).await.unwrap().unwrap().balance, 11_000);
        let Harness { handle, notifier, .. } = h;
        handle.shutdown().await;
        let user_notices = notifier
            .notices()
            .into_iter()
            .filter(|n| matches!(n, Notice::Message { chat_id: 42, .. }))
            .count();
        assert_eq!(user_notices, 2);
    }

    #[tokio::test]
    async fn test_zero_cashback_adds_nothing() {
        let h = harness(FakePanel::default(), 0).await;

        let report = h.engine.settle(&paid(Purpose::WalletTopUp, 10_000)).await;

        assert_eq!(report.cashback, None);
        assert_eq!(h.repo.get_user(42).await.unwrap().unwrap().balance, 10_000);
    }

    #[tokio::test]
    async fn test_create_account_purpose() {
        let h = harness(FakePanel::default(), 0).await;

        let report = h.engine.settle(&paid(create_alice(), 10_000)).await;

        match report.outcome {
            ProvisioningOutcome::Created { service } => assert_eq!(service.username, "alice"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.panel.created(), 1);
        assert_eq!(h.repo.get_user(42).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_reported_not_raised() {
        let h = harness(
            FakePanel {
                fail_create: true,
                ..FakePanel::default()
            },
            0,
        )
        .await;

        let report = h.engine.settle(&paid(create_alice(), 10_000)).await;

        assert!(matches!(report.outcome, ProvisioningOutcome::Failed { .. }));
        assert!(h.repo.get_service("alice").await.unwrap().is_none());

        let Harness { handle, notifier, .. } = h;
        handle.shutdown().await;
        assert!(notifier.notices().iter().any(|n| matches!(
            n,
            Notice::Message { chat_id: 42, text } if text.contains(&report.order_id)
        )));
    }

    #[tokio::test]
    async fn test_underpaid_create_fails_without_account() {
        let h = harness(FakePanel::default(), 0).await;

        let report = h.engine.settle(&paid(create_alice(), 1)).await;

        match &report.outcome {
            ProvisioningOutcome::Failed { reason } => assert!(reason.contains("does not cover")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.panel.created(), 0);
        assert!(h.repo.get_service("alice").await.unwrap().is_none());

        let Harness { handle, notifier, .. } = h;
        handle.shutdown().await;
        assert!(notifier.notices().iter().any(|n| matches!(
            n,
            Notice::Message { chat_id: 42, text } if text.contains(&report.order_id)
        )));
    }

    #[tokio::test]
    async fn test_extend_uses_bound_product() {
        let h = harness(FakePanel::default(), 0).await;
        h.engine.settle(&paid(create_alice(), 10_000)).await;

        let report = h
            .engine
            .settle(&paid(Purpose::extend("alice", "p30"), 10_000))
            .await;

        match report.outcome {
            ProvisioningOutcome::Extended { username, .. } => assert_eq!(username, "alice"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.repo.extensions("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tronado_top_up_credits_toman() {
        let h = harness(FakePanel::default(), 10).await;
        // 36,000 toman quoted as 6 TRX.
        let mut record =
            PaymentRecord::new_unpaid(42, 6_000_000, Purpose::WalletTopUp, GatewayKind::Tronado)
                .with_credit(36_000);
        record.status = PaymentStatus::Paid;

        let report = h.engine.settle(&record).await;

        assert_eq!(report.amount, 36_000);
        assert_eq!(report.outcome, ProvisioningOutcome::WalletCredited { balance: 36_000 });
        assert_eq!(report.cashback, Some(3_600));
        assert_eq!(h.repo.get_user(42).await.unwrap().unwrap().balance, 39_600);
    }

    #[tokio::test]
    async fn test_nowpayments_top_up_credits_toman() {
        let h = harness(FakePanel::default(), 0).await;
        // 120,000 toman quoted as 2 USD.
        let mut record =
            PaymentRecord::new_unpaid(42, 2, Purpose::WalletTopUp, GatewayKind::NowPayments)
                .with_credit(120_000);
        record.status = PaymentStatus::Paid;

        let report = h.engine.settle(&record).await;

        assert_eq!(report.outcome, ProvisioningOutcome::WalletCredited { balance: 120_000 });
        assert_eq!(h.repo.get_user(42).await.unwrap().unwrap().balance, 120_000);

        let Harness { handle, notifier, .. } = h;
        handle.shutdown().await;
        assert!(notifier.notices().iter().any(|n| matches!(
            n,
            Notice::Message { chat_id: -100, text } if text.contains("120,000") && text.contains("charged 2")
        )));
    }
}
