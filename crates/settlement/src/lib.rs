//! Payment settlement and account provisioning.
//!
//! A provider callback travels through [`CallbackPipeline`]: it is
//! normalised by the provider's gateway, matched to its [`PaymentRecord`],
//! verified with the provider, and moved from unpaid to paid exactly once.
//! Only the callback that wins that transition runs the [`SettlementEngine`].
//!
//! ```text
//! callback ──▶ parse ──▶ lookup ──▶ paid? ──yes──▶ AlreadyProcessed
//!                                     │no
//!                                     ▼
//!                           status / amount / verify ──fail──▶ VerificationFailed
//!                                     │ok
//!                                     ▼
//!                            mark_paid_if_unpaid ──false──▶ AlreadyProcessed
//!                                     │true
//!                                     ▼
//!          SettlementEngine: purpose ─▶ cashback ─▶ cleanup ─▶ report
//!                                     │
//!                                     ▼
//!                             NotificationQueue ──▶ Notifier (bot)
//! ```
//!
//! A paid record is never reverted. When account provisioning fails after
//! payment, the user is told to contact support and the failure is logged
//! with the order id.

mod config;
mod engine;
mod error;
mod initiation;
mod messages;
mod notify;
mod pipeline;
mod policy;
mod provisioning;
mod store;
mod types;

#[cfg(test)]
mod testing;

pub use config::{SettlementConfig, StoreConfig};
pub use engine::{ProvisioningOutcome, SettlementEngine, SettlementReport};
pub use error::SettlementError;
pub use initiation::{InitiatedPayment, PaymentService};
pub use notify::{Notice, NotificationQueue, Notifier, QueueHandle};
pub use pipeline::{CallbackOutcome, CallbackPipeline};
pub use policy::{ExtendPolicy, Extension};
pub use provisioning::{AdapterFactory, PanelConnector, Provisioner, Renewal};
pub use store::{MemoryRepository, Repository};
pub use types::{
    normalize_username, ExtensionEvent, PanelRecord, PaymentRecord, PaymentStatus,
    PendingSelection, Product, Purpose, PurposeRequest, ServiceRecord, ServiceStatus, Tier,
    TierSettings, TierTable, User, UserId,
};
