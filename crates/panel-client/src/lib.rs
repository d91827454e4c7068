//! Account-management backend adapters.
//!
//! Each backend (Marzban, X-UI, Hiddify, Mikrotik user-manager) is driven
//! through the same [`PanelAdapter`] lifecycle. Adapters translate native
//! units (gigabytes, milliseconds, relative days) into the normalised
//! [`PanelAccount`] view and report missing operations as
//! [`PanelError::Unsupported`].
//!
//! ```text
//! PanelConfig ──connect()──▶ Arc<dyn PanelAdapter>
//!                                  │
//!                      authenticate() ──▶ PanelSession
//!                                  │
//!           get_account / create_account / modify_account / ...
//! ```

mod adapter;
mod backends;
mod error;
mod types;

pub use adapter::{connect, PanelAdapter};
pub use backends::{Hiddify, Marzban, Mikrotik, XUi};
pub use error::PanelError;
pub use types::{
    AccountStatus, AccountTemplate, BackendKind, Capability, CreateAccountRequest,
    ModifyAccountRequest, PanelAccount, PanelConfig, PanelSession, ResetStrategy, BYTES_PER_GB,
    SECONDS_PER_DAY,
};
