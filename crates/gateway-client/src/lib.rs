//! Payment provider clients.
//!
//! Every provider implements [`PaymentGateway`]: it can start a payment,
//! verify one, and normalise the provider's inbound callback into
//! [`CallbackData`]. The differences between providers (success signalling,
//! correlation fields, amount units) stay inside the provider modules.
//!
//! # Example
//!
//! ```ignore
//! use gateway_client::{GatewayKind, GatewayRegistry, VerifyRequest};
//!
//! let registry = GatewayRegistry::from_config(&config.gateways)?;
//! let zarinpal = registry.get(GatewayKind::ZarinPal).unwrap();
//! let result = zarinpal
//!     .verify_payment(&VerifyRequest::new("A0001", 10_000, order_id))
//!     .await?;
//! ```

mod config;
mod error;
mod gateway;
mod providers;
mod types;

pub use config::{GatewaysConfig, ProviderConfig};
pub use error::GatewayError;
pub use gateway::{GatewayRegistry, PaymentGateway};
pub use providers::{AqayePardakht, IranPay, NowPayments, Tronado, ZarinPal};
pub use types::*;
