//! Payment callback server.
//!
//! Receives provider callbacks on one route per provider, hands them to the
//! settlement pipeline, and answers in the shape each provider expects: a
//! result page for browser redirects, a JSON acknowledgement for server
//! calls. Also issues payment links through `POST /v1/payments`.

pub mod api;
pub mod app;
pub mod config;
pub mod error;

pub use config::Config;
pub use error::ServerError;
