//! Telegram Bot API client.

mod client;
mod error;
mod types;

pub use client::BotClient;
pub use error::BotError;
pub use types::*;
