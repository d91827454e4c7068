//! User-facing notification texts (HTML parse mode).

use crate::engine::ProvisioningOutcome;
use crate::types::{PaymentRecord, ServiceRecord};
use chrono::DateTime;
use gateway_client::format_amount;

pub fn wallet_credited(amount: u64, balance: u64) -> String {
    format!(
        "✅ Payment of <b>{}</b> received.\nYour wallet balance is now <b>{}</b>.",
        format_amount(amount),
        format_amount(balance)
    )
}

pub fn account_created(service: &ServiceRecord) -> String {
    let mut text = format!(
        "✅ Your account <code>{}</code> is ready.\nVolume: {}\nDuration: {}",
        service.username,
        volume(service.volume_gb),
        days(service.duration_days)
    );
    if let Some(url) = &service.subscription_url {
        text.push_str(&format!("\n\nSubscription link:\n<code>{}</code>", url));
    }
    text
}

pub fn account_extended(username: &str, expire: i64, data_limit: u64) -> String {
    let until = if expire == 0 {
        "no expiry".to_string()
    } else {
        DateTime::from_timestamp(expire, 0)
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| expire.to_string())
    };
    let limit = if data_limit == 0 {
        "unlimited".to_string()
    } else {
        format!("{} GB", data_limit / panel_client::BYTES_PER_GB)
    };
    format!(
        "✅ Account <code>{}</code> renewed.\nValid until: {}\nData limit: {}",
        username, until, limit
    )
}

pub fn provisioning_failed(order_id: &str) -> String {
    format!(
        "⚠️ Your payment was received, but the service could not be set up automatically.\n\
         Please contact support with order <code>{}</code>.",
        order_id
    )
}

pub fn cashback(bonus: u64, balance: u64) -> String {
    format!(
        "🎁 Cashback of <b>{}</b> added to your wallet.\nBalance: <b>{}</b>",
        format_amount(bonus),
        format_amount(balance)
    )
}

pub fn report(record: &PaymentRecord, outcome: &ProvisioningOutcome) -> String {
    let result = match outcome {
        ProvisioningOutcome::WalletCredited { .. } => "wallet credited".to_string(),
        ProvisioningOutcome::Created { service } => format!("created {}", service.username),
        ProvisioningOutcome::Extended { username, .. } => format!("renewed {}", username),
        ProvisioningOutcome::Failed { reason } => format!("FAILED: {}", reason),
    };
    let charged = if record.amount == record.credit {
        String::new()
    } else {
        format!(" (charged {} in {} units)", record.amount, record.method)
    };
    format!(
        "💰 Payment settled\nOrder: <code>{}</code>\nUser: <code>{}</code>\nAmount: {}{}\nMethod: {}\nPurpose: {}\nResult: {}",
        record.order_id,
        record.user_id,
        format_amount(record.credit),
        charged,
        record.method,
        record.purpose,
        result
    )
}

fn volume(gb: u64) -> String {
    if gb == 0 {
        "unlimited".to_string()
    } else {
        format!("{} GB", gb)
    }
}

fn days(days: u32) -> String {
    if days == 0 {
        "unlimited".to_string()
    } else {
        format!("{} days", days)
    }
}
