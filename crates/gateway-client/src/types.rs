//! Provider-independent request, result and callback types.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    ZarinPal,
    NowPayments,
    Tronado,
    IranPay,
    AqayePardakht,
}

impl GatewayKind {
    pub const ALL: [GatewayKind; 5] = [
        GatewayKind::ZarinPal,
        GatewayKind::NowPayments,
        GatewayKind::Tronado,
        GatewayKind::IranPay,
        GatewayKind::AqayePardakht,
    ];

    /// Stable lowercase identifier, used in routes and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::ZarinPal => "zarinpal",
            GatewayKind::NowPayments => "nowpayments",
            GatewayKind::Tronado => "tronado",
            GatewayKind::IranPay => "iranpay",
            GatewayKind::AqayePardakht => "aqayepardakht",
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayKind::ZarinPal => write!(f, "ZarinPal"),
            GatewayKind::NowPayments => write!(f, "NOWPayments"),
            GatewayKind::Tronado => write!(f, "Tronado"),
            GatewayKind::IranPay => write!(f, "IranPay"),
            GatewayKind::AqayePardakht => write!(f, "AqayePardakht"),
        }
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GatewayKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GatewayError::InvalidCallback(format!("unknown gateway: {}", s)))
    }
}

/// Request to start a payment with a provider.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Amount in the record's smallest currency unit.
    pub amount: u64,
    pub order_id: String,
    pub description: String,
    pub callback_url: String,
}

/// What the record being settled expects the provider to confirm.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    /// Identifier the provider's verify endpoint expects.
    pub token: String,
    /// Amount in the provider's unit, as stored on the record.
    pub amount: u64,
    /// Our order id; a confirmation for any other order is a decline.
    pub order_id: String,
}

impl VerifyRequest {
    pub fn new(token: impl Into<String>, amount: u64, order_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            amount,
            order_id: order_id.into(),
        }
    }
}

/// A payment the user can now complete on the provider's page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    pub payment_url: String,
    /// Provider-assigned identifier stored in the record's correlation slot.
    pub correlation_token: String,
}

/// Outcome of asking the provider whether a payment went through.
///
/// A provider saying "not paid" is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub verified: bool,
    pub ref_id: Option<String>,
    pub message: String,
}

impl VerifyResult {
    pub fn verified(ref_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            verified: true,
            ref_id: Some(ref_id.into()),
            message: message.into(),
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            verified: false,
            ref_id: None,
            message: message.into(),
        }
    }
}

/// Raw inbound callback, in whichever transport shape the provider uses.
#[derive(Debug, Clone)]
pub enum CallbackPayload {
    Query(HashMap<String, String>),
    Json(serde_json::Value),
    Form(HashMap<String, String>),
}

impl CallbackPayload {
    /// Read a field as text regardless of transport shape.
    ///
    /// JSON numbers and booleans are rendered with their canonical text.
    pub fn field(&self, name: &str) -> Option<String> {
        match self {
            CallbackPayload::Query(map) | CallbackPayload::Form(map) => map.get(name).cloned(),
            CallbackPayload::Json(value) => match value.get(name)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            },
        }
    }

    /// Read a required, non-empty field.
    pub fn require(&self, name: &str) -> Result<String, GatewayError> {
        self.field(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::InvalidCallback(format!("missing field `{}`", name)))
    }
}

/// Provider-reported state carried by a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Success,
    Failed(String),
}

impl CallbackStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CallbackStatus::Success)
    }
}

/// Normalised callback contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackData {
    /// Our order id, when the provider echoes it back.
    pub order_id: Option<String>,
    /// The provider's identifier matching the record's correlation slot.
    pub correlation_token: Option<String>,
    /// Identifier the provider's verify endpoint expects.
    pub verify_token: String,
    /// Amount the callback claims was paid, in the provider's smallest unit.
    pub reported_amount: Option<u64>,
    pub status: CallbackStatus,
}

/// Format an integer amount with thousands separators (`10000` -> `"10,000"`).
pub fn format_amount(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Parse a decimal string into integer units with `scale` fractional digits.
///
/// `parse_decimal_units("5.25", 6)` is `Some(5_250_000)`. Extra fractional
/// digits beyond `scale` are rejected rather than rounded.
pub fn parse_decimal_units(text: &str, scale: u32) -> Option<u64> {
    let text = text.trim();
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let frac_trimmed = frac.trim_end_matches('0');
    if frac_trimmed.len() > scale as usize {
        return None;
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_units: u64 = if frac_trimmed.is_empty() {
        0
    } else {
        frac_trimmed.parse().ok()?
    };
    for _ in frac_trimmed.len()..scale as usize {
        frac_units = frac_units.checked_mul(10)?;
    }

    whole.checked_mul(10u64.checked_pow(scale)?)?.checked_add(frac_units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0");
        assert_eq!(format_amount(999), "999");
        assert_eq!(format_amount(10_000), "10,000");
        assert_eq!(format_amount(1_234_567), "1,234,567");
    }

    #[test]
    fn test_parse_decimal_units() {
        assert_eq!(parse_decimal_units("5", 6), Some(5_000_000));
        assert_eq!(parse_decimal_units("5.25", 6), Some(5_250_000));
        assert_eq!(parse_decimal_units("0.000001", 6), Some(1));
        assert_eq!(parse_decimal_units("6.500000", 6), Some(6_500_000));
        assert_eq!(parse_decimal_units("1.0000001", 6), None);
        assert_eq!(parse_decimal_units("-1", 6), None);
        assert_eq!(parse_decimal_units("abc", 6), None);
        assert_eq!(parse_decimal_units("", 6), None);
    }

    #[test]
    fn test_payload_field_shapes() {
        let json = CallbackPayload::Json(serde_json::json!({
            "invoice_id": 4522,
            "IsPaid": true,
            "payment_status": "finished"
        }));
        assert_eq!(json.field("invoice_id"), Some("4522".into()));
        assert_eq!(json.field("IsPaid"), Some("true".into()));
        assert_eq!(json.field("payment_status"), Some("finished".into()));
        assert!(json.field("missing").is_none());

        let query = CallbackPayload::Query(HashMap::from([("Status".into(), "OK".into())]));
        assert_eq!(query.field("Status"), Some("OK".into()));
        assert!(matches!(
            query.require("Authority"),
            Err(GatewayError::InvalidCallback(_))
        ));
    }

    #[test]
    fn test_gateway_kind_round_trip() {
        for kind in GatewayKind::ALL {
            assert_eq!(kind.as_str().parse::<GatewayKind>().unwrap(), kind);
        }
        assert!("paypal".parse::<GatewayKind>().is_err());
    }
}
