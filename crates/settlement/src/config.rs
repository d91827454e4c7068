//! Settlement and storage settings.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Chat that receives a report for every settled payment.
    #[serde(default)]
    pub report_chat_id: Option<i64>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            report_chat_id: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Write every change to `path`. When false, data lives in memory only.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            persist: default_persist(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store.json")
}

fn default_persist() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settlement: SettlementConfig = serde_json::from_str(r#"{"report_chat_id": -100}"#).unwrap();
        assert_eq!(settlement.report_chat_id, Some(-100));
        assert_eq!(settlement.queue_capacity, 256);

        let store: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(store.path, PathBuf::from("data/store.json"));
        assert!(store.persist);
    }
}
