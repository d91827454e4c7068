//! Renewal policies: how a purchased package combines with what the account
//! already has.

use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Per-backend renewal rule, stored as its numeric id (1-4).
///
/// | id | time       | volume     |
/// |----|------------|------------|
/// | 1  | reset      | reset      |
/// | 2  | accumulate | accumulate |
/// | 3  | reset      | accumulate |
/// | 4  | accumulate | reset      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ExtendPolicy {
    ResetAll,
    AccumulateAll,
    ResetTimeAccumulateVolume,
    #[default]
    AccumulateTimeResetVolume,
}

impl From<u8> for ExtendPolicy {
    /// Unknown ids fall back to the default policy.
    fn from(id: u8) -> Self {
        match id {
            1 => ExtendPolicy::ResetAll,
            2 => ExtendPolicy::AccumulateAll,
            3 => ExtendPolicy::ResetTimeAccumulateVolume,
            _ => ExtendPolicy::AccumulateTimeResetVolume,
        }
    }
}

impl From<ExtendPolicy> for u8 {
    fn from(policy: ExtendPolicy) -> Self {
        match policy {
            ExtendPolicy::ResetAll => 1,
            ExtendPolicy::AccumulateAll => 2,
            ExtendPolicy::ResetTimeAccumulateVolume => 3,
            ExtendPolicy::AccumulateTimeResetVolume => 4,
        }
    }
}

/// New limits for a renewed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    /// Epoch seconds.
    pub expire: i64,
    /// Bytes.
    pub data_limit: u64,
    /// Whether used traffic should be zeroed as well.
    pub reset_traffic: bool,
}

impl ExtendPolicy {
    fn accumulates_time(self) -> bool {
        matches!(
            self,
            ExtendPolicy::AccumulateAll | ExtendPolicy::AccumulateTimeResetVolume
        )
    }

    fn accumulates_volume(self) -> bool {
        matches!(
            self,
            ExtendPolicy::AccumulateAll | ExtendPolicy::ResetTimeAccumulateVolume
        )
    }

    /// Compute the renewed expiry and data limit.
    ///
    /// Accumulated time always starts from `max(current_expire, now)`, so an
    /// account that already expired gets the full purchased period.
    pub fn resolve(
        self,
        current_expire: i64,
        current_limit: u64,
        days: u32,
        volume_bytes: u64,
        now: i64,
    ) -> Extension {
        let grant = i64::from(days) * SECONDS_PER_DAY;
        let expire = if self.accumulates_time() {
            current_expire.max(now) + grant
        } else {
            now + grant
        };
        let data_limit = if self.accumulates_volume() {
            current_limit.saturating_add(volume_bytes)
        } else {
            volume_bytes
        };

        Extension {
            expire,
            data_limit,
            reset_traffic: self == ExtendPolicy::ResetAll,
        }
    }
}
