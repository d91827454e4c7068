//! Per-user limit on payment initiation.

use crate::error::ServerError;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

/// Payment links a single user may request per minute.
///
/// Callbacks are not limited: providers must always be able to redeliver.
#[derive(Clone)]
pub struct InitiationLimiter {
    users: Arc<DefaultKeyedRateLimiter<i64>>,
}

impl InitiationLimiter {
    /// Zero falls back to 60.
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN.saturating_add(59));
        Self {
            users: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
        }
    }

    pub fn check(&self, user_id: i64) -> Result<(), ServerError> {
        self.users.check_key(&user_id).map_err(|_| {
            warn!(user_id, "Payment initiation rate limit exceeded");
            ServerError::RateLimitExceeded
        })
    }
}

impl Default for InitiationLimiter {
    fn default() -> Self {
        Self::new(60)
    }
}
