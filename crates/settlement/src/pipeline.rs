//! Inbound callback handling: normalise, look up, verify, guard, settle.

use crate::engine::{SettlementEngine, SettlementReport};
use crate::error::SettlementError;
use crate::store::Repository;
use crate::types::PaymentRecord;
use gateway_client::{
    CallbackData, CallbackPayload, CallbackStatus, GatewayKind, GatewayRegistry, VerifyRequest,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How a callback ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// This callback moved the record to paid and settled it.
    Settled(SettlementReport),
    /// The record was already paid. Nothing was done.
    AlreadyProcessed { order_id: String, amount: u64 },
}

impl CallbackOutcome {
    pub fn order_id(&self) -> &str {
        match self {
            CallbackOutcome::Settled(report) => &report.order_id,
            CallbackOutcome::AlreadyProcessed { order_id, .. } => order_id,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            CallbackOutcome::Settled(report) => report.amount,
            CallbackOutcome::AlreadyProcessed { amount, .. } => *amount,
        }
    }
}

pub struct CallbackPipeline {
    repo: Arc<dyn Repository>,
    gateways: Arc<GatewayRegistry>,
    engine: SettlementEngine,
}

impl CallbackPipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        gateways: Arc<GatewayRegistry>,
        engine: SettlementEngine,
    ) -> Self {
        Self {
            repo,
            gateways,
            engine,
        }
    }

    /// Process one provider callback.
    ///
    /// Replays of a settled payment return `AlreadyProcessed` without
    /// touching anything. Declined or mismatched payments leave the record
    /// unpaid so a later genuine callback can still settle it.
    #[instrument(skip(self, payload))]
    pub async fn handle(
        &self,
        kind: GatewayKind,
        payload: &CallbackPayload,
    ) -> Result<CallbackOutcome, SettlementError> {
        let gateway = self
            .gateways
            .get(kind)
            .ok_or(SettlementError::GatewayUnavailable(kind))?;

        let data = gateway.parse_callback(payload)?;
        let record = self.lookup(kind, &data).await?;
        let order_id = record.order_id.clone();

        if record.is_paid() {
            info!(%order_id, "Callback for settled payment ignored");
            return Ok(already_processed(&record));
        }

        if let CallbackStatus::Failed(status) = &data.status {
            warn!(%order_id, %status, "Provider reported unsuccessful payment");
            return Err(SettlementError::VerificationFailed(format!(
                "provider reported status {}",
                status
            )));
        }

        if let Some(reported) = data.reported_amount {
            if reported != record.amount {
                warn!(%order_id, reported, expected = record.amount, "Callback amount mismatch");
                return Err(SettlementError::VerificationFailed(format!(
                    "amount mismatch: callback reported {}, expected {}",
                    reported, record.amount
                )));
            }
        }

        let request = VerifyRequest::new(&data.verify_token, record.amount, &order_id);
        let verdict = gateway.verify_payment(&request).await?;
        if !verdict.verified {
            warn!(%order_id, message = %verdict.message, "Provider declined verification");
            return Err(SettlementError::VerificationFailed(verdict.message));
        }

        if !self
            .repo
            .mark_paid_if_unpaid(&order_id, verdict.ref_id.clone())
            .await?
        {
            info!(%order_id, "Payment settled by a concurrent callback");
            return Ok(already_processed(&record));
        }

        let paid = self
            .repo
            .get_payment(&order_id)
            .await?
            .ok_or_else(|| SettlementError::RecordNotFound(format!("order {}", order_id)))?;
        info!(%order_id, ref_id = ?verdict.ref_id, "Payment verified");

        Ok(CallbackOutcome::Settled(self.engine.settle(&paid).await))
    }

    async fn lookup(
        &self,
        kind: GatewayKind,
        data: &CallbackData,
    ) -> Result<PaymentRecord, SettlementError> {
        let found = match (&data.order_id, &data.correlation_token) {
            (Some(order_id), _) => self.repo.get_payment(order_id).await?,
            (None, Some(token)) => self.repo.find_payment_by_correlation(kind, token).await?,
            (None, None) => {
                return Err(SettlementError::InvalidCallback(
                    "callback carries no order reference".into(),
                ))
            }
        };

        let record = found.ok_or_else(|| {
            SettlementError::RecordNotFound(format!(
                "payment for {}",
                data.order_id
                    .as_deref()
                    .or(data.correlation_token.as_deref())
                    .unwrap_or_default()
            ))
        })?;

        if record.method != kind {
            return Err(SettlementError::InvalidCallback(format!(
                "order {} was not paid through {}",
                record.order_id, kind
            )));
        }
        // A token from one payment must not settle a different order.
        if let Some(token) = &data.correlation_token {
            if record.correlation.as_deref() != Some(token.as_str()) {
                warn!(order_id = %record.order_id, %token, "Callback token does not match order");
                return Err(SettlementError::InvalidCallback(format!(
                    "token {} does not belong to order {}",
                    token, record.order_id
                )));
            }
        }
        Ok(record)
    }
}

fn already_processed(record: &PaymentRecord) -> CallbackOutcome {
    CallbackOutcome::AlreadyProcessed {
        order_id: record.order_id.clone(),
        amount: record.credit,
    }
}
