//! The provider abstraction and the registry of enabled providers.

use crate::config::GatewaysConfig;
use crate::error::GatewayError;
use crate::providers::{AqayePardakht, IranPay, NowPayments, Tronado, ZarinPal};
use crate::types::{
    CallbackData, CallbackPayload, GatewayKind, PaymentRequest, PaymentResult, VerifyRequest,
    VerifyResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A payment provider.
///
/// `verify_payment` returns `Ok` with `verified == false` when the provider
/// answers but declines; `Err` is reserved for transport and configuration
/// failures.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Create a payment and return the URL the user must visit.
    async fn initiate_payment(&self, request: &PaymentRequest)
        -> Result<PaymentResult, GatewayError>;

    /// Ask the provider whether the payment identified by `request.token`
    /// was made, for this amount and this order.
    async fn verify_payment(&self, request: &VerifyRequest) -> Result<VerifyResult, GatewayError>;

    /// Price a toman amount in the unit this provider charges in.
    fn quote(&self, toman: u64) -> Result<u64, GatewayError> {
        Ok(toman)
    }

    /// Normalise an inbound callback. Performs no I/O.
    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackData, GatewayError>;
}

/// Registry of enabled providers.
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    /// Build a registry holding every provider enabled in `config`.
    pub fn from_config(config: &GatewaysConfig) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for kind in GatewayKind::ALL {
            let provider = config.get(kind);
            if !provider.enabled {
                continue;
            }
            let gateway: Arc<dyn PaymentGateway> = match kind {
                GatewayKind::ZarinPal => Arc::new(ZarinPal::new(provider)?),
                GatewayKind::NowPayments => Arc::new(NowPayments::new(provider)?),
                GatewayKind::Tronado => Arc::new(Tronado::new(provider)?),
                GatewayKind::IranPay => Arc::new(IranPay::new(provider)?),
                GatewayKind::AqayePardakht => Arc::new(AqayePardakht::new(provider)?),
            };
            registry.register(gateway);
        }
        Ok(registry)
    }

    /// Register a provider, replacing any previous one of the same kind.
    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn get(&self, kind: GatewayKind) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&kind).cloned()
    }

    pub fn list_enabled(&self) -> Vec<GatewayKind> {
        let mut kinds: Vec<GatewayKind> = self.gateways.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn test_registry_lists_only_enabled() {
        let config = GatewaysConfig {
            zarinpal: ProviderConfig {
                enabled: true,
                credential: Some("merchant".into()),
                ..Default::default()
            },
            iranpay: ProviderConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let registry = GatewayRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.list_enabled(),
            vec![GatewayKind::IranPay, GatewayKind::ZarinPal]
        );
        assert!(registry.get(GatewayKind::Tronado).is_none());
        assert_eq!(
            registry.get(GatewayKind::ZarinPal).unwrap().kind(),
            GatewayKind::ZarinPal
        );
    }
}
