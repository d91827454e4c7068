//! HTTP API: provider callbacks and payment initiation.

mod handlers;
mod limit;
mod render;
mod types;

pub use handlers::*;
pub use limit::InitiationLimiter;
pub use types::*;

use axum::{
    routing::{get, post},
    Router,
};
use gateway_client::GatewayRegistry;
use settlement::{CallbackPipeline, PaymentService};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CallbackPipeline>,
    pub payments: Arc<PaymentService>,
    pub gateways: Arc<GatewayRegistry>,
    pub limiter: InitiationLimiter,
}

impl AppState {
    pub fn new(
        pipeline: CallbackPipeline,
        payments: PaymentService,
        gateways: Arc<GatewayRegistry>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            payments: Arc::new(payments),
            gateways,
            limiter: InitiationLimiter::default(),
        }
    }

    /// Payment links each user may request per minute.
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.limiter = InitiationLimiter::new(per_minute);
        self
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Provider callbacks
        .route("/callbacks/zarinpal", get(handlers::zarinpal_callback))
        .route("/callbacks/nowpayments", post(handlers::nowpayments_callback))
        .route("/callbacks/tronado", post(handlers::tronado_callback))
        .route("/callbacks/iranpay", post(handlers::iranpay_callback))
        .route("/callbacks/aqayepardakht", post(handlers::aqayepardakht_callback))
        // Initiation
        .route("/v1/payments", post(handlers::initiate_payment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
