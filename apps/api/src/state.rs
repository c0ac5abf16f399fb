use crate::billing::checkout::CheckoutService;
use crate::billing::engine::EntitlementEngine;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Sole writer of subscription state.
    pub engine: EntitlementEngine,
    pub checkout: CheckoutService,
}
