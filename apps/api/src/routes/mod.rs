pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::billing::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Plans & checkout
        .route("/api/v1/plans", get(handlers::handle_list_plans))
        .route("/api/v1/checkout", post(handlers::handle_create_checkout))
        .route(
            "/api/v1/stripe/create-checkout",
            post(handlers::handle_legacy_checkout),
        )
        // Provider callbacks & operator fixes
        .route(
            "/api/v1/webhooks/stripe",
            post(handlers::handle_stripe_webhook),
        )
        .route(
            "/api/v1/admin/subscriptions/fix",
            post(handlers::handle_manual_override),
        )
        // Entitlements
        .route(
            "/api/v1/entitlements",
            get(handlers::handle_get_entitlement),
        )
        .route(
            "/api/v1/entitlements/cv-gate",
            get(handlers::handle_cv_gate),
        )
        .route(
            "/api/v1/entitlements/export-gate",
            get(handlers::handle_export_gate),
        )
        .route(
            "/api/v1/entitlements/template-gate",
            get(handlers::handle_template_gate),
        )
        .route("/api/v1/payments", get(handlers::handle_payment_history))
        // Enterprise API
        .route(
            "/api/v1/enterprise/account",
            get(handlers::handle_enterprise_account),
        )
        .with_state(state)
}
