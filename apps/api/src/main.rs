mod billing;
mod config;
mod db;
mod errors;
mod models;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::billing::checkout::CheckoutService;
use crate::billing::engine::EntitlementEngine;
use crate::billing::pg_store::{PgIdentityDirectory, PgProfileStore};
use crate::billing::provider::{PaymentProvider, StripeClient};
use crate::config::Config;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV builder API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    let engine = EntitlementEngine::new(
        Arc::new(PgProfileStore::new(db.clone())),
        Arc::new(PgIdentityDirectory::new(db)),
    );

    // Payment provider is optional; checkout answers 503 without it
    let provider: Option<Arc<dyn PaymentProvider>> = match &config.stripe_secret_key {
        Some(key) => {
            info!("Stripe client initialized");
            Some(Arc::new(StripeClient::new(key.clone())?))
        }
        None => {
            warn!("STRIPE_SECRET_KEY not set; checkout is disabled");
            None
        }
    };
    if config.stripe_webhook_secret.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET not set; webhooks will be rejected");
    }
    info!("{} recurring plan price ids configured", config.price_ids.len());

    let checkout = CheckoutService::new(provider, config.price_ids.clone(), &config.app_url);

    // Build app state
    let state = AppState {
        config: config.clone(),
        engine,
        checkout,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to APP_URL once the web client is deployed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
