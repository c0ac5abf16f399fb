use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::billing::plans::{plan_for, PlanType};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Base for default checkout success/cancel URLs.
    pub app_url: String,
    /// Checkout is unavailable without it.
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    /// Provider price ids for recurring plans, from `STRIPE_PRICE_<TOKEN>`.
    pub price_ids: HashMap<PlanType, String>,
    /// Manual override endpoint is disabled when unset.
    pub admin_api_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            app_url: std::env::var("APP_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            stripe_secret_key: optional_env("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional_env("STRIPE_WEBHOOK_SECRET"),
            price_ids: price_ids_from(optional_env),
            admin_api_token: optional_env("ADMIN_API_TOKEN"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn price_ids_from(lookup: impl Fn(&str) -> Option<String>) -> HashMap<PlanType, String> {
    PlanType::ALL
        .iter()
        .filter(|plan_type| plan_for(**plan_type).is_recurring())
        .filter_map(|plan_type| {
            lookup(&plan_type.price_env_var()).map(|price_id| (*plan_type, price_id))
        })
        .collect()
}
