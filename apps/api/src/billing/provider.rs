//! Payment provider client — the single point of entry for Stripe API calls.
//!
//! No other module talks to the provider directly. Checkout creation is not
//! retried here: a failure is reported with a flag saying whether a retry
//! by the caller is safe.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider response missing field '{0}'")]
    MissingField(&'static str),
}

impl ProviderError {
    /// Timeouts, connection failures, 429 and 5xx are worth retrying; a 4xx
    /// means the request itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::MissingField(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Payment => "payment",
            CheckoutMode::Subscription => "subscription",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineItem {
    /// A pre-provisioned recurring price.
    Price { price_id: String, quantity: u32 },
    /// An ad-hoc price; `unit_amount` is already in minor units.
    Inline {
        name: String,
        unit_amount: i64,
        currency: String,
        quantity: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub mode: CheckoutMode,
    pub line_items: Vec<LineItem>,
    pub metadata: BTreeMap<String, String>,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutSessionRequest {
    /// Flattens the request into Stripe's bracketed form encoding.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), self.mode.as_str().to_string()),
            ("customer_email".to_string(), self.customer_email.clone()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        for (i, item) in self.line_items.iter().enumerate() {
            match item {
                LineItem::Price { price_id, quantity } => {
                    form.push((format!("line_items[{i}][price]"), price_id.clone()));
                    form.push((format!("line_items[{i}][quantity]"), quantity.to_string()));
                }
                LineItem::Inline {
                    name,
                    unit_amount,
                    currency,
                    quantity,
                } => {
                    let prefix = format!("line_items[{i}][price_data]");
                    form.push((format!("{prefix}[currency]"), currency.clone()));
                    form.push((format!("{prefix}[unit_amount]"), unit_amount.to_string()));
                    form.push((format!("{prefix}[product_data][name]"), name.clone()));
                    form.push((format!("line_items[{i}][quantity]"), quantity.to_string()));
                }
            }
        }

        for (key, value) in &self.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
            if self.mode == CheckoutMode::Subscription {
                // Renewal invoices only carry the subscription's metadata.
                form.push((format!("subscription_data[metadata][{key}]"), value.clone()));
            }
        }

        form
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            secret_key,
            base_url: STRIPE_API_URL.to_string(),
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&request.to_form())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!("Stripe checkout session creation returned {status}: {message}");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: StripeSession = response.json().await?;
        debug!("Stripe checkout session {} created", session.id);

        Ok(CheckoutSession {
            url: session.url.ok_or(ProviderError::MissingField("url"))?,
            id: session.id,
        })
    }
}
