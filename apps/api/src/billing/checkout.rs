//! Checkout session creation.
//!
//! Recurring plans open a subscription-mode session on a pre-provisioned
//! price; everything else opens a one-time payment session with an inline
//! price. Plan intent travels in session metadata so the webhook can apply
//! it without a database round-trip.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::billing::error::BillingError;
use crate::billing::plans::{plan_for, remap_legacy_plan, resolve_plan, Plan, PlanType};
use crate::billing::provider::{
    CheckoutMode, CheckoutSessionRequest, LineItem, PaymentProvider, ProviderError,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub email: Option<String>,
    #[serde(alias = "plan_type")]
    pub plan_type: Option<String>,
    #[serde(alias = "success_url")]
    pub success_url: Option<String>,
    #[serde(alias = "cancel_url")]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
    pub mode: CheckoutMode,
    pub plan_type: PlanType,
}

#[derive(Clone)]
pub struct CheckoutService {
    /// `None` when no provider secret is configured.
    provider: Option<Arc<dyn PaymentProvider>>,
    price_ids: HashMap<PlanType, String>,
    default_success_url: String,
    default_cancel_url: String,
}

impl CheckoutService {
    pub fn new(
        provider: Option<Arc<dyn PaymentProvider>>,
        price_ids: HashMap<PlanType, String>,
        app_url: &str,
    ) -> Self {
        let app_url = app_url.trim_end_matches('/');
        Self {
            provider,
            price_ids,
            default_success_url: format!(
                "{app_url}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"
            ),
            default_cancel_url: format!("{app_url}/pricing"),
        }
    }

    /// Canonical checkout: the plan token must be a current `PlanType`.
    pub async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutResponse, BillingError> {
        let email = required_email(request)?;
        let plan = resolve_plan(required_plan_token(request)?)?;
        self.open_session(email, &plan, request).await
    }

    /// Legacy checkout: old SKU names are rewritten before resolution and
    /// an unrecognized one fails here.
    pub async fn create_legacy_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutResponse, BillingError> {
        let email = required_email(request)?;
        let token = required_plan_token(request)?;
        let plan_type = remap_legacy_plan(token)?;
        if plan_type.as_str() != token.trim() {
            info!("Legacy plan '{token}' remapped to {plan_type}");
        }
        self.open_session(email, &plan_for(plan_type), request)
            .await
    }

    async fn open_session(
        &self,
        email: &str,
        plan: &Plan,
        request: &CheckoutRequest,
    ) -> Result<CheckoutResponse, BillingError> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            warn!("Checkout requested but no payment provider is configured");
            BillingError::ProviderUnavailable("payment provider is not configured".to_string())
        })?;

        let (mode, line_item) = if plan.is_recurring() {
            let price_id = self.price_ids.get(&plan.plan_type).ok_or_else(|| {
                warn!(
                    "No provider price configured for {} ({})",
                    plan.plan_type,
                    plan.plan_type.price_env_var()
                );
                BillingError::ProviderUnavailable(format!(
                    "no price configured for plan {}",
                    plan.plan_type
                ))
            })?;
            (
                CheckoutMode::Subscription,
                LineItem::Price {
                    price_id: price_id.clone(),
                    quantity: 1,
                },
            )
        } else {
            (
                CheckoutMode::Payment,
                LineItem::Inline {
                    name: plan.display_name.to_string(),
                    unit_amount: plan.price_minor_units,
                    currency: plan.currency.to_string(),
                    quantity: 1,
                },
            )
        };

        let session_request = CheckoutSessionRequest {
            mode,
            line_items: vec![line_item],
            metadata: session_metadata(email, plan),
            customer_email: email.to_string(),
            success_url: non_empty(request.success_url.as_deref())
                .unwrap_or(self.default_success_url.as_str())
                .to_string(),
            cancel_url: non_empty(request.cancel_url.as_deref())
                .unwrap_or(self.default_cancel_url.as_str())
                .to_string(),
        };

        let session = provider
            .create_checkout_session(&session_request)
            .await
            .map_err(provider_failure)?;

        info!(
            "Checkout session {} opened for {email}: plan={} mode={}",
            session.id,
            plan.plan_type,
            mode.as_str()
        );

        Ok(CheckoutResponse {
            session_id: session.id,
            url: session.url,
            mode,
            plan_type: plan.plan_type,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required_email(request: &CheckoutRequest) -> Result<&str, BillingError> {
    non_empty(request.email.as_deref()).ok_or(BillingError::MissingEmail)
}

fn required_plan_token(request: &CheckoutRequest) -> Result<&str, BillingError> {
    non_empty(request.plan_type.as_deref()).ok_or(BillingError::MissingPlanType)
}

pub fn session_metadata(email: &str, plan: &Plan) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("email".to_string(), email.to_string()),
        ("planType".to_string(), plan.plan_type.as_str().to_string()),
        ("subscriptionTier".to_string(), plan.tier.as_str().to_string()),
        ("isLifetime".to_string(), plan.is_lifetime().to_string()),
    ])
}

fn provider_failure(err: ProviderError) -> BillingError {
    BillingError::ProviderRequestFailed {
        retryable: err.is_retryable(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::memory::RecordingProvider;

    fn service(provider: &RecordingProvider) -> CheckoutService {
        CheckoutService::new(
            Some(Arc::new(provider.clone())),
            HashMap::from([(PlanType::ProMonthly, "price_pro_m".to_string())]),
            "https://cv.test/",
        )
    }

    fn req(email: Option<&str>, plan: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            email: email.map(String::from),
            plan_type: plan.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_recurring_plan_opens_subscription_session() {
        let provider = RecordingProvider::new();
        let response = service(&provider)
            .create_session(&req(Some("a@x.com"), Some("pro_monthly")))
            .await
            .unwrap();

        assert_eq!(response.mode, CheckoutMode::Subscription);
        assert_eq!(response.plan_type, PlanType::ProMonthly);

        let sent = provider.last_request().unwrap();
        assert_eq!(sent.mode, CheckoutMode::Subscription);
        assert_eq!(
            sent.line_items,
            vec![LineItem::Price {
                price_id: "price_pro_m".to_string(),
                quantity: 1
            }]
        );
        assert_eq!(sent.metadata["subscriptionTier"], "pro");
        assert_eq!(sent.metadata["planType"], "pro_monthly");
        assert_eq!(sent.metadata["email"], "a@x.com");
        assert_eq!(sent.metadata["isLifetime"], "false");
        assert_eq!(sent.cancel_url, "https://cv.test/pricing");
    }

    #[tokio::test]
    async fn test_one_time_plan_uses_inline_minor_units() {
        let provider = RecordingProvider::new();
        service(&provider)
            .create_session(&req(Some("a@x.com"), Some("premium_lifetime")))
            .await
            .unwrap();

        let sent = provider.last_request().unwrap();
        assert_eq!(sent.mode, CheckoutMode::Payment);
        assert!(matches!(
            &sent.line_items[0],
            LineItem::Inline { unit_amount: 29900, currency, .. } if currency == "usd"
        ));
        assert_eq!(sent.metadata["isLifetime"], "true");
    }

    #[tokio::test]
    async fn test_caller_redirects_override_defaults() {
        let provider = RecordingProvider::new();
        let mut request = req(Some("a@x.com"), Some("mini_one_time"));
        request.success_url = Some("https://cv.test/done".to_string());
        service(&provider).create_session(&request).await.unwrap();

        let sent = provider.last_request().unwrap();
        assert_eq!(sent.success_url, "https://cv.test/done");
        assert_eq!(sent.cancel_url, "https://cv.test/pricing");
    }

    #[tokio::test]
    async fn test_validation_precedes_provider() {
        let provider = RecordingProvider::new();
        let svc = service(&provider);

        assert!(matches!(
            svc.create_session(&req(Some("  "), Some("pro_monthly"))).await,
            Err(BillingError::MissingEmail)
        ));
        assert!(matches!(
            svc.create_session(&req(Some("a@x.com"), None)).await,
            Err(BillingError::MissingPlanType)
        ));
        assert!(matches!(
            svc.create_session(&req(Some("a@x.com"), Some("gold"))).await,
            Err(BillingError::UnknownPlan(_))
        ));
        assert!(provider.last_request().is_none());
    }

    #[tokio::test]
    async fn test_missing_provider_is_unavailable() {
        let svc = CheckoutService::new(None, HashMap::new(), "https://cv.test");
        let err = svc
            .create_session(&req(Some("a@x.com"), Some("pro_monthly")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_price_id_is_unavailable() {
        let provider = RecordingProvider::new();
        let err = service(&provider)
            .create_session(&req(Some("a@x.com"), Some("enterprise_yearly")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_reports_retryability() {
        let provider = RecordingProvider::new();
        *provider.fail_with.lock().unwrap() = Some((502, "upstream".to_string()));
        let err = service(&provider)
            .create_session(&req(Some("a@x.com"), Some("mini_one_time")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::ProviderRequestFailed { retryable: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_legacy_alias_is_remapped() {
        let provider = RecordingProvider::new();
        let response = service(&provider)
            .create_legacy_session(&req(Some("a@x.com"), Some("pro")))
            .await
            .unwrap();
        assert_eq!(response.plan_type, PlanType::ProMonthly);
        assert_eq!(provider.last_request().unwrap().metadata["planType"], "pro_monthly");
    }

    #[tokio::test]
    async fn test_unknown_legacy_alias_fails_at_remap() {
        let provider = RecordingProvider::new();
        let err = service(&provider)
            .create_legacy_session(&req(Some("a@x.com"), Some("starter")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::UnknownPlan(ref t) if t == "starter"));
    }

    #[tokio::test]
    async fn test_canonical_endpoint_rejects_legacy_alias() {
        let provider = RecordingProvider::new();
        let err = service(&provider)
            .create_session(&req(Some("a@x.com"), Some("pro")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::UnknownPlan(_)));
    }
}
