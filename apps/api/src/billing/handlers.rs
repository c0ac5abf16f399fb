use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::checkout::{CheckoutRequest, CheckoutResponse};
use crate::billing::engine::{ApplyOutcome, Entitlement, ManualOverride, UserRef};
use crate::billing::enterprise::EnterpriseCaller;
use crate::billing::error::BillingError;
use crate::billing::gating::{can_create_cv, can_export, can_use_template, GateDecision};
use crate::billing::plans::{catalog, Plan};
use crate::billing::store::PaymentRecord;
use crate::billing::tier::{SubscriptionTier, TemplateCategory};
use crate::billing::webhook::{parse_event, verify_signature, SIGNATURE_HEADER};
use crate::errors::AppError;
use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct ProfileLookupQuery {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
}

impl ProfileLookupQuery {
    fn target(self) -> Result<UserRef, AppError> {
        match (self.user_id, self.email) {
            (Some(id), _) => Ok(UserRef::Id(id)),
            (None, Some(email)) if !email.trim().is_empty() => {
                Ok(UserRef::Email(email.trim().to_string()))
            }
            _ => Err(AppError::Validation(
                "user_id or email is required".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
pub struct CountQuery {
    pub user_id: Uuid,
    #[serde(default)]
    pub current_count: u32,
}

#[derive(Deserialize)]
pub struct TemplateQuery {
    pub user_id: Uuid,
    pub category: TemplateCategory,
}

#[derive(Serialize)]
pub struct PlanListResponse {
    pub plans: Vec<Plan>,
}

#[derive(Serialize)]
pub struct TemplateGateResponse {
    pub allowed: bool,
    pub category: TemplateCategory,
    pub tier: SubscriptionTier,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl WebhookAck {
    fn new(status: &'static str, event_id: Option<String>) -> Self {
        Self {
            received: true,
            status,
            event_id,
        }
    }
}

#[derive(Serialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<PaymentRecord>,
}

/// GET /api/v1/plans
pub async fn handle_list_plans() -> Json<PlanListResponse> {
    Json(PlanListResponse { plans: catalog() })
}

/// POST /api/v1/checkout
pub async fn handle_create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    Ok(Json(state.checkout.create_session(&req).await?))
}

/// POST /api/v1/stripe/create-checkout
pub async fn handle_legacy_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    Ok(Json(state.checkout.create_legacy_session(&req).await?))
}

/// POST /api/v1/webhooks/stripe
///
/// Unknown users, duplicates and ignored event types answer 200 so the
/// provider stops redelivering. Malformed payloads and unknown plans answer
/// 400. Storage failures surface as 5xx and are redelivered.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        warn!("Webhook received but STRIPE_WEBHOOK_SECRET is not set");
        BillingError::ProviderUnavailable("webhook secret is not configured".to_string())
    })?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::InvalidSignature("missing signature header".to_string()))?;

    verify_signature(&body, signature, secret, Utc::now().timestamp())?;

    let Some(event) = parse_event(&body)? else {
        return Ok(Json(WebhookAck::new("ignored", None)));
    };
    let event_id = Some(event.event_id.clone());

    let status = match state.engine.apply_payment_event(&event).await {
        Ok(ApplyOutcome::Applied { .. }) => "applied",
        Ok(ApplyOutcome::Duplicate { .. }) => "duplicate",
        Ok(ApplyOutcome::Recorded { .. }) => "recorded",
        Ok(ApplyOutcome::PartiallyApplied { .. }) => "partially_applied",
        Err(BillingError::UserNotFound(who)) => {
            warn!("Webhook {} undeliverable: no user for {who}", event.event_id);
            "undeliverable"
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(WebhookAck::new(status, event_id)))
}

/// POST /api/v1/admin/subscriptions/fix
pub async fn handle_manual_override(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ManualOverride>,
) -> Result<Json<ApplyOutcome>, AppError> {
    let Some(expected) = state.config.admin_api_token.as_deref() else {
        warn!("Manual override attempted but ADMIN_API_TOKEN is not set");
        return Err(AppError::Forbidden);
    };
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !admin_token_matches(presented, expected) {
        return Err(AppError::Forbidden);
    }

    let outcome = state.engine.apply_manual_override(&req).await?;
    info!("Manual override applied: {outcome:?}");
    Ok(Json(outcome))
}

/// Compares digests so the time taken does not depend on how much of the
/// presented token matches.
fn admin_token_matches(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// GET /api/v1/entitlements
pub async fn handle_get_entitlement(
    State(state): State<AppState>,
    Query(params): Query<ProfileLookupQuery>,
) -> Result<Json<Entitlement>, AppError> {
    let target = params.target()?;
    Ok(Json(state.engine.entitlement_for(&target).await?))
}

/// GET /api/v1/entitlements/cv-gate
pub async fn handle_cv_gate(
    State(state): State<AppState>,
    Query(params): Query<CountQuery>,
) -> Result<Json<GateDecision>, AppError> {
    let entitlement = state.engine.entitlement(params.user_id).await?;
    Ok(Json(can_create_cv(
        entitlement.effective_tier,
        params.current_count,
        entitlement.extra_cv_credits,
    )))
}

/// GET /api/v1/entitlements/export-gate
pub async fn handle_export_gate(
    State(state): State<AppState>,
    Query(params): Query<CountQuery>,
) -> Result<Json<GateDecision>, AppError> {
    let entitlement = state.engine.entitlement(params.user_id).await?;
    Ok(Json(can_export(
        entitlement.effective_tier,
        params.current_count,
    )))
}

/// GET /api/v1/entitlements/template-gate
pub async fn handle_template_gate(
    State(state): State<AppState>,
    Query(params): Query<TemplateQuery>,
) -> Result<Json<TemplateGateResponse>, AppError> {
    let entitlement = state.engine.entitlement(params.user_id).await?;
    Ok(Json(TemplateGateResponse {
        allowed: can_use_template(entitlement.effective_tier, params.category),
        category: params.category,
        tier: entitlement.effective_tier,
    }))
}

/// GET /api/v1/payments
pub async fn handle_payment_history(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<PaymentHistoryResponse>, AppError> {
    let payments = state.engine.payment_history(params.user_id).await?;
    Ok(Json(PaymentHistoryResponse { payments }))
}

/// GET /api/v1/enterprise/account
pub async fn handle_enterprise_account(
    EnterpriseCaller(profile): EnterpriseCaller,
) -> Json<Entitlement> {
    Json(Entitlement::from_profile(&profile, Utc::now()))
}
