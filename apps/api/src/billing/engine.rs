//! Entitlement Engine — every tier change goes through here.
//!
//! Flow for a payment event:
//!   resolve user → lock + duplicate check on the event id → profile update
//!   (succeeded only) → append PaymentRecord → commit.
//!
//! Delivery is at-least-once; application is at-most-once per event id.
//! A failed audit insert after a successful profile update keeps the
//! upgrade and reports the event as partially applied.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::error::{BillingError, StoreError};
use crate::billing::plans::{resolve_plan, Plan};
use crate::billing::store::{
    EntitlementTx, IdentityDirectory, NewPaymentRecord, PaymentRecord, PaymentStatus,
    ProfileStore, ProfileUpdate, UserProfile,
};
use crate::billing::tier::{limits_for, Limits, SubscriptionStatus, SubscriptionTier};
use crate::billing::webhook::{EventMetadata, PaymentEvent};

/// Result of applying one event or override.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Profile updated and audit record written.
    Applied {
        user_id: Uuid,
        tier: SubscriptionTier,
        external_ref: String,
    },
    /// The event id was already applied; nothing changed.
    Duplicate { external_ref: String },
    /// Non-success payment recorded; the profile was not touched.
    Recorded {
        user_id: Uuid,
        payment_status: PaymentStatus,
        external_ref: String,
    },
    /// Profile updated but the audit record could not be written.
    PartiallyApplied {
        user_id: Uuid,
        tier: SubscriptionTier,
        external_ref: String,
        reason: String,
    },
}

/// Who an override or event targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    Id(Uuid),
    Email(String),
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRef::Id(id) => write!(f, "user {id}"),
            UserRef::Email(email) => write!(f, "email {email}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualOverride {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub tier: SubscriptionTier,
    pub reason: Option<String>,
}

impl ManualOverride {
    fn target(&self) -> Result<UserRef, BillingError> {
        match (self.user_id, self.email.as_deref().map(str::trim)) {
            (Some(id), _) => Ok(UserRef::Id(id)),
            (None, Some(email)) if !email.is_empty() => Ok(UserRef::Email(email.to_string())),
            _ => Err(BillingError::Validation(
                "user_id or email is required".to_string(),
            )),
        }
    }
}

/// Entitlement view handed to gating UIs and the enterprise API.
#[derive(Debug, Clone, Serialize)]
pub struct Entitlement {
    pub user_id: Uuid,
    pub subscription_tier: SubscriptionTier,
    pub effective_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub lifetime_access: bool,
    pub extra_cv_credits: u32,
    pub limits: Limits,
}

impl Entitlement {
    pub fn from_profile(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        let effective_tier = profile.effective_tier(now);
        Entitlement {
            user_id: profile.id,
            subscription_tier: profile.subscription_tier,
            effective_tier,
            subscription_status: profile.subscription_status,
            subscription_expires_at: profile.subscription_expires_at,
            lifetime_access: profile.lifetime_access,
            extra_cv_credits: profile.extra_cv_credits,
            limits: limits_for(effective_tier),
        }
    }
}

/// Everything needed to apply one change, resolved before the transaction.
struct EntitlementChange<'a> {
    user_id: Uuid,
    tier: SubscriptionTier,
    plan: Option<&'a Plan>,
    status: PaymentStatus,
    external_ref: &'a str,
    amount: i64,
    currency: &'a str,
    metadata: Value,
}

impl EntitlementChange<'_> {
    fn profile_update(&self, now: DateTime<Utc>) -> ProfileUpdate {
        match self.plan {
            Some(plan) => ProfileUpdate {
                subscription_tier: self.tier,
                subscription_status: SubscriptionStatus::Active,
                subscription_expires_at: plan.interval.period_end(now),
                grant_lifetime_access: plan.is_lifetime(),
                add_extra_cv_credits: plan.cv_credits,
            },
            None => ProfileUpdate {
                subscription_tier: self.tier,
                subscription_status: SubscriptionStatus::Active,
                subscription_expires_at: None,
                grant_lifetime_access: false,
                add_extra_cv_credits: 0,
            },
        }
    }

    fn payment_record(&self) -> NewPaymentRecord {
        NewPaymentRecord {
            user_id: self.user_id,
            amount: self.amount,
            currency: self.currency.to_string(),
            status: self.status,
            subscription_tier: self.tier,
            plan_type: self.plan.map(|p| p.plan_type),
            billing_interval: self.plan.map(|p| p.interval),
            external_payment_ref: self.external_ref.to_string(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Clone)]
pub struct EntitlementEngine {
    store: Arc<dyn ProfileStore>,
    directory: Arc<dyn IdentityDirectory>,
}

impl EntitlementEngine {
    pub fn new(store: Arc<dyn ProfileStore>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Applies a provider event. Safe to call repeatedly with the same event.
    pub async fn apply_payment_event(
        &self,
        event: &PaymentEvent,
    ) -> Result<ApplyOutcome, BillingError> {
        let user_id = self.resolve_user(&event_target(&event.metadata)?).await?;
        let (tier, plan) = resolve_event_tier(&event.metadata)?;

        let change = EntitlementChange {
            user_id,
            tier,
            plan: plan.as_ref(),
            status: event.status,
            external_ref: &event.event_id,
            amount: event.amount_minor,
            currency: &event.currency,
            metadata: json!({
                "source": "webhook",
                "eventType": event.event_type,
                "objectId": event.raw.get("id"),
            }),
        };

        let mut tx = self.store.begin().await?;
        tx.lock_external_ref(&event.event_id).await?;

        if let Some(existing) = tx
            .find_payment_record_by_external_ref(&event.event_id)
            .await?
        {
            if existing.status == PaymentStatus::Succeeded {
                info!(
                    "Duplicate delivery of {} for user {user_id}; already applied",
                    event.event_id
                );
                return Ok(ApplyOutcome::Duplicate {
                    external_ref: event.event_id.clone(),
                });
            }
        }

        self.apply_change(tx, change).await
    }

    /// Operator tier fix. Uses a fresh synthetic reference and skips the
    /// duplicate check: an explicit override always applies.
    pub async fn apply_manual_override(
        &self,
        request: &ManualOverride,
    ) -> Result<ApplyOutcome, BillingError> {
        let user_id = self.resolve_user(&request.target()?).await?;
        let external_ref = format!("manual_{}", Uuid::new_v4());

        let change = EntitlementChange {
            user_id,
            tier: request.tier,
            plan: None,
            status: PaymentStatus::Succeeded,
            external_ref: &external_ref,
            amount: 0,
            currency: "usd",
            metadata: json!({
                "source": "manual_override",
                "reason": request.reason,
            }),
        };

        info!(
            "Manual override for user {user_id}: tier -> {} ({})",
            request.tier, external_ref
        );
        let tx = self.store.begin().await?;
        self.apply_change(tx, change).await
    }

    pub async fn entitlement(&self, user_id: Uuid) -> Result<Entitlement, BillingError> {
        self.entitlement_for(&UserRef::Id(user_id)).await
    }

    /// Looks the profile up directly; the identity directory is not consulted.
    pub async fn entitlement_for(&self, target: &UserRef) -> Result<Entitlement, BillingError> {
        let profile = match target {
            UserRef::Id(id) => self.store.get_profile(*id).await?,
            UserRef::Email(email) => self.store.get_profile_by_email(email).await?,
        };
        let profile = profile.ok_or_else(|| BillingError::UserNotFound(target.to_string()))?;
        Ok(Entitlement::from_profile(&profile, Utc::now()))
    }

    pub async fn payment_history(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, BillingError> {
        Ok(self.store.list_payment_records(user_id).await?)
    }

    /// Profile update (succeeded only), then the audit record, then commit.
    async fn apply_change(
        &self,
        mut tx: Box<dyn EntitlementTx>,
        change: EntitlementChange<'_>,
    ) -> Result<ApplyOutcome, BillingError> {
        let user_id = change.user_id;
        let external_ref = change.external_ref.to_string();

        if change.status != PaymentStatus::Succeeded {
            return match tx.insert_payment_record(change.payment_record()).await {
                Ok(_) => {
                    tx.commit().await?;
                    info!(
                        "Recorded {} payment {external_ref} for user {user_id}; tier unchanged",
                        change.status.as_str()
                    );
                    Ok(ApplyOutcome::Recorded {
                        user_id,
                        payment_status: change.status,
                        external_ref,
                    })
                }
                Err(StoreError::Conflict(_)) => {
                    info!("Payment {external_ref} already recorded; skipping");
                    Ok(ApplyOutcome::Duplicate { external_ref })
                }
                Err(StoreError::NotFound(_)) => {
                    Err(BillingError::UserNotFound(UserRef::Id(user_id).to_string()))
                }
                Err(e) => Err(e.into()),
            };
        }

        match tx.update_profile(user_id, &change.profile_update(Utc::now())).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(BillingError::UserNotFound(UserRef::Id(user_id).to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = match tx.insert_payment_record(change.payment_record()).await {
            Ok(_) => {
                info!(
                    "Applied {external_ref}: user {user_id} -> tier {}",
                    change.tier
                );
                ApplyOutcome::Applied {
                    user_id,
                    tier: change.tier,
                    external_ref,
                }
            }
            Err(e) => {
                error!(
                    "PARTIAL APPLICATION: user {user_id} moved to tier {} but payment record {external_ref} failed: {e}",
                    change.tier
                );
                ApplyOutcome::PartiallyApplied {
                    user_id,
                    tier: change.tier,
                    external_ref,
                    reason: e.to_string(),
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn resolve_user(&self, target: &UserRef) -> Result<Uuid, BillingError> {
        match target {
            UserRef::Id(id) => Ok(*id),
            UserRef::Email(email) => match self.directory.find_user_by_email(email).await? {
                Some(id) => Ok(id),
                None => {
                    warn!("No user found for {target}");
                    Err(BillingError::UserNotFound(target.to_string()))
                }
            },
        }
    }
}

fn event_target(metadata: &EventMetadata) -> Result<UserRef, BillingError> {
    if let Some(id) = metadata.user_id()? {
        return Ok(UserRef::Id(id));
    }
    metadata
        .email()
        .map(|email| UserRef::Email(email.to_string()))
        .ok_or_else(|| BillingError::UserNotFound("event without userId or email".to_string()))
}

/// `planType` decides the tier; `subscriptionTier` is only a fallback for
/// events that carry no plan.
fn resolve_event_tier(
    metadata: &EventMetadata,
) -> Result<(SubscriptionTier, Option<Plan>), BillingError> {
    if let Some(token) = metadata.plan_type.as_deref().filter(|t| !t.trim().is_empty()) {
        let plan = resolve_plan(token)?;
        if let Some(claimed) = metadata.subscription_tier.as_deref() {
            if claimed.parse::<SubscriptionTier>().ok() != Some(plan.tier) {
                warn!(
                    "Event metadata tier '{claimed}' disagrees with plan {} ({}); using the plan",
                    plan.plan_type, plan.tier
                );
            }
        }
        return Ok((plan.tier, Some(plan)));
    }

    match metadata.subscription_tier.as_deref() {
        Some(raw) => raw
            .parse::<SubscriptionTier>()
            .map(|tier| (tier, None))
            .map_err(|e| BillingError::Validation(format!("subscriptionTier: {e}"))),
        None => Err(BillingError::Validation(
            "event metadata has no planType or subscriptionTier".to_string(),
        )),
    }
}
