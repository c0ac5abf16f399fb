//! Profile and payment storage seams.
//!
//! `ProfileStore` is the only owner of profile state. Every entitlement
//! mutation runs inside an `EntitlementTx`, which is also the critical
//! section for the duplicate-check-then-insert sequence on an external
//! event reference.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::billing::error::StoreError;
use crate::billing::plans::{BillingInterval, PlanType};
use crate::billing::tier::{SubscriptionStatus, SubscriptionTier};
use crate::models::payment::PaymentRow;
use crate::models::profile::ProfileRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub extra_cv_credits: u32,
    pub lifetime_access: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Tier used for gating at `now`. A lapsed, non-lifetime subscription
    /// gates as free; the stored tier itself is left alone.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> SubscriptionTier {
        match self.subscription_expires_at {
            Some(expires_at) if !self.lifetime_access && expires_at <= now => {
                SubscriptionTier::Free
            }
            _ => self.subscription_tier,
        }
    }
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(UserProfile {
            subscription_tier: SubscriptionTier::from_str(&row.subscription_tier)
                .map_err(|e| StoreError::Corrupt(format!("profile {}: {e}", row.id)))?,
            subscription_status: SubscriptionStatus::from_str(&row.subscription_status)
                .map_err(|e| StoreError::Corrupt(format!("profile {}: {e}", row.id)))?,
            subscription_expires_at: row.subscription_expires_at,
            extra_cv_credits: u32::try_from(row.extra_cv_credits).unwrap_or(0),
            lifetime_access: row.lifetime_access,
            updated_at: row.updated_at,
            id: row.id,
            email: row.email,
        })
    }
}

/// Full replacement of the entitlement columns of one profile.
///
/// `lifetime_access` can only be switched on, and `add_extra_cv_credits` is
/// added to the stored balance, never subtracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub grant_lifetime_access: bool,
    pub add_extra_cv_credits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" => Ok(PaymentStatus::Canceled),
            other => Err(StoreError::Corrupt(format!("payment status '{other}'"))),
        }
    }
}

/// A payment record before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentRecord {
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub subscription_tier: SubscriptionTier,
    pub plan_type: Option<PlanType>,
    pub billing_interval: Option<BillingInterval>,
    pub external_payment_ref: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub subscription_tier: SubscriptionTier,
    pub plan_type: Option<PlanType>,
    pub billing_interval: Option<BillingInterval>,
    pub external_payment_ref: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let plan_type = row
            .plan_type
            .as_deref()
            .map(PlanType::from_str)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?;
        let billing_interval = match row.billing_interval.as_deref() {
            None => None,
            Some("one_time") => Some(BillingInterval::OneTime),
            Some("month") => Some(BillingInterval::Month),
            Some("year") => Some(BillingInterval::Year),
            Some("lifetime") => Some(BillingInterval::Lifetime),
            Some(other) => {
                return Err(StoreError::Corrupt(format!(
                    "payment {}: billing interval '{other}'",
                    row.id
                )))
            }
        };

        Ok(PaymentRecord {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse()?,
            subscription_tier: SubscriptionTier::from_str(&row.subscription_tier)
                .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?,
            plan_type,
            billing_interval,
            external_payment_ref: row.external_payment_ref,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// API keys are stored as SHA-256 hex digests; callers hash before lookup.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError>;

    /// Case-insensitive.
    async fn get_profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn get_profile_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<UserProfile>, StoreError>;

    /// Newest first.
    async fn list_payment_records(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn EntitlementTx>, StoreError>;
}

/// Unit of work for one entitlement change. Dropping without `commit`
/// discards every staged write.
#[async_trait]
pub trait EntitlementTx: Send {
    /// Serializes concurrent work on the same external reference until the
    /// transaction ends.
    async fn lock_external_ref(&mut self, external_ref: &str) -> Result<(), StoreError>;

    async fn find_payment_record_by_external_ref(
        &mut self,
        external_ref: &str,
    ) -> Result<Option<PaymentRecord>, StoreError>;

    /// Fails with `StoreError::NotFound` when no profile has this id.
    async fn update_profile(&mut self, id: Uuid, update: &ProfileUpdate) -> Result<(), StoreError>;

    /// Fails with `StoreError::Conflict` when the external reference is
    /// already recorded. A failure here leaves earlier writes in the
    /// transaction intact.
    async fn insert_payment_record(
        &mut self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>, StoreError>;
}
