//! In-memory store, directory, and provider doubles for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::billing::error::StoreError;
use crate::billing::provider::{
    CheckoutSession, CheckoutSessionRequest, PaymentProvider, ProviderError,
};
use crate::billing::store::{
    hash_api_key, EntitlementTx, IdentityDirectory, NewPaymentRecord, PaymentRecord,
    ProfileStore, ProfileUpdate, UserProfile,
};
use crate::billing::tier::{SubscriptionStatus, SubscriptionTier};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub profiles: HashMap<Uuid, UserProfile>,
    pub api_keys: HashMap<String, Uuid>,
    pub payments: Vec<PaymentRecord>,
    pub profile_updates: usize,
    pub fail_payment_inserts: bool,
}

/// One lock over the whole state: a transaction holds it from `begin` to
/// commit/drop, which serializes every entitlement change.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_profile(&self, email: &str, tier: SubscriptionTier) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.profiles.insert(
            id,
            UserProfile {
                id,
                email: email.to_string(),
                subscription_tier: tier,
                subscription_status: if tier == SubscriptionTier::Free {
                    SubscriptionStatus::Inactive
                } else {
                    SubscriptionStatus::Active
                },
                subscription_expires_at: None,
                extra_cv_credits: 0,
                lifetime_access: false,
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub async fn set_api_key(&self, user_id: Uuid, key: &str) {
        self.state
            .lock()
            .await
            .api_keys
            .insert(hash_api_key(key), user_id);
    }

    pub async fn fail_payment_inserts(&self, fail: bool) {
        self.state.lock().await.fail_payment_inserts = fail;
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn profile(&self, id: Uuid) -> UserProfile {
        self.state.lock().await.profiles[&id].clone()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state.lock().await.profiles.get(&id).cloned())
    }

    async fn get_profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .profiles
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_profile_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<UserProfile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .api_keys
            .get(key_hash)
            .and_then(|id| state.profiles.get(id))
            .cloned())
    }

    async fn list_payment_records(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        records.reverse();
        Ok(records)
    }

    async fn begin(&self) -> Result<Box<dyn EntitlementTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl EntitlementTx for MemoryTx {
    async fn lock_external_ref(&mut self, _external_ref: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_payment_record_by_external_ref(
        &mut self,
        external_ref: &str,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self
            .staged
            .payments
            .iter()
            .find(|p| p.external_payment_ref == external_ref)
            .cloned())
    }

    async fn update_profile(&mut self, id: Uuid, update: &ProfileUpdate) -> Result<(), StoreError> {
        let profile = self
            .staged
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {id}")))?;
        profile.subscription_tier = update.subscription_tier;
        profile.subscription_status = update.subscription_status;
        profile.subscription_expires_at = update.subscription_expires_at;
        profile.lifetime_access |= update.grant_lifetime_access;
        profile.extra_cv_credits += update.add_extra_cv_credits;
        profile.updated_at = Utc::now();
        self.staged.profile_updates += 1;
        Ok(())
    }

    async fn insert_payment_record(
        &mut self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, StoreError> {
        if self.staged.fail_payment_inserts {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        // payments.user_id references profiles.id
        if !self.staged.profiles.contains_key(&record.user_id) {
            return Err(StoreError::NotFound(format!("profile {}", record.user_id)));
        }
        if self
            .staged
            .payments
            .iter()
            .any(|p| p.external_payment_ref == record.external_payment_ref)
        {
            return Err(StoreError::Conflict(record.external_payment_ref));
        }
        let stored = stored_record(record);
        self.staged.payments.push(stored.clone());
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

fn stored_record(record: NewPaymentRecord) -> PaymentRecord {
    PaymentRecord {
        id: Uuid::new_v4(),
        user_id: record.user_id,
        amount: record.amount,
        currency: record.currency,
        status: record.status,
        subscription_tier: record.subscription_tier,
        plan_type: record.plan_type,
        billing_interval: record.billing_interval,
        external_payment_ref: record.external_payment_ref,
        metadata: record.metadata,
        created_at: Utc::now(),
    }
}

#[derive(Clone, Default)]
pub struct MemoryDirectory {
    users: Arc<StdMutex<HashMap<String, Uuid>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, email: &str, id: Uuid) {
        self.users
            .lock()
            .unwrap()
            .insert(email.to_ascii_lowercase(), id);
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(&email.to_ascii_lowercase())
            .copied())
    }
}

/// Records every checkout request and answers with a canned session.
#[derive(Clone, Default)]
pub struct RecordingProvider {
    pub requests: Arc<StdMutex<Vec<CheckoutSessionRequest>>>,
    pub fail_with: Arc<StdMutex<Option<(u16, String)>>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_request(&self) -> Option<CheckoutSessionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentProvider for RecordingProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        if let Some((status, message)) = self.fail_with.lock().unwrap().clone() {
            return Err(ProviderError::Api { status, message });
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let id = format!("cs_test_{}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }
}
