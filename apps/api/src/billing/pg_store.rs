//! Postgres-backed profile store and identity directory.

use async_trait::async_trait;
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::billing::error::StoreError;
use crate::billing::store::{
    EntitlementTx, IdentityDirectory, NewPaymentRecord, PaymentRecord, ProfileStore,
    ProfileUpdate, UserProfile,
};
use crate::models::payment::PaymentRow;
use crate::models::profile::ProfileRow;
use crate::models::user::User;

const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(UserProfile::try_from)
            .transpose()
    }

    async fn get_profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError> {
        sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .map(UserProfile::try_from)
            .transpose()
    }

    async fn get_profile_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<UserProfile>, StoreError> {
        sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE api_key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(UserProfile::try_from)
            .transpose()
    }

    async fn list_payment_records(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, StoreError> {
        sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PaymentRecord::try_from)
        .collect()
    }

    async fn begin(&self) -> Result<Box<dyn EntitlementTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgEntitlementTx { tx }))
    }
}

pub struct PgEntitlementTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EntitlementTx for PgEntitlementTx {
    async fn lock_external_ref(&mut self, external_ref: &str) -> Result<(), StoreError> {
        // Released automatically at COMMIT/ROLLBACK.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(external_ref)
            .execute(&mut *self.tx)
            .await?;
        debug!("Acquired event lock for {external_ref}");
        Ok(())
    }

    async fn find_payment_record_by_external_ref(
        &mut self,
        external_ref: &str,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE external_payment_ref = $1")
            .bind(external_ref)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn update_profile(&mut self, id: Uuid, update: &ProfileUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET subscription_tier = $2,
                subscription_status = $3,
                subscription_expires_at = $4,
                lifetime_access = lifetime_access OR $5,
                extra_cv_credits = extra_cv_credits + $6,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.subscription_tier.as_str())
        .bind(update.subscription_status.as_str())
        .bind(update.subscription_expires_at)
        .bind(update.grant_lifetime_access)
        .bind(i32::try_from(update.add_extra_cv_credits).unwrap_or(i32::MAX))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("profile {id}")));
        }
        Ok(())
    }

    async fn insert_payment_record(
        &mut self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, StoreError> {
        // Savepoint: a failed insert must not take the profile update with it.
        let mut savepoint = Acquire::begin(&mut self.tx).await?;

        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            INSERT INTO payments
                (id, user_id, amount, currency, status, subscription_tier,
                 plan_type, billing_interval, external_payment_ref, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (external_payment_ref) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(record.subscription_tier.as_str())
        .bind(record.plan_type.map(|p| p.as_str()))
        .bind(record.billing_interval.map(|i| i.as_str()))
        .bind(&record.external_payment_ref)
        .bind(&record.metadata)
        .fetch_optional(&mut *savepoint)
        .await
        .map_err(|e| match e {
            // payments.user_id has no matching profile
            sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                StoreError::NotFound(format!("profile {}", record.user_id))
            }
            other => StoreError::Database(other),
        })?;

        savepoint.commit().await?;

        let row = row.ok_or_else(|| {
            StoreError::Conflict(format!(
                "payment {} already recorded",
                record.external_payment_ref
            ))
        })?;
        PaymentRecord::try_from(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>, StoreError> {
        let user: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE lower(email) = lower($1) LIMIT 1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user.map(|u| u.id))
    }
}
