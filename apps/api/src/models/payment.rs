use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only. Rows are inserted once and never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub subscription_tier: String,
    pub plan_type: Option<String>,
    pub billing_interval: Option<String>,
    pub external_payment_ref: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
