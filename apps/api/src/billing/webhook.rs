//! Inbound payment events: signature verification and translation of
//! provider payloads into `PaymentEvent`s.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::billing::error::BillingError;
use crate::billing::store::PaymentStatus;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
/// Maximum age of a signed payload, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Checks a `t=<unix>,v1=<hex>` signature header against the raw body.
/// Any one matching `v1` entry is enough, which lets the provider roll
/// secrets.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), BillingError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| BillingError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(BillingError::InvalidSignature(
            "no v1 signature".to_string(),
        ));
    }
    if now_unix.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(BillingError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| BillingError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(BillingError::InvalidSignature(
        "no signature matches payload".to_string(),
    ))
}

/// Who the event is for and what they bought, as carried in metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "plan_type")]
    pub plan_type: Option<String>,
    #[serde(default, alias = "subscription_tier")]
    pub subscription_tier: Option<String>,
}

impl EventMetadata {
    pub fn user_id(&self) -> Result<Option<Uuid>, BillingError> {
        match self.user_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Uuid::parse_str(raw)
                .map(Some)
                .map_err(|_| BillingError::Validation(format!("metadata userId '{raw}' is not a UUID"))),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// A provider-neutral payment event.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    /// Idempotency key.
    pub event_id: String,
    pub event_type: String,
    pub status: PaymentStatus,
    pub metadata: EventMetadata,
    pub amount_minor: i64,
    pub currency: String,
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

/// Parses a verified payload. `Ok(None)` for event types that carry no
/// entitlement change; those are acknowledged and dropped.
pub fn parse_event(payload: &[u8]) -> Result<Option<PaymentEvent>, BillingError> {
    let envelope: StripeEnvelope = serde_json::from_slice(payload)
        .map_err(|e| BillingError::Validation(format!("malformed webhook payload: {e}")))?;
    let object = &envelope.data.object;

    let (status, metadata, amount) = match envelope.event_type.as_str() {
        "checkout.session.completed" => {
            let status = match str_field(object, "payment_status") {
                Some("paid") | Some("no_payment_required") => PaymentStatus::Succeeded,
                _ => PaymentStatus::Pending,
            };
            (status, object.get("metadata"), object.get("amount_total"))
        }
        "checkout.session.async_payment_succeeded" => (
            PaymentStatus::Succeeded,
            object.get("metadata"),
            object.get("amount_total"),
        ),
        "checkout.session.async_payment_failed" => (
            PaymentStatus::Failed,
            object.get("metadata"),
            object.get("amount_total"),
        ),
        "checkout.session.expired" => (
            PaymentStatus::Canceled,
            object.get("metadata"),
            object.get("amount_total"),
        ),
        // The first invoice of a subscription arrives alongside the checkout
        // session; only renewals are applied from invoices.
        "invoice.payment_succeeded" => {
            if str_field(object, "billing_reason") != Some("subscription_cycle") {
                return Ok(None);
            }
            (
                PaymentStatus::Succeeded,
                invoice_metadata(object),
                object.get("amount_paid"),
            )
        }
        "invoice.payment_failed" => (
            PaymentStatus::Failed,
            invoice_metadata(object),
            object.get("amount_due"),
        ),
        "customer.subscription.deleted" => (PaymentStatus::Canceled, object.get("metadata"), None),
        _ => return Ok(None),
    };

    let metadata = match metadata {
        Some(m) if !m.is_null() => serde_json::from_value::<EventMetadata>(m.clone())
            .map_err(|e| BillingError::Validation(format!("malformed event metadata: {e}")))?,
        _ => EventMetadata::default(),
    };

    Ok(Some(PaymentEvent {
        status,
        metadata,
        amount_minor: amount.and_then(Value::as_i64).unwrap_or(0),
        currency: str_field(object, "currency").unwrap_or("usd").to_string(),
        raw: object.clone(),
        event_id: envelope.id,
        event_type: envelope.event_type,
    }))
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn invoice_metadata(object: &Value) -> Option<&Value> {
    object
        .pointer("/subscription_details/metadata")
        .filter(|m| m.as_object().is_some_and(|o| !o.is_empty()))
        .or_else(|| object.get("metadata"))
}
