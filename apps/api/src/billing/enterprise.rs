use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use tracing::warn;

use crate::billing::error::BillingError;
use crate::billing::store::{hash_api_key, ProfileStore, UserProfile};
use crate::billing::tier::SubscriptionTier;
use crate::errors::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolves an API key to an enterprise profile.
///
/// A lapsed enterprise subscription is gated like any other lapsed tier.
pub async fn authorize(
    store: &dyn ProfileStore,
    api_key: Option<&str>,
) -> Result<UserProfile, BillingError> {
    let key = api_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(BillingError::InvalidCredential)?;

    let profile = store
        .get_profile_by_api_key_hash(&hash_api_key(key))
        .await?
        .ok_or(BillingError::InvalidCredential)?;

    let tier = profile.effective_tier(Utc::now());
    if tier != SubscriptionTier::Enterprise {
        warn!(
            "API access denied for user {}: tier {tier} is not enterprise",
            profile.id
        );
        return Err(BillingError::TierNotAuthorized(tier));
    }
    Ok(profile)
}

/// Extractor for handlers behind the enterprise API gate.
pub struct EnterpriseCaller(pub UserProfile);

#[async_trait]
impl FromRequestParts<AppState> for EnterpriseCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        let profile = authorize(state.engine.store().as_ref(), key).await?;
        Ok(EnterpriseCaller(profile))
    }
}
