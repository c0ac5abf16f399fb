//! Plan catalog — the static, total mapping from purchasable SKU to tier and
//! pricing metadata.
//!
//! `resolve_plan` accepts canonical tokens only. Old SKU names go through
//! `remap_legacy_plan` first, which fails hard on anything it does not know.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::error::BillingError;
use crate::billing::tier::SubscriptionTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    MiniOneTime,
    ProMonthly,
    ProYearly,
    PremiumMonthly,
    PremiumYearly,
    PremiumLifetime,
    EnterpriseMonthly,
    EnterpriseYearly,
}

impl PlanType {
    pub const ALL: [PlanType; 8] = [
        PlanType::MiniOneTime,
        PlanType::ProMonthly,
        PlanType::ProYearly,
        PlanType::PremiumMonthly,
        PlanType::PremiumYearly,
        PlanType::PremiumLifetime,
        PlanType::EnterpriseMonthly,
        PlanType::EnterpriseYearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::MiniOneTime => "mini_one_time",
            PlanType::ProMonthly => "pro_monthly",
            PlanType::ProYearly => "pro_yearly",
            PlanType::PremiumMonthly => "premium_monthly",
            PlanType::PremiumYearly => "premium_yearly",
            PlanType::PremiumLifetime => "premium_lifetime",
            PlanType::EnterpriseMonthly => "enterprise_monthly",
            PlanType::EnterpriseYearly => "enterprise_yearly",
        }
    }

    /// Environment variable holding the provider price id for a recurring plan.
    pub fn price_env_var(&self) -> String {
        format!("STRIPE_PRICE_{}", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| BillingError::UnknownPlan(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    OneTime,
    Month,
    Year,
    Lifetime,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::OneTime => "one_time",
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
            BillingInterval::Lifetime => "lifetime",
        }
    }

    /// End of the paid period starting at `from`. `None` for purchases that
    /// never lapse on their own.
    pub fn period_end(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            BillingInterval::Month => from.checked_add_months(Months::new(1)),
            BillingInterval::Year => from.checked_add_months(Months::new(12)),
            BillingInterval::OneTime | BillingInterval::Lifetime => None,
        }
    }
}

/// Resolved plan: tier, recurrence, and display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub plan_type: PlanType,
    pub tier: SubscriptionTier,
    pub interval: BillingInterval,
    pub price_minor_units: i64,
    pub currency: &'static str,
    pub display_name: &'static str,
    pub feature_list: &'static [&'static str],
    /// Extra CV slots granted by a one-time purchase.
    pub cv_credits: u32,
}

impl Plan {
    pub fn is_recurring(&self) -> bool {
        matches!(self.interval, BillingInterval::Month | BillingInterval::Year)
    }

    pub fn is_lifetime(&self) -> bool {
        self.interval == BillingInterval::Lifetime
    }
}

const CURRENCY: &str = "usd";

const MINI_FEATURES: &[&str] = &[
    "1 CV",
    "3 PDF exports",
    "Basic and professional templates",
];
const PRO_FEATURES: &[&str] = &[
    "5 CVs",
    "50 exports",
    "Creative templates",
    "Cover letter builder",
];
const PREMIUM_FEATURES: &[&str] = &[
    "Unlimited CVs",
    "Unlimited exports",
    "All templates including executive",
    "Priority support",
];
const ENTERPRISE_FEATURES: &[&str] = &[
    "Everything in Premium",
    "Bulk CV generation",
    "Programmatic API access",
    "Dedicated account manager",
];

/// The one place a plan token becomes a tier. Exhaustive over `PlanType`, so
/// a new variant without a row does not compile.
pub fn plan_for(plan_type: PlanType) -> Plan {
    let (tier, interval, price_minor_units, display_name, feature_list, cv_credits) =
        match plan_type {
            PlanType::MiniOneTime => (
                SubscriptionTier::Mini,
                BillingInterval::OneTime,
                299,
                "Mini (one-time)",
                MINI_FEATURES,
                1,
            ),
            PlanType::ProMonthly => (
                SubscriptionTier::Pro,
                BillingInterval::Month,
                999,
                "Pro Monthly",
                PRO_FEATURES,
                0,
            ),
            PlanType::ProYearly => (
                SubscriptionTier::Pro,
                BillingInterval::Year,
                7999,
                "Pro Yearly",
                PRO_FEATURES,
                0,
            ),
            PlanType::PremiumMonthly => (
                SubscriptionTier::Premium,
                BillingInterval::Month,
                1999,
                "Premium Monthly",
                PREMIUM_FEATURES,
                0,
            ),
            PlanType::PremiumYearly => (
                SubscriptionTier::Premium,
                BillingInterval::Year,
                14999,
                "Premium Yearly",
                PREMIUM_FEATURES,
                0,
            ),
            PlanType::PremiumLifetime => (
                SubscriptionTier::Premium,
                BillingInterval::Lifetime,
                29900,
                "Premium Lifetime",
                PREMIUM_FEATURES,
                0,
            ),
            PlanType::EnterpriseMonthly => (
                SubscriptionTier::Enterprise,
                BillingInterval::Month,
                4999,
                "Enterprise Monthly",
                ENTERPRISE_FEATURES,
                0,
            ),
            PlanType::EnterpriseYearly => (
                SubscriptionTier::Enterprise,
                BillingInterval::Year,
                49900,
                "Enterprise Yearly",
                ENTERPRISE_FEATURES,
                0,
            ),
        };

    Plan {
        plan_type,
        tier,
        interval,
        price_minor_units,
        currency: CURRENCY,
        display_name,
        feature_list,
        cv_credits,
    }
}

/// Resolves a canonical plan token. Legacy aliases are NOT accepted here.
pub fn resolve_plan(token: &str) -> Result<Plan, BillingError> {
    token.trim().parse::<PlanType>().map(plan_for)
}

/// Old SKU names still sent by the legacy checkout endpoint.
const LEGACY_ALIASES: &[(&str, PlanType)] = &[
    ("basic", PlanType::MiniOneTime),
    ("one_time", PlanType::MiniOneTime),
    ("pro", PlanType::ProMonthly),
    ("monthly", PlanType::ProMonthly),
    ("yearly", PlanType::ProYearly),
    ("premium", PlanType::PremiumMonthly),
    ("lifetime", PlanType::PremiumLifetime),
    ("business", PlanType::EnterpriseMonthly),
    ("enterprise", PlanType::EnterpriseMonthly),
];

/// Rewrites a legacy token to its canonical plan. Canonical tokens pass
/// through unchanged; anything else is `UnknownPlan` right here rather than
/// at a later resolution step.
pub fn remap_legacy_plan(token: &str) -> Result<PlanType, BillingError> {
    let token = token.trim();
    if let Ok(plan_type) = token.parse::<PlanType>() {
        return Ok(plan_type);
    }
    LEGACY_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(token))
        .map(|(_, plan_type)| *plan_type)
        .ok_or_else(|| BillingError::UnknownPlan(token.to_string()))
}

pub fn catalog() -> Vec<Plan> {
    PlanType::ALL.into_iter().map(plan_for).collect()
}
