//! Subscription tiers, statuses, and the per-tier limit table.
//!
//! Limits are fixed at deploy time. A tier is looked up, never compared
//! ordinally; the only privileged tier check is `SubscriptionTier::Enterprise`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

/// Raw wire value for an unbounded limit.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Mini,
    Pro,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 5] = [
        SubscriptionTier::Free,
        SubscriptionTier::Mini,
        SubscriptionTier::Pro,
        SubscriptionTier::Premium,
        SubscriptionTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Mini => "mini",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Tier offered in an upgrade prompt when a limit is hit. `None` when the
    /// tier is already unbounded.
    pub fn suggested_upgrade(&self) -> Option<SubscriptionTier> {
        match self {
            SubscriptionTier::Free | SubscriptionTier::Mini => Some(SubscriptionTier::Pro),
            SubscriptionTier::Pro => Some(SubscriptionTier::Premium),
            SubscriptionTier::Premium | SubscriptionTier::Enterprise => None,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for SubscriptionTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionTier::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Canceled,
    PastDue,
    Trialing,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Trialing => "trialing",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Basic,
    Professional,
    Creative,
    Executive,
}

/// A countable allowance. Never compare the raw `-1` numerically; go
/// through `Quota::permits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Unlimited,
    AtMost(u32),
}

impl Quota {
    pub fn raw(&self) -> i64 {
        match self {
            Quota::Unlimited => UNLIMITED,
            Quota::AtMost(n) => i64::from(*n),
        }
    }

    /// True when `used` items leave room for one more, counting `bonus`
    /// additional slots on top of the base allowance.
    pub fn permits(&self, used: u32, bonus: u32) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::AtMost(base) => u64::from(used) < u64::from(*base) + u64::from(bonus),
        }
    }
}

impl Serialize for Quota {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.raw())
    }
}

/// Feature limits for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub cvs: Quota,
    pub exports: Quota,
    pub templates: &'static [TemplateCategory],
}

impl Limits {
    pub fn allows_template(&self, category: TemplateCategory) -> bool {
        self.templates.contains(&category)
    }
}

const ALL_TEMPLATES: &[TemplateCategory] = &[
    TemplateCategory::Basic,
    TemplateCategory::Professional,
    TemplateCategory::Creative,
    TemplateCategory::Executive,
];

/// | Tier       | CVs | Exports | Templates                     |
/// |------------|-----|---------|-------------------------------|
/// | free       | 1   | 1       | basic                         |
/// | mini       | 1   | 3       | basic, professional           |
/// | pro        | 5   | 50      | basic, professional, creative |
/// | premium    | ∞   | ∞       | all                           |
/// | enterprise | ∞   | ∞       | all                           |
pub fn limits_for(tier: SubscriptionTier) -> Limits {
    match tier {
        SubscriptionTier::Free => Limits {
            cvs: Quota::AtMost(1),
            exports: Quota::AtMost(1),
            templates: &[TemplateCategory::Basic],
        },
        SubscriptionTier::Mini => Limits {
            cvs: Quota::AtMost(1),
            exports: Quota::AtMost(3),
            templates: &[TemplateCategory::Basic, TemplateCategory::Professional],
        },
        SubscriptionTier::Pro => Limits {
            cvs: Quota::AtMost(5),
            exports: Quota::AtMost(50),
            templates: &[
                TemplateCategory::Basic,
                TemplateCategory::Professional,
                TemplateCategory::Creative,
            ],
        },
        SubscriptionTier::Premium | SubscriptionTier::Enterprise => Limits {
            cvs: Quota::Unlimited,
            exports: Quota::Unlimited,
            templates: ALL_TEMPLATES,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_is_case_insensitive() {
        assert_eq!("PRO".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Pro);
        assert_eq!(
            " enterprise ".parse::<SubscriptionTier>().unwrap(),
            SubscriptionTier::Enterprise
        );
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_every_tier_round_trips_through_str() {
        for tier in SubscriptionTier::ALL {
            assert_eq!(tier.as_str().parse::<SubscriptionTier>().unwrap(), tier);
        }
    }

    #[test]
    fn test_unlimited_quota_ignores_count() {
        assert!(Quota::Unlimited.permits(u32::MAX, 0));
    }

    #[test]
    fn test_bounded_quota_counts_bonus() {
        let q = Quota::AtMost(1);
        assert!(q.permits(0, 2));
        assert!(q.permits(2, 2));
        assert!(!q.permits(3, 2));
    }

    #[test]
    fn test_quota_serializes_unlimited_as_minus_one() {
        let limits = limits_for(SubscriptionTier::Premium);
        let json = serde_json::to_value(&limits).unwrap();
        assert_eq!(json["cvs"], -1);
        assert_eq!(json["exports"], -1);
        assert_eq!(json["templates"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_free_tier_only_basic_templates() {
        let limits = limits_for(SubscriptionTier::Free);
        assert!(limits.allows_template(TemplateCategory::Basic));
        assert!(!limits.allows_template(TemplateCategory::Professional));
        assert_eq!(limits.cvs, Quota::AtMost(1));
    }

    #[test]
    fn test_enterprise_is_unbounded() {
        let limits = limits_for(SubscriptionTier::Enterprise);
        assert_eq!(limits.cvs, Quota::Unlimited);
        assert_eq!(limits.exports.raw(), UNLIMITED);
        assert!(limits.allows_template(TemplateCategory::Executive));
    }

    #[test]
    fn test_upgrade_suggestions() {
        assert_eq!(
            SubscriptionTier::Free.suggested_upgrade(),
            Some(SubscriptionTier::Pro)
        );
        assert_eq!(
            SubscriptionTier::Pro.suggested_upgrade(),
            Some(SubscriptionTier::Premium)
        );
        assert_eq!(SubscriptionTier::Enterprise.suggested_upgrade(), None);
    }
}
