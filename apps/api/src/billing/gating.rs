//! Limit checks consumed by UI gating. Pure functions: safe to call
//! speculatively, e.g. to disable a button, without committing to anything.

use serde::Serialize;

use crate::billing::tier::{limits_for, Quota, SubscriptionTier, TemplateCategory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradePrompt {
    pub message: String,
    pub suggested_tier: Option<SubscriptionTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub limit: Quota,
    pub used: u32,
    pub extra_credits: u32,
    /// Present whenever `allowed` is false.
    pub upgrade_prompt: Option<UpgradePrompt>,
}

fn decide(
    tier: SubscriptionTier,
    limit: Quota,
    used: u32,
    extra_credits: u32,
    noun: &str,
) -> GateDecision {
    let allowed = limit.permits(used, extra_credits);
    let upgrade_prompt = (!allowed).then(|| {
        let suggested_tier = tier.suggested_upgrade();
        let message = match suggested_tier {
            Some(next) => format!(
                "You have reached the {noun} limit of the {tier} plan. Upgrade to {next} to continue."
            ),
            None => format!("You have reached the {noun} limit of the {tier} plan."),
        };
        UpgradePrompt {
            message,
            suggested_tier,
        }
    });

    GateDecision {
        allowed,
        limit,
        used,
        extra_credits,
        upgrade_prompt,
    }
}

/// `allowed = cvs == unlimited || current_count < cvs + extra_credits`
pub fn can_create_cv(tier: SubscriptionTier, current_count: u32, extra_credits: u32) -> GateDecision {
    decide(tier, limits_for(tier).cvs, current_count, extra_credits, "CV")
}

/// Same rule as CVs; purchased CV credits do not count towards exports.
pub fn can_export(tier: SubscriptionTier, current_count: u32) -> GateDecision {
    decide(tier, limits_for(tier).exports, current_count, 0, "export")
}

pub fn can_use_template(tier: SubscriptionTier, category: TemplateCategory) -> bool {
    limits_for(tier).allows_template(category)
}
