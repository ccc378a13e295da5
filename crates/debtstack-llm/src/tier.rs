//! Tiered model policy.
//!
//! Three tiers, cheapest first. Callers pin a tier per call; the fix loop
//! escalates one level at a time and saturates at the top.

use serde::{Deserialize, Serialize};

/// Model capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Fast, cheap model for routine extraction
    Fast,
    /// Mid-capability model
    Standard,
    /// High-capability model, reserved for escalations
    Advanced,
}

impl ModelTier {
    /// One tier up, saturating at `Advanced`.
    pub const fn escalate(&self) -> Self {
        match self {
            Self::Fast => Self::Standard,
            Self::Standard | Self::Advanced => Self::Advanced,
        }
    }

    /// Stable label used in provenance and metadata.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Advanced => "advanced",
        }
    }
}

/// Pricing for one tier, dollars per million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPricing {
    /// Model identifier sent to the provider
    pub model: String,
    /// Input price, $/1M tokens
    pub input_per_mtok: f64,
    /// Output price, $/1M tokens
    pub output_per_mtok: f64,
}

/// Model identifiers and pricing per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Fast tier
    pub fast: TierPricing,
    /// Standard tier
    pub standard: TierPricing,
    /// Advanced tier
    pub advanced: TierPricing,
}

impl TierPolicy {
    /// Pricing entry for a tier.
    pub fn pricing(&self, tier: ModelTier) -> &TierPricing {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Standard => &self.standard,
            ModelTier::Advanced => &self.advanced,
        }
    }

    /// Model identifier for a tier.
    pub fn model(&self, tier: ModelTier) -> &str {
        &self.pricing(tier).model
    }

    /// Dollar cost of a call at a tier.
    pub fn cost(&self, tier: ModelTier, input_tokens: u64, output_tokens: u64) -> f64 {
        let pricing = self.pricing(tier);
        (input_tokens as f64 * pricing.input_per_mtok
            + output_tokens as f64 * pricing.output_per_mtok)
            / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn policy() -> TierPolicy {
        TierPolicy {
            fast: TierPricing {
                model: "small-1".to_string(),
                input_per_mtok: 0.15,
                output_per_mtok: 0.60,
            },
            standard: TierPricing {
                model: "mid-1".to_string(),
                input_per_mtok: 3.00,
                output_per_mtok: 15.00,
            },
            advanced: TierPricing {
                model: "large-1".to_string(),
                input_per_mtok: 15.00,
                output_per_mtok: 75.00,
            },
        }
    }

    #[test]
    fn test_escalation_saturates() {
        assert_eq!(ModelTier::Fast.escalate(), ModelTier::Standard);
        assert_eq!(ModelTier::Standard.escalate(), ModelTier::Advanced);
        assert_eq!(ModelTier::Advanced.escalate(), ModelTier::Advanced);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ModelTier::Fast < ModelTier::Standard);
        assert!(ModelTier::Standard < ModelTier::Advanced);
    }

    #[test]
    fn test_cost() {
        let policy = policy();
        // 100k input + 10k output on the fast tier.
        let cost = policy.cost(ModelTier::Fast, 100_000, 10_000);
        assert_relative_eq!(cost, 0.015 + 0.006, epsilon = 1e-12);
        assert_eq!(policy.model(ModelTier::Advanced), "large-1");
    }
}
