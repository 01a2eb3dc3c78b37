// SPDX-License-Identifier: Apache-2.0

//! Entitlement Evaluator
//!
//! Pure allow/deny decisions over the tier catalog.

use crate::feature::SubscriptionFeature;
use crate::tier::{limits_for, Tier};

/// Whether `tier` grants the boolean `feature`.
pub fn can_access(tier: Tier, feature: SubscriptionFeature) -> bool {
    limits_for(tier).allows(feature)
}

/// Whether a user holding `current_count` books may not add another.
/// Unbounded tiers never reach the limit.
pub fn has_reached_book_limit(tier: Tier, current_count: u32) -> bool {
    limits_for(tier).book_limit_reached(current_count)
}

/// Lowest tier that grants `feature`, used to suggest an upgrade target.
pub fn minimum_tier_for(feature: SubscriptionFeature) -> Tier {
    Tier::ALL
        .into_iter()
        .find(|tier| can_access(*tier, feature))
        .unwrap_or(Tier::Premium)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier_defines_every_feature() {
        for tier in Tier::ALL {
            for feature in SubscriptionFeature::ALL {
                // Exhaustive match in `allows`; this just walks the full grid.
                let _ = can_access(tier, feature);
            }
        }
    }

    #[test]
    fn free_tier_lacks_ai_author_summary() {
        assert!(!can_access(Tier::Free, SubscriptionFeature::AiAuthorSummary));
        assert!(can_access(Tier::Basic, SubscriptionFeature::AiAuthorSummary));
        assert!(!can_access(Tier::Basic, SubscriptionFeature::AiCustomization));
        assert!(can_access(Tier::Premium, SubscriptionFeature::AiCustomization));
    }

    #[test]
    fn book_limit_at_and_over_max() {
        assert!(!has_reached_book_limit(Tier::Free, 4));
        assert!(has_reached_book_limit(Tier::Free, 5));
        assert!(has_reached_book_limit(Tier::Free, 6));
        assert!(!has_reached_book_limit(Tier::Basic, 49));
        assert!(has_reached_book_limit(Tier::Basic, 50));
    }

    #[test]
    fn premium_never_reaches_book_limit() {
        for count in [0, 1, 50, 10_000, u32::MAX] {
            assert!(!has_reached_book_limit(Tier::Premium, count));
        }
    }

    #[test]
    fn minimum_tier_per_feature() {
        assert_eq!(minimum_tier_for(SubscriptionFeature::ExportToPdf), Tier::Basic);
        assert_eq!(minimum_tier_for(SubscriptionFeature::AiAuthorSummary), Tier::Basic);
        assert_eq!(minimum_tier_for(SubscriptionFeature::ExtendedAiSummary), Tier::Premium);
    }
}
