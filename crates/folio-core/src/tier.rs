// SPDX-License-Identifier: Apache-2.0

//! Tier Catalog
//!
//! Static table of subscription tiers and the limits each one grants.
//! The table is process-wide constant data; lookups never fail.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feature::SubscriptionFeature;

/// Subscription tier determines which features are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Premium,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Basic, Tier::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
        }
    }

    /// Paid tiers are billed externally and take part in the monthly reset.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::Free)
    }

    /// Ordering used to classify a tier change as an upgrade or downgrade.
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Basic => 1,
            Tier::Premium => 2,
        }
    }

    /// Returns true if this tier is at least as high as `other`.
    pub fn includes(&self, other: Tier) -> bool {
        self.rank() >= other.rank()
    }

    pub fn limits(&self) -> &'static TierLimits {
        limits_for(*self)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown subscription tier: {0}")]
pub struct TierParseError(pub String);

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            other => Err(TierParseError(other.to_string())),
        }
    }
}

/// Feature limits for a subscription tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    /// Maximum books in the journal. None = unbounded.
    pub max_books: Option<u32>,
    pub ai_credits_per_month: u32,
    pub export_to_pdf: bool,
    pub advanced_note_format: bool,
    pub ai_author_summary: bool,
    pub ai_customization: bool,
    pub detailed_author_info: bool,
    pub extended_ai_summary: bool,
}

impl TierLimits {
    /// Whether the boolean feature flag is set for this tier.
    pub fn allows(&self, feature: SubscriptionFeature) -> bool {
        match feature {
            SubscriptionFeature::ExportToPdf => self.export_to_pdf,
            SubscriptionFeature::AdvancedNoteFormat => self.advanced_note_format,
            SubscriptionFeature::AiAuthorSummary => self.ai_author_summary,
            SubscriptionFeature::AiCustomization => self.ai_customization,
            SubscriptionFeature::DetailedAuthorInfo => self.detailed_author_info,
            SubscriptionFeature::ExtendedAiSummary => self.extended_ai_summary,
        }
    }

    /// Returns false if unbounded or under the limit.
    pub fn book_limit_reached(&self, current_count: u32) -> bool {
        self.max_books
            .map(|max| current_count >= max)
            .unwrap_or(false)
    }
}

static FREE_LIMITS: TierLimits = TierLimits {
    max_books: Some(5),
    ai_credits_per_month: 3,
    export_to_pdf: false,
    advanced_note_format: false,
    ai_author_summary: false,
    ai_customization: false,
    detailed_author_info: false,
    extended_ai_summary: false,
};

static BASIC_LIMITS: TierLimits = TierLimits {
    max_books: Some(50),
    ai_credits_per_month: 50,
    export_to_pdf: true,
    advanced_note_format: true,
    ai_author_summary: true,
    ai_customization: false,
    detailed_author_info: false,
    extended_ai_summary: false,
};

static PREMIUM_LIMITS: TierLimits = TierLimits {
    max_books: None,
    ai_credits_per_month: 100,
    export_to_pdf: true,
    advanced_note_format: true,
    ai_author_summary: true,
    ai_customization: true,
    detailed_author_info: true,
    extended_ai_summary: true,
};

/// Get the limits for a specific tier.
///
/// | Tier | Books | Credits/month | PDF | Adv. notes | Author summary | Customization | Author info | Ext. summary |
/// |------|-------|---------------|-----|------------|----------------|---------------|-------------|--------------|
/// | Free | 5 | 3 | No | No | No | No | No | No |
/// | Basic | 50 | 50 | Yes | Yes | Yes | No | No | No |
/// | Premium | Unbounded | 100 | Yes | Yes | Yes | Yes | Yes | Yes |
pub fn limits_for(tier: Tier) -> &'static TierLimits {
    match tier {
        Tier::Free => &FREE_LIMITS,
        Tier::Basic => &BASIC_LIMITS,
        Tier::Premium => &PREMIUM_LIMITS,
    }
}
