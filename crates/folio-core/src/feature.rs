// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// Feature identifiers for gating.
///
/// Only boolean features live here. Numeric limits such as the book cap are
/// checked separately and are never treated as flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionFeature {
    ExportToPdf,
    AdvancedNoteFormat,
    AiAuthorSummary,
    AiCustomization,
    DetailedAuthorInfo,
    ExtendedAiSummary,
}

impl SubscriptionFeature {
    pub const ALL: [SubscriptionFeature; 6] = [
        SubscriptionFeature::ExportToPdf,
        SubscriptionFeature::AdvancedNoteFormat,
        SubscriptionFeature::AiAuthorSummary,
        SubscriptionFeature::AiCustomization,
        SubscriptionFeature::DetailedAuthorInfo,
        SubscriptionFeature::ExtendedAiSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionFeature::ExportToPdf => "exportToPdf",
            SubscriptionFeature::AdvancedNoteFormat => "advancedNoteFormat",
            SubscriptionFeature::AiAuthorSummary => "aiAuthorSummary",
            SubscriptionFeature::AiCustomization => "aiCustomization",
            SubscriptionFeature::DetailedAuthorInfo => "detailedAuthorInfo",
            SubscriptionFeature::ExtendedAiSummary => "extendedAiSummary",
        }
    }
}

impl fmt::Display for SubscriptionFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
