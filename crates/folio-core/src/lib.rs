// SPDX-License-Identifier: Apache-2.0

//! Folio Core
//!
//! Pure subscription domain: the tier catalog, feature entitlements and the
//! subscription record. No I/O lives in this crate.

pub mod entitlement;
pub mod feature;
pub mod subscription;
pub mod tier;

pub use entitlement::{can_access, has_reached_book_limit, minimum_tier_for};
pub use feature::SubscriptionFeature;
pub use subscription::{next_renewal_after, LifecycleState, Subscription};
pub use tier::{limits_for, Tier, TierLimits, TierParseError};
