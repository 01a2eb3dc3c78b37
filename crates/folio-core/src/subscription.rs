// SPDX-License-Identifier: Apache-2.0

//! Subscription record model.
//!
//! The record is owned by exactly one user. Every mutation here keeps
//! `ai_credits_remaining <= ai_credits_total` and
//! `next_renewal_date > last_renewal_date`.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::tier::Tier;

/// One calendar month after `from`, clamped to the end of shorter months.
pub fn next_renewal_after(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(1))
        .unwrap_or_else(|| from + Duration::days(30))
}

/// Derived lifecycle state (`tier` x `cancel_at_period_end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Free,
    BasicActive,
    BasicCancelPending,
    PremiumActive,
    PremiumCancelPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub tier: Tier,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub is_yearly: bool,
    pub ai_credits_remaining: u32,
    pub ai_credits_total: u32,
    pub auto_renew: bool,
    pub last_renewal_date: DateTime<Utc>,
    pub next_renewal_date: DateTime<Utc>,
    #[serde(default)]
    pub stripe_price_id: Option<String>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

impl Subscription {
    /// Initial record created at signup: free tier with full credits.
    pub fn new_free(now: DateTime<Utc>) -> Self {
        let credits = Tier::Free.limits().ai_credits_per_month;
        Self {
            tier: Tier::Free,
            start_date: now,
            end_date: None,
            is_yearly: false,
            ai_credits_remaining: credits,
            ai_credits_total: credits,
            auto_renew: true,
            last_renewal_date: now,
            next_renewal_date: next_renewal_after(now),
            stripe_price_id: None,
            stripe_subscription_id: None,
            cancel_at_period_end: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        match (self.tier, self.cancel_at_period_end) {
            (Tier::Free, _) => LifecycleState::Free,
            (Tier::Basic, false) => LifecycleState::BasicActive,
            (Tier::Basic, true) => LifecycleState::BasicCancelPending,
            (Tier::Premium, false) => LifecycleState::PremiumActive,
            (Tier::Premium, true) => LifecycleState::PremiumCancelPending,
        }
    }

    pub fn has_credits(&self) -> bool {
        self.ai_credits_remaining > 0
    }

    /// Sets remaining and total to the tier's monthly allowance. Never adds.
    pub fn reset_credits(&mut self) {
        let allowance = self.tier.limits().ai_credits_per_month;
        self.ai_credits_total = allowance;
        self.ai_credits_remaining = allowance;
    }

    /// Starts a new billing period at `now`.
    pub fn roll_period(&mut self, now: DateTime<Utc>) {
        self.last_renewal_date = now;
        self.next_renewal_date = next_renewal_after(now);
    }

    /// Direct tier assignment: credits reset to the new allowance and a new
    /// period starts.
    pub fn assign_tier(&mut self, tier: Tier, is_yearly: bool, now: DateTime<Utc>) {
        self.tier = tier;
        self.is_yearly = is_yearly;
        self.cancel_at_period_end = false;
        self.auto_renew = true;
        self.end_date = None;
        self.reset_credits();
        self.roll_period(now);
    }

    /// Price change reported by billing. Credits reset only when the tier
    /// actually changes. Returns true if it did.
    pub fn change_tier(&mut self, tier: Tier, now: DateTime<Utc>) -> bool {
        let changed = self.tier != tier;
        self.tier = tier;
        if changed {
            self.reset_credits();
        }
        self.roll_period(now);
        changed
    }

    /// Drops back to free at period end, clearing billing linkage.
    pub fn downgrade_to_free(&mut self, now: DateTime<Utc>) {
        self.tier = Tier::Free;
        self.is_yearly = false;
        self.cancel_at_period_end = false;
        self.auto_renew = false;
        self.end_date = Some(now);
        self.stripe_price_id = None;
        self.stripe_subscription_id = None;
        self.reset_credits();
        self.roll_period(now);
    }

    /// True once the current period is over.
    pub fn period_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_renewal_date
    }

    /// Renewal window in effect at `now`, stepped forward from the stored
    /// renewal date. `None` while the current period is still running.
    pub fn period_at(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.period_elapsed(now) {
            return None;
        }
        let mut start = self.next_renewal_date;
        let mut end = next_renewal_after(start);
        while end <= now {
            start = end;
            end = next_renewal_after(start);
        }
        Some((start, end))
    }

    /// Monthly replenishment. Credits always go back to the allowance; the
    /// period only moves once it has elapsed, and then on the paid cadence
    /// rather than on the time the reset happened to run.
    pub fn apply_monthly_reset(&mut self, now: DateTime<Utc>) {
        self.reset_credits();
        if let Some((start, end)) = self.period_at(now) {
            self.last_renewal_date = start;
            self.next_renewal_date = end;
        }
    }

    pub fn check_invariants(&self) -> bool {
        self.ai_credits_remaining <= self.ai_credits_total
            && self.next_renewal_date > self.last_renewal_date
    }
}
