// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-memory metering counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

use crate::gate::DenialReason;

#[derive(Default)]
struct MeteringMetrics {
    credits_consumed: AtomicU64,
    credits_exhausted: AtomicU64,
    credits_refunded: AtomicU64,
    denied_unauthorized: AtomicU64,
    denied_user_not_found: AtomicU64,
    denied_subscription: AtomicU64,
    denied_credits: AtomicU64,
    resets_applied: AtomicU64,
    billing_failures: AtomicU64,
}

static METERING_METRICS: OnceLock<MeteringMetrics> = OnceLock::new();

fn metrics() -> &'static MeteringMetrics {
    METERING_METRICS.get_or_init(MeteringMetrics::default)
}

pub fn record_credit_used() {
    metrics().credits_consumed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_credit_exhausted() {
    metrics().credits_exhausted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_credit_refunded() {
    metrics().credits_refunded.fetch_add(1, Ordering::Relaxed);
}

pub fn record_denial(reason: DenialReason) {
    let m = metrics();
    let counter = match reason {
        DenialReason::Unauthorized => &m.denied_unauthorized,
        DenialReason::UserNotFound => &m.denied_user_not_found,
        DenialReason::SubscriptionRequired => &m.denied_subscription,
        DenialReason::CreditsExhausted => &m.denied_credits,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_resets(count: u64) {
    metrics().resets_applied.fetch_add(count, Ordering::Relaxed);
}

pub fn record_billing_failure() {
    metrics().billing_failures.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
pub struct MeteringSnapshot {
    pub credits_consumed: u64,
    pub credits_exhausted: u64,
    pub credits_refunded: u64,
    pub denied_unauthorized: u64,
    pub denied_user_not_found: u64,
    pub denied_subscription: u64,
    pub denied_credits: u64,
    pub resets_applied: u64,
    pub billing_failures: u64,
}

pub fn snapshot() -> MeteringSnapshot {
    let m = metrics();
    MeteringSnapshot {
        credits_consumed: m.credits_consumed.load(Ordering::Relaxed),
        credits_exhausted: m.credits_exhausted.load(Ordering::Relaxed),
        credits_refunded: m.credits_refunded.load(Ordering::Relaxed),
        denied_unauthorized: m.denied_unauthorized.load(Ordering::Relaxed),
        denied_user_not_found: m.denied_user_not_found.load(Ordering::Relaxed),
        denied_subscription: m.denied_subscription.load(Ordering::Relaxed),
        denied_credits: m.denied_credits.load(Ordering::Relaxed),
        resets_applied: m.resets_applied.load(Ordering::Relaxed),
        billing_failures: m.billing_failures.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_flow() {
        // Other tests record in parallel, so compare deltas (lower bounds).
        let initial = snapshot();

        record_credit_used();
        record_credit_exhausted();
        record_credit_refunded();
        record_denial(DenialReason::SubscriptionRequired);
        record_denial(DenialReason::CreditsExhausted);
        record_resets(3);
        record_billing_failure();

        let after = snapshot();
        assert!(after.credits_consumed >= initial.credits_consumed + 1);
        assert!(after.credits_exhausted >= initial.credits_exhausted + 1);
        assert!(after.credits_refunded >= initial.credits_refunded + 1);
        assert!(after.denied_subscription >= initial.denied_subscription + 1);
        assert!(after.denied_credits >= initial.denied_credits + 1);
        assert!(after.resets_applied >= initial.resets_applied + 3);
        assert!(after.billing_failures >= initial.billing_failures + 1);
    }
}
