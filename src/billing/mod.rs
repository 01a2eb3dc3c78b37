// SPDX-License-Identifier: Apache-2.0

//! Billing provider abstraction
//!
//! The lifecycle manager informs the external billing system of
//! cancellations. Calls are best-effort from the engine's point of view:
//! failures are logged and reconciled later, never rolled back locally.

pub mod events;
pub mod stripe;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{EntitlementError, EntitlementResult};

pub use events::{BillingEvent, EventOutcome};
pub use stripe::StripeBillingClient;

#[async_trait]
pub trait BillingProvider: Send + Sync {
    fn provider_id(&self) -> &'static str;

    /// Schedules cancellation at the end of the current period
    async fn cancel_at_period_end(&self, subscription_id: &str) -> EntitlementResult<()>;

    /// Clears a pending period-end cancellation
    async fn resume(&self, subscription_id: &str) -> EntitlementResult<()>;

    /// Cancels the subscription now (account deletion)
    async fn cancel_immediately(&self, subscription_id: &str) -> EntitlementResult<()>;
}

/// One call received by the mock provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingCall {
    CancelAtPeriodEnd(String),
    Resume(String),
    CancelImmediately(String),
}

/// Mock implementation for testing
#[derive(Clone, Default)]
pub struct MockBillingProvider {
    calls: Arc<Mutex<Vec<BillingCall>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating a provider outage
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn calls(&self) -> Vec<BillingCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: BillingCall) -> EntitlementResult<()> {
        self.calls.lock().push(call);
        if *self.failing.lock() {
            return Err(EntitlementError::billing("mock provider unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    fn provider_id(&self) -> &'static str {
        "mock"
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> EntitlementResult<()> {
        self.record(BillingCall::CancelAtPeriodEnd(subscription_id.to_string()))
    }

    async fn resume(&self, subscription_id: &str) -> EntitlementResult<()> {
        self.record(BillingCall::Resume(subscription_id.to_string()))
    }

    async fn cancel_immediately(&self, subscription_id: &str) -> EntitlementResult<()> {
        self.record(BillingCall::CancelImmediately(subscription_id.to_string()))
    }
}
