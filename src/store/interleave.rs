// SPDX-License-Identifier: Apache-2.0

//! Test store that lands a competing write between a read and the write
//! that follows it.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use folio_core::Subscription;

use super::{InMemoryStore, LookupKey, SubscriptionStore, UserRecord};
use crate::error::{EntitlementError, EntitlementResult};

/// A write performed by "someone else" right after the next read returns.
#[derive(Debug, Clone)]
pub(crate) enum Competing {
    Decrement(String),
    SetCancel(String, bool),
}

#[derive(Default)]
pub(crate) struct InterleavingStore {
    inner: InMemoryStore,
    after_read: Mutex<VecDeque<Competing>>,
    failing_saves: Mutex<u32>,
}

impl InterleavingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a write to run after the next `find_*` or listing call.
    pub(crate) fn after_next_read(&self, write: Competing) {
        self.after_read.lock().push_back(write);
    }

    /// Makes the next `count` whole-record saves fail with a storage error.
    pub(crate) fn fail_next_saves(&self, count: u32) {
        *self.failing_saves.lock() = count;
    }

    async fn interleave(&self) -> EntitlementResult<()> {
        let next = self.after_read.lock().pop_front();
        match next {
            Some(Competing::Decrement(user_id)) => {
                self.inner.decrement_credit(&user_id).await?;
            }
            Some(Competing::SetCancel(user_id, cancel)) => {
                self.inner.set_cancel_at_period_end(&user_id, cancel).await?;
            }
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InterleavingStore {
    fn backend_id(&self) -> &'static str {
        "interleaving"
    }

    async fn find_user(&self, key: &LookupKey) -> EntitlementResult<Option<UserRecord>> {
        let found = self.inner.find_user(key).await?;
        self.interleave().await?;
        Ok(found)
    }

    async fn find_by_billing_id(
        &self,
        stripe_subscription_id: &str,
    ) -> EntitlementResult<Option<UserRecord>> {
        let found = self.inner.find_by_billing_id(stripe_subscription_id).await?;
        self.interleave().await?;
        Ok(found)
    }

    async fn insert_user(&self, user: &UserRecord) -> EntitlementResult<()> {
        self.inner.insert_user(user).await
    }

    async fn save_subscription(
        &self,
        user_id: &str,
        expected_version: u64,
        subscription: &Subscription,
    ) -> EntitlementResult<bool> {
        {
            let mut failing = self.failing_saves.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(EntitlementError::storage("disk I/O error"));
            }
        }
        self.inner
            .save_subscription(user_id, expected_version, subscription)
            .await
    }

    async fn set_cancel_at_period_end(&self, user_id: &str, cancel: bool) -> EntitlementResult<()> {
        self.inner.set_cancel_at_period_end(user_id, cancel).await
    }

    async fn decrement_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        self.inner.decrement_credit(user_id).await
    }

    async fn increment_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        self.inner.increment_credit(user_id).await
    }

    async fn list_paid_subscriptions(&self) -> EntitlementResult<Vec<UserRecord>> {
        let paid = self.inner.list_paid_subscriptions().await?;
        self.interleave().await?;
        Ok(paid)
    }

    async fn delete_user(&self, user_id: &str) -> EntitlementResult<bool> {
        self.inner.delete_user(user_id).await
    }

    async fn has_billing_event(&self, event_id: &str) -> EntitlementResult<bool> {
        self.inner.has_billing_event(event_id).await
    }

    async fn record_billing_event(&self, event_id: &str) -> EntitlementResult<bool> {
        self.inner.record_billing_event(event_id).await
    }
}
