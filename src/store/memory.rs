// SPDX-License-Identifier: Apache-2.0

//! In-memory store
//!
//! Used by tests and single-process deployments. Every operation runs inside
//! one critical section, which gives the credit primitives and the
//! version-guarded save their atomicity.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use folio_core::Subscription;

use super::{normalize_email, LookupKey, SubscriptionStore, UserRecord};
use crate::error::{EntitlementError, EntitlementResult};

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    billing_events: HashSet<String>,
}

impl Inner {
    fn record_mut(&mut self, user_id: &str) -> EntitlementResult<&mut UserRecord> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| EntitlementError::user_not_found(user_id))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    fn backend_id(&self) -> &'static str {
        "memory"
    }

    async fn find_user(&self, key: &LookupKey) -> EntitlementResult<Option<UserRecord>> {
        let inner = self.inner.lock();
        let found = match key {
            LookupKey::UserId(id) => inner.users.get(id).cloned(),
            LookupKey::AuthProviderId(auth_id) => inner
                .users
                .values()
                .find(|u| u.auth_provider_id.as_deref() == Some(auth_id.as_str()))
                .cloned(),
            LookupKey::Email(email) => {
                let wanted = normalize_email(email);
                inner
                    .users
                    .values()
                    .find(|u| u.email.as_deref() == Some(wanted.as_str()))
                    .cloned()
            }
        };
        Ok(found)
    }

    async fn find_by_billing_id(
        &self,
        stripe_subscription_id: &str,
    ) -> EntitlementResult<Option<UserRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .users
            .values()
            .find(|u| {
                u.subscription.stripe_subscription_id.as_deref() == Some(stripe_subscription_id)
            })
            .cloned())
    }

    async fn insert_user(&self, user: &UserRecord) -> EntitlementResult<()> {
        let mut inner = self.inner.lock();
        if inner.users.contains_key(&user.id) {
            return Err(EntitlementError::validation(format!(
                "User already exists: {}",
                user.id
            )));
        }
        let mut record = user.clone();
        record.email = record.email.as_deref().map(normalize_email);
        record.version = 0;
        inner.users.insert(record.id.clone(), record);
        Ok(())
    }

    async fn save_subscription(
        &self,
        user_id: &str,
        expected_version: u64,
        subscription: &Subscription,
    ) -> EntitlementResult<bool> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(user_id)?;
        if record.version != expected_version {
            return Ok(false);
        }
        record.subscription = subscription.clone();
        record.version += 1;
        Ok(true)
    }

    async fn set_cancel_at_period_end(&self, user_id: &str, cancel: bool) -> EntitlementResult<()> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(user_id)?;
        record.subscription.cancel_at_period_end = cancel;
        record.version += 1;
        Ok(())
    }

    async fn decrement_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(user_id)?;
        if record.subscription.ai_credits_remaining == 0 {
            return Ok(None);
        }
        record.subscription.ai_credits_remaining -= 1;
        record.version += 1;
        Ok(Some(record.subscription.ai_credits_remaining))
    }

    async fn increment_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(user_id)?;
        let sub = &mut record.subscription;
        if sub.ai_credits_remaining >= sub.ai_credits_total {
            return Ok(None);
        }
        sub.ai_credits_remaining += 1;
        let remaining = sub.ai_credits_remaining;
        record.version += 1;
        Ok(Some(remaining))
    }

    async fn list_paid_subscriptions(&self) -> EntitlementResult<Vec<UserRecord>> {
        let inner = self.inner.lock();
        let mut paid: Vec<UserRecord> = inner
            .users
            .values()
            .filter(|u| u.subscription.tier.is_paid())
            .cloned()
            .collect();
        paid.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(paid)
    }

    async fn delete_user(&self, user_id: &str) -> EntitlementResult<bool> {
        Ok(self.inner.lock().users.remove(user_id).is_some())
    }

    async fn has_billing_event(&self, event_id: &str) -> EntitlementResult<bool> {
        Ok(self.inner.lock().billing_events.contains(event_id))
    }

    async fn record_billing_event(&self, event_id: &str) -> EntitlementResult<bool> {
        Ok(self.inner.lock().billing_events.insert(event_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_core::Tier;

    fn user(id: &str, credits: u32) -> UserRecord {
        let mut subscription = Subscription::new_free(Utc::now());
        subscription.ai_credits_remaining = credits;
        UserRecord {
            id: id.to_string(),
            auth_provider_id: Some(format!("auth|{}", id)),
            email: Some(format!("{}@Example.com", id)),
            subscription,
            version: 0,
        }
    }

    #[tokio::test]
    async fn decrement_stops_at_zero() -> EntitlementResult<()> {
        let store = InMemoryStore::new();
        store.insert_user(&user("u1", 1)).await?;

        assert_eq!(store.decrement_credit("u1").await?, Some(0));
        assert_eq!(store.decrement_credit("u1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn decrement_unknown_user_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.decrement_credit("ghost").await.unwrap_err();
        assert!(matches!(err, EntitlementError::UserNotFound { .. }));
    }

    #[tokio::test]
    async fn increment_caps_at_total() -> EntitlementResult<()> {
        let store = InMemoryStore::new();
        store.insert_user(&user("u1", 2)).await?;

        assert_eq!(store.increment_credit("u1").await?, Some(3));
        assert_eq!(store.increment_credit("u1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_by_each_identifier() -> EntitlementResult<()> {
        let store = InMemoryStore::new();
        store.insert_user(&user("u1", 3)).await?;

        let by_id = store.find_user(&LookupKey::UserId("u1".into())).await?;
        let by_auth = store
            .find_user(&LookupKey::AuthProviderId("auth|u1".into()))
            .await?;
        let by_email = store
            .find_user(&LookupKey::Email("U1@example.COM".into()))
            .await?;

        assert_eq!(by_id.map(|u| u.id), Some("u1".to_string()));
        assert_eq!(by_auth.map(|u| u.id), Some("u1".to_string()));
        assert_eq!(by_email.map(|u| u.id), Some("u1".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn stale_save_is_rejected_after_credit_spend() -> EntitlementResult<()> {
        let store = InMemoryStore::new();
        store.insert_user(&user("u1", 3)).await?;
        let read = store.find_user(&LookupKey::UserId("u1".into())).await?.unwrap();

        store.decrement_credit("u1").await?;

        let mut upgraded = read.subscription.clone();
        upgraded.assign_tier(Tier::Basic, false, Utc::now());
        assert!(!store.save_subscription("u1", read.version, &upgraded).await?);

        let fresh = store.find_user(&LookupKey::UserId("u1".into())).await?.unwrap();
        assert_eq!(fresh.subscription.ai_credits_remaining, 2);
        assert!(store.save_subscription("u1", fresh.version, &upgraded).await?);
        Ok(())
    }

    #[tokio::test]
    async fn every_write_bumps_version() -> EntitlementResult<()> {
        let store = InMemoryStore::new();
        store.insert_user(&user("u1", 2)).await?;

        store.decrement_credit("u1").await?;
        store.increment_credit("u1").await?;
        store.set_cancel_at_period_end("u1", true).await?;

        let record = store.find_user(&LookupKey::UserId("u1".into())).await?.unwrap();
        assert_eq!(record.version, 3);
        Ok(())
    }

    #[tokio::test]
    async fn billing_events_are_recorded_once() -> EntitlementResult<()> {
        let store = InMemoryStore::new();
        assert!(!store.has_billing_event("evt_1").await?);
        assert!(store.record_billing_event("evt_1").await?);
        assert!(!store.record_billing_event("evt_1").await?);
        assert!(store.has_billing_event("evt_1").await?);
        Ok(())
    }
}
