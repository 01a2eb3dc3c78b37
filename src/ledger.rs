// SPDX-License-Identifier: Apache-2.0

//! Credit Ledger
//!
//! Meters AI credits per user. Every balance change is delegated to the
//! store's conditional update primitives; the ledger itself never reads a
//! balance and writes it back.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use folio_core::Tier;

use crate::error::{EntitlementError, EntitlementResult};
use crate::metrics;
use crate::store::{LookupKey, SubscriptionStore, UserRecord};

pub struct CreditLedger {
    store: Arc<dyn SubscriptionStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    async fn load(&self, user_id: &str) -> EntitlementResult<UserRecord> {
        self.store
            .find_user(&LookupKey::UserId(user_id.to_string()))
            .await?
            .ok_or_else(|| EntitlementError::user_not_found(user_id))
    }

    /// Current `ai_credits_remaining` for the user.
    pub async fn remaining(&self, user_id: &str) -> EntitlementResult<u32> {
        Ok(self.load(user_id).await?.subscription.ai_credits_remaining)
    }

    pub async fn has_credits(&self, user_id: &str) -> EntitlementResult<bool> {
        Ok(self.remaining(user_id).await? > 0)
    }

    /// Consumes exactly one credit and returns the new balance.
    ///
    /// With no credits left nothing is mutated and `CreditsExhausted` is
    /// returned. Concurrent calls on the last credit yield one success.
    #[instrument(skip(self))]
    pub async fn use_credit(&self, user_id: &str) -> EntitlementResult<u32> {
        match self.store.decrement_credit(user_id).await? {
            Some(remaining) => {
                metrics::record_credit_used();
                debug!(remaining, "AI credit consumed");
                Ok(remaining)
            }
            None => {
                metrics::record_credit_exhausted();
                let tier = self.load(user_id).await?.subscription.tier;
                info!(tier = %tier, "AI credits exhausted");
                Err(EntitlementError::CreditsExhausted { tier })
            }
        }
    }

    /// Returns one credit, never exceeding the period total.
    ///
    /// Returns the new balance, or `None` if the balance was already full.
    #[instrument(skip(self))]
    pub async fn refund_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        let refunded = self.store.increment_credit(user_id).await?;
        if refunded.is_some() {
            metrics::record_credit_refunded();
        }
        Ok(refunded)
    }

    /// Allowance a subscription on `tier` resets to each month.
    pub fn reset_monthly(tier: Tier) -> u32 {
        tier.limits().ai_credits_per_month
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, UserRecord};
    use chrono::Utc;
    use folio_core::Subscription;

    async fn ledger_with(tier: Tier, credits: u32) -> CreditLedger {
        let store = Arc::new(InMemoryStore::new());
        let mut subscription = Subscription::new_free(Utc::now());
        subscription.assign_tier(tier, false, Utc::now());
        subscription.ai_credits_remaining = credits;
        store
            .insert_user(&UserRecord {
                id: "reader".into(),
                auth_provider_id: None,
                email: None,
                subscription,
                version: 0,
            })
            .await
            .unwrap();
        CreditLedger::new(store)
    }

    #[tokio::test]
    async fn use_credit_decrements_by_one() {
        let ledger = ledger_with(Tier::Basic, 5).await;
        assert_eq!(ledger.use_credit("reader").await.unwrap(), 4);
        assert_eq!(ledger.remaining("reader").await.unwrap(), 4);
        assert!(ledger.has_credits("reader").await.unwrap());
    }

    #[tokio::test]
    async fn exhausted_does_not_mutate() {
        let ledger = ledger_with(Tier::Basic, 0).await;
        let err = ledger.use_credit("reader").await.unwrap_err();
        assert!(matches!(err, EntitlementError::CreditsExhausted { tier: Tier::Basic }));
        assert_eq!(ledger.remaining("reader").await.unwrap(), 0);
        assert!(!ledger.has_credits("reader").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_use_on_last_credit_has_one_winner() {
        let ledger = Arc::new(ledger_with(Tier::Basic, 1).await);

        let (a, b) = tokio::join!(ledger.use_credit("reader"), ledger.use_credit("reader"));
        let results = [a, b];

        let successes: Vec<u32> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(EntitlementError::CreditsExhausted { .. })))
            .count();
        assert_eq!(successes, vec![0]);
        assert_eq!(exhausted, 1);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let ledger = ledger_with(Tier::Basic, 1).await;
        assert!(matches!(
            ledger.use_credit("nobody").await,
            Err(EntitlementError::UserNotFound { .. })
        ));
        assert!(matches!(
            ledger.remaining("nobody").await,
            Err(EntitlementError::UserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn refund_is_capped_at_total() {
        let ledger = ledger_with(Tier::Basic, 49).await;
        assert_eq!(ledger.refund_credit("reader").await.unwrap(), Some(50));
        assert_eq!(ledger.refund_credit("reader").await.unwrap(), None);
    }

    #[test]
    fn reset_allowance_per_tier() {
        assert_eq!(CreditLedger::reset_monthly(Tier::Free), 3);
        assert_eq!(CreditLedger::reset_monthly(Tier::Basic), 50);
        assert_eq!(CreditLedger::reset_monthly(Tier::Premium), 100);
    }
}
