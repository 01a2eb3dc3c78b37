// SPDX-License-Identifier: Apache-2.0

//! Subscription Lifecycle Manager
//!
//! Owns every transition of a user's subscription:
//!
//! ```text
//!            signup
//!              │
//!              ▼
//!   ┌──────────────────┐  select_tier / checkout_completed   ┌──────────────────┐
//!   │       free       │ ──────────────────────────────────▶ │  basic|premium   │
//!   └──────────────────┘                                     │     active       │
//!              ▲                                             └──────────────────┘
//!              │ period_ended                        cancel_requested │  ▲ reactivate
//!              │                                                      ▼  │
//!              │                                             ┌──────────────────┐
//!              └──────────────────────────────────────────── │  cancel pending  │
//!                                                            └──────────────────┘
//! ```
//!
//! Billing calls are best-effort: a failure is logged and written to the
//! reconciliation log, but valid local changes are kept.
//!
//! Whole-record changes go through [`SubscriptionLifecycle::update`], which
//! saves against the version it read and re-applies the change to a fresh
//! read when a credit spend or cancel flip landed in between.

pub mod reset;
pub mod webhook;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use folio_core::{LifecycleState, Subscription, Tier};

use crate::billing::BillingProvider;
use crate::config::PriceCatalog;
use crate::error::{EntitlementError, EntitlementResult};
use crate::identity::{Identity, IdentityResolver};
use crate::metrics;
use crate::reconciliation::{DiscrepancyKind, ReconciliationEntry, ReconciliationLog};
use crate::store::{normalize_email, LookupKey, SubscriptionStore, UserRecord};

pub use reset::{CronGuard, ResetReport};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Version conflicts tolerated before a change gives up.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// What the UI needs to render plan and credit status in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub user_id: String,
    pub tier: Tier,
    pub state: LifecycleState,
    pub is_yearly: bool,
    pub ai_credits_remaining: u32,
    pub ai_credits_total: u32,
    pub next_renewal_date: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

impl SubscriptionSummary {
    fn from_record(user: &UserRecord) -> Self {
        let sub = &user.subscription;
        Self {
            user_id: user.id.clone(),
            tier: sub.tier,
            state: sub.state(),
            is_yearly: sub.is_yearly,
            ai_credits_remaining: sub.ai_credits_remaining,
            ai_credits_total: sub.ai_credits_total,
            next_renewal_date: sub.next_renewal_date,
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }
}

pub struct SubscriptionLifecycle {
    store: Arc<dyn SubscriptionStore>,
    billing: Arc<dyn BillingProvider>,
    reconciliation: Arc<ReconciliationLog>,
    prices: PriceCatalog,
    resolver: IdentityResolver,
    clock: Clock,
}

impl SubscriptionLifecycle {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        billing: Arc<dyn BillingProvider>,
        reconciliation: Arc<ReconciliationLog>,
        prices: PriceCatalog,
    ) -> Self {
        let resolver = IdentityResolver::new(Arc::clone(&store));
        Self {
            store,
            billing,
            reconciliation,
            prices,
            resolver,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock, for period-boundary tests and replays.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn load(&self, user_id: &str) -> EntitlementResult<UserRecord> {
        self.store
            .find_user(&LookupKey::UserId(user_id.to_string()))
            .await?
            .ok_or_else(|| EntitlementError::user_not_found(user_id))
    }

    /// Applies `change` to the user's subscription and saves it if the
    /// record was not written since it was read. On a conflict the record is
    /// re-read and `change` runs again on the fresh copy. `change` returns
    /// false to leave the record as it is.
    ///
    /// Returns the resulting subscription and whether it was written.
    async fn update<F>(
        &self,
        mut user: UserRecord,
        mut change: F,
    ) -> EntitlementResult<(Subscription, bool)>
    where
        F: FnMut(&mut Subscription) -> bool + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut sub = user.subscription.clone();
            if !change(&mut sub) {
                return Ok((user.subscription, false));
            }
            if self.store.save_subscription(&user.id, user.version, &sub).await? {
                return Ok((sub, true));
            }
            debug!(user_id = %user.id, attempt, "Subscription written concurrently, re-reading");
            user = self.load(&user.id).await?;
        }
        Err(EntitlementError::inconsistent(format!(
            "Subscription for {} kept changing, gave up after {} attempts",
            user.id, MAX_WRITE_ATTEMPTS
        )))
    }

    fn note_billing_failure(
        &self,
        kind: DiscrepancyKind,
        user: &UserRecord,
        external_id: &str,
        err: &EntitlementError,
    ) {
        metrics::record_billing_failure();
        self.reconciliation.record(
            ReconciliationEntry::new(kind, err.to_string())
                .for_user(&user.id)
                .with_external_id(external_id),
        );
    }

    /// Creates the user with a free subscription and full free credits.
    /// Signing up an identity that already exists returns the existing record.
    #[instrument(skip(self, identity))]
    pub async fn signup(&self, identity: &Identity) -> EntitlementResult<UserRecord> {
        if identity.is_anonymous() {
            return Err(EntitlementError::Unauthorized);
        }
        if let Some(existing) = self.resolver.find(identity).await? {
            debug!(user_id = %existing.id, "Signup for existing user");
            return Ok(existing);
        }

        let user = UserRecord {
            id: identity
                .user_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            auth_provider_id: identity.auth_provider_id.clone(),
            email: identity.email.as_deref().map(normalize_email),
            subscription: Subscription::new_free(self.now()),
            version: 0,
        };
        self.store.insert_user(&user).await?;
        info!(user_id = %user.id, "User signed up on free tier");
        Ok(user)
    }

    /// Direct tier assignment without going through billing.
    #[instrument(skip(self))]
    pub async fn select_tier(
        &self,
        user_id: &str,
        tier: Tier,
        is_yearly: bool,
    ) -> EntitlementResult<Subscription> {
        let user = self.load(user_id).await?;
        let now = self.now();
        let mut previous = user.subscription.tier;
        let (sub, _) = self
            .update(user, |sub| {
                previous = sub.tier;
                sub.assign_tier(tier, is_yearly, now);
                if !tier.is_paid() {
                    sub.stripe_price_id = None;
                    sub.stripe_subscription_id = None;
                }
                true
            })
            .await?;
        info!(from = %previous, to = %tier, "Tier selected");
        Ok(sub)
    }

    /// Billing checkout succeeded: assign the tier and link the external ids.
    #[instrument(skip(self))]
    pub async fn checkout_completed(
        &self,
        user_id: &str,
        tier: Tier,
        is_yearly: bool,
        external_subscription_id: &str,
        price_id: Option<&str>,
    ) -> EntitlementResult<Subscription> {
        let user = self.load(user_id).await?;
        let (sub, _) = self
            .link_checkout(user, tier, is_yearly, external_subscription_id, price_id, false)
            .await?;
        Ok(sub)
    }

    /// Assigns the checked-out tier and links the external ids. With
    /// `skip_if_linked`, a record already linked to the same subscription on
    /// the same tier is left alone, which makes redelivered checkouts safe.
    async fn link_checkout(
        &self,
        user: UserRecord,
        tier: Tier,
        is_yearly: bool,
        external_subscription_id: &str,
        price_id: Option<&str>,
        skip_if_linked: bool,
    ) -> EntitlementResult<(Subscription, bool)> {
        if !tier.is_paid() {
            return Err(EntitlementError::validation("Checkout cannot target the free tier"));
        }
        let now = self.now();
        let (sub, linked) = self
            .update(user, |sub| {
                if skip_if_linked
                    && sub.stripe_subscription_id.as_deref() == Some(external_subscription_id)
                    && sub.tier == tier
                {
                    return false;
                }
                sub.assign_tier(tier, is_yearly, now);
                sub.stripe_subscription_id = Some(external_subscription_id.to_string());
                sub.stripe_price_id = price_id.map(String::from);
                true
            })
            .await?;
        if linked {
            info!(tier = %tier, "Checkout completed");
        } else {
            debug!(tier = %tier, "Checkout already linked");
        }
        Ok((sub, linked))
    }

    /// Upgrade or downgrade reported by billing. Credits reset only when the
    /// tier actually changes; renewal dates always move.
    #[instrument(skip(self))]
    pub async fn price_changed(
        &self,
        external_subscription_id: &str,
        new_tier: Tier,
        price_id: Option<&str>,
    ) -> EntitlementResult<Subscription> {
        let user = self
            .store
            .find_by_billing_id(external_subscription_id)
            .await?
            .ok_or_else(|| EntitlementError::user_not_found(external_subscription_id))?;
        let (sub, _) = self.change_price(user, new_tier, price_id, false).await?;
        Ok(sub)
    }

    /// With `skip_if_current`, a subscription already on `new_tier` and
    /// `price_id` is left alone.
    async fn change_price(
        &self,
        user: UserRecord,
        new_tier: Tier,
        price_id: Option<&str>,
        skip_if_current: bool,
    ) -> EntitlementResult<(Subscription, bool)> {
        let user_id = user.id.clone();

        let now = self.now();
        let mut previous = user.subscription.tier;
        let mut tier_changed = false;
        let (sub, written) = self
            .update(user, |sub| {
                tier_changed = false;
                let same_price = price_id.is_none() || sub.stripe_price_id.as_deref() == price_id;
                if skip_if_current && same_price && sub.tier == new_tier {
                    return false;
                }
                previous = sub.tier;
                tier_changed = sub.change_tier(new_tier, now);
                if let Some(price_id) = price_id {
                    sub.stripe_price_id = Some(price_id.to_string());
                }
                true
            })
            .await?;

        if tier_changed {
            let direction = if new_tier.includes(previous) { "upgrade" } else { "downgrade" };
            info!(user_id = %user_id, from = %previous, to = %new_tier, direction, "Tier changed by billing");
        }
        Ok((sub, written))
    }

    /// Schedules cancellation at period end. Tier and credits are untouched;
    /// access continues until the period ends.
    #[instrument(skip(self))]
    pub async fn cancel_requested(&self, user_id: &str) -> EntitlementResult<Subscription> {
        let user = self.load(user_id).await?;
        let mut sub = user.subscription.clone();

        if !sub.tier.is_paid() {
            debug!("Cancel requested on free tier, nothing to do");
            return Ok(sub);
        }
        if sub.cancel_at_period_end {
            return Ok(sub);
        }

        self.store.set_cancel_at_period_end(&user.id, true).await?;
        sub.cancel_at_period_end = true;
        info!(tier = %sub.tier, "Cancellation scheduled at period end");

        if let Some(external_id) = sub.stripe_subscription_id.as_deref() {
            if let Err(e) = self.billing.cancel_at_period_end(external_id).await {
                warn!("Billing cancel failed, local flag kept: {}", e);
                self.note_billing_failure(DiscrepancyKind::BillingCancelFailed, &user, external_id, &e);
            }
        }
        Ok(sub)
    }

    /// Withdraws a pending cancellation before the period ends.
    #[instrument(skip(self))]
    pub async fn reactivate(&self, user_id: &str) -> EntitlementResult<Subscription> {
        let user = self.load(user_id).await?;
        let mut sub = user.subscription.clone();
        if !sub.cancel_at_period_end {
            return Ok(sub);
        }

        self.store.set_cancel_at_period_end(&user.id, false).await?;
        sub.cancel_at_period_end = false;
        info!(tier = %sub.tier, "Pending cancellation withdrawn");

        if let Some(external_id) = sub.stripe_subscription_id.as_deref() {
            if let Err(e) = self.billing.resume(external_id).await {
                warn!("Billing resume failed, local flag kept: {}", e);
                self.note_billing_failure(DiscrepancyKind::BillingResumeFailed, &user, external_id, &e);
            }
        }
        Ok(sub)
    }

    /// Ends the period of a subscription marked for cancellation, dropping it
    /// to free. Without the flag this is a no-op.
    #[instrument(skip(self))]
    pub async fn period_ended(&self, user_id: &str) -> EntitlementResult<Subscription> {
        let user = self.load(user_id).await?;
        let (sub, downgraded) = self
            .downgrade_if(user, |sub| sub.cancel_at_period_end)
            .await?;
        if !downgraded {
            debug!("Period ended without pending cancellation");
        }
        Ok(sub)
    }

    /// Drops the subscription to free if `still_due` holds for the freshly
    /// read record.
    async fn downgrade_if<P>(
        &self,
        user: UserRecord,
        still_due: P,
    ) -> EntitlementResult<(Subscription, bool)>
    where
        P: Fn(&Subscription) -> bool + Send + Sync,
    {
        let user_id = user.id.clone();
        let now = self.now();
        let mut previous = user.subscription.tier;
        let (sub, downgraded) = self
            .update(user, |sub| {
                if !still_due(sub) {
                    return false;
                }
                previous = sub.tier;
                sub.downgrade_to_free(now);
                true
            })
            .await?;
        if downgraded {
            info!(user_id = %user_id, from = %previous, "Subscription ended, now on free tier");
        }
        Ok((sub, downgraded))
    }

    /// Deletes the account. Any external subscription is cancelled first,
    /// best-effort: a billing outage never blocks data deletion.
    #[instrument(skip(self))]
    pub async fn account_deleted(&self, user_id: &str) -> EntitlementResult<()> {
        let user = self.load(user_id).await?;

        if let Some(external_id) = user.subscription.stripe_subscription_id.as_deref() {
            if user.subscription.tier.is_paid() {
                if let Err(e) = self.billing.cancel_immediately(external_id).await {
                    warn!("Billing cancel failed during account deletion: {}", e);
                    self.note_billing_failure(
                        DiscrepancyKind::BillingDeleteFailed,
                        &user,
                        external_id,
                        &e,
                    );
                }
            }
        }

        self.store.delete_user(&user.id).await?;
        info!("Account deleted");
        Ok(())
    }

    pub async fn summary(&self, user_id: &str) -> EntitlementResult<SubscriptionSummary> {
        let user = self.load(user_id).await?;
        Ok(SubscriptionSummary::from_record(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{BillingCall, MockBillingProvider};
    use crate::store::interleave::{Competing, InterleavingStore};
    use crate::store::InMemoryStore;
    use folio_core::{can_access, SubscriptionFeature};

    struct Fixture {
        lifecycle: SubscriptionLifecycle,
        billing: MockBillingProvider,
        store: Arc<InMemoryStore>,
        reconciliation: Arc<ReconciliationLog>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let billing = MockBillingProvider::new();
        let reconciliation = Arc::new(ReconciliationLog::in_memory());
        let lifecycle = SubscriptionLifecycle::new(
            store.clone(),
            Arc::new(billing.clone()),
            reconciliation.clone(),
            PriceCatalog::default(),
        );
        Fixture {
            lifecycle,
            billing,
            store,
            reconciliation,
        }
    }

    async fn signed_up(f: &Fixture) -> String {
        f.lifecycle.signup(&Identity::user("reader")).await.unwrap().id
    }

    #[tokio::test]
    async fn signup_starts_free_with_full_credits() {
        let f = fixture();
        let user = f.lifecycle.signup(&Identity::email("Reader@Example.com")).await.unwrap();
        assert_eq!(user.subscription.tier, Tier::Free);
        assert_eq!(user.subscription.ai_credits_remaining, 3);
        assert_eq!(user.email.as_deref(), Some("reader@example.com"));

        let again = f.lifecycle.signup(&Identity::email("reader@example.com")).await.unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_signup_is_unauthorized() {
        let f = fixture();
        assert!(matches!(
            f.lifecycle.signup(&Identity::default()).await,
            Err(EntitlementError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn select_premium_yearly_resets_not_adds() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.store.decrement_credit(&id).await.unwrap();
        f.store.decrement_credit(&id).await.unwrap();

        let sub = f.lifecycle.select_tier(&id, Tier::Premium, true).await.unwrap();
        assert_eq!(sub.ai_credits_remaining, 100);
        assert_eq!(sub.ai_credits_total, 100);
        assert!(sub.is_yearly);
        assert!(sub.next_renewal_date > sub.last_renewal_date);
    }

    #[tokio::test]
    async fn cancel_keeps_tier_and_access() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.lifecycle
            .checkout_completed(&id, Tier::Basic, false, "sub_1", Some("price_basic"))
            .await
            .unwrap();
        f.store.decrement_credit(&id).await.unwrap();

        let sub = f.lifecycle.cancel_requested(&id).await.unwrap();
        assert_eq!(sub.tier, Tier::Basic);
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.ai_credits_remaining, 49);
        assert!(can_access(sub.tier, SubscriptionFeature::AiAuthorSummary));
        assert_eq!(f.billing.calls(), vec![BillingCall::CancelAtPeriodEnd("sub_1".into())]);

        let summary = f.lifecycle.summary(&id).await.unwrap();
        assert_eq!(summary.state, LifecycleState::BasicCancelPending);
    }

    #[tokio::test]
    async fn billing_outage_does_not_block_cancel() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.lifecycle
            .checkout_completed(&id, Tier::Premium, false, "sub_2", None)
            .await
            .unwrap();
        f.billing.set_failing(true);

        let sub = f.lifecycle.cancel_requested(&id).await.unwrap();
        assert!(sub.cancel_at_period_end);
        assert_eq!(f.reconciliation.count_of(DiscrepancyKind::BillingCancelFailed), 1);
    }

    #[tokio::test]
    async fn cancel_on_free_is_noop() {
        let f = fixture();
        let id = signed_up(&f).await;
        let sub = f.lifecycle.cancel_requested(&id).await.unwrap();
        assert!(!sub.cancel_at_period_end);
        assert!(f.billing.calls().is_empty());
    }

    #[tokio::test]
    async fn reactivate_clears_pending_cancel() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.lifecycle
            .checkout_completed(&id, Tier::Basic, true, "sub_3", None)
            .await
            .unwrap();
        f.lifecycle.cancel_requested(&id).await.unwrap();

        let sub = f.lifecycle.reactivate(&id).await.unwrap();
        assert!(!sub.cancel_at_period_end);
        assert_eq!(sub.state(), LifecycleState::BasicActive);
        assert_eq!(f.billing.calls().last(), Some(&BillingCall::Resume("sub_3".into())));
    }

    #[tokio::test]
    async fn period_end_downgrades_only_when_cancel_pending() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.lifecycle
            .checkout_completed(&id, Tier::Premium, false, "sub_4", None)
            .await
            .unwrap();

        let untouched = f.lifecycle.period_ended(&id).await.unwrap();
        assert_eq!(untouched.tier, Tier::Premium);

        f.lifecycle.cancel_requested(&id).await.unwrap();
        let ended = f.lifecycle.period_ended(&id).await.unwrap();
        assert_eq!(ended.tier, Tier::Free);
        assert_eq!(ended.ai_credits_remaining, 3);
        assert!(ended.stripe_subscription_id.is_none());
        assert!(!ended.cancel_at_period_end);
    }

    #[tokio::test]
    async fn price_change_resets_only_on_tier_change() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.lifecycle
            .checkout_completed(&id, Tier::Basic, false, "sub_5", None)
            .await
            .unwrap();
        f.store.decrement_credit(&id).await.unwrap();

        let same = f.lifecycle.price_changed("sub_5", Tier::Basic, None).await.unwrap();
        assert_eq!(same.ai_credits_remaining, 49);

        let upgraded = f
            .lifecycle
            .price_changed("sub_5", Tier::Premium, Some("price_premium"))
            .await
            .unwrap();
        assert_eq!(upgraded.ai_credits_remaining, 100);
        assert_eq!(upgraded.stripe_price_id.as_deref(), Some("price_premium"));
    }

    #[tokio::test]
    async fn account_deletion_survives_billing_outage() {
        let f = fixture();
        let id = signed_up(&f).await;
        f.lifecycle
            .checkout_completed(&id, Tier::Basic, false, "sub_6", None)
            .await
            .unwrap();
        f.billing.set_failing(true);

        f.lifecycle.account_deleted(&id).await.unwrap();
        assert!(f.store.is_empty());
        assert_eq!(f.billing.calls().last(), Some(&BillingCall::CancelImmediately("sub_6".into())));
        assert_eq!(f.reconciliation.count_of(DiscrepancyKind::BillingDeleteFailed), 1);
    }

    fn interleaving() -> (SubscriptionLifecycle, Arc<InterleavingStore>) {
        let store = Arc::new(InterleavingStore::new());
        let lifecycle = SubscriptionLifecycle::new(
            store.clone(),
            Arc::new(MockBillingProvider::new()),
            Arc::new(ReconciliationLog::in_memory()),
            PriceCatalog::default(),
        );
        (lifecycle, store)
    }

    async fn linked_basic(lifecycle: &SubscriptionLifecycle) -> String {
        let id = lifecycle.signup(&Identity::user("reader")).await.unwrap().id;
        lifecycle
            .checkout_completed(&id, Tier::Basic, false, "sub_8", Some("price_basic"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn price_change_keeps_credit_spent_after_its_read() {
        let (lifecycle, store) = interleaving();
        let id = linked_basic(&lifecycle).await;

        store.after_next_read(Competing::Decrement(id.clone()));
        let sub = lifecycle.price_changed("sub_8", Tier::Basic, Some("price_basic_v2")).await.unwrap();

        assert_eq!(sub.ai_credits_remaining, 49);
        assert_eq!(sub.stripe_price_id.as_deref(), Some("price_basic_v2"));
        assert_eq!(lifecycle.summary(&id).await.unwrap().ai_credits_remaining, 49);
    }

    #[tokio::test]
    async fn price_change_keeps_cancel_flag_set_after_its_read() {
        let (lifecycle, store) = interleaving();
        let id = linked_basic(&lifecycle).await;

        store.after_next_read(Competing::SetCancel(id.clone(), true));
        lifecycle.price_changed("sub_8", Tier::Basic, None).await.unwrap();

        let summary = lifecycle.summary(&id).await.unwrap();
        assert!(summary.cancel_at_period_end);
        assert_eq!(summary.state, LifecycleState::BasicCancelPending);
    }

    #[tokio::test]
    async fn period_end_respects_reactivation_after_its_read() {
        let (lifecycle, store) = interleaving();
        let id = linked_basic(&lifecycle).await;
        lifecycle.cancel_requested(&id).await.unwrap();

        store.after_next_read(Competing::SetCancel(id.clone(), false));
        let sub = lifecycle.period_ended(&id).await.unwrap();

        assert_eq!(sub.tier, Tier::Basic);
        assert_eq!(lifecycle.summary(&id).await.unwrap().tier, Tier::Basic);
    }

    #[tokio::test]
    async fn tier_selection_resets_over_a_concurrent_spend() {
        let (lifecycle, store) = interleaving();
        let id = linked_basic(&lifecycle).await;

        store.after_next_read(Competing::Decrement(id.clone()));
        let sub = lifecycle.select_tier(&id, Tier::Premium, false).await.unwrap();

        assert_eq!(sub.ai_credits_remaining, 100);
        assert_eq!(lifecycle.summary(&id).await.unwrap().ai_credits_remaining, 100);
    }

    #[tokio::test]
    async fn failed_save_changes_nothing() {
        let (lifecycle, store) = interleaving();
        let id = linked_basic(&lifecycle).await;

        store.fail_next_saves(1);
        assert!(matches!(
            lifecycle.select_tier(&id, Tier::Premium, false).await,
            Err(EntitlementError::Storage { .. })
        ));
        assert_eq!(lifecycle.summary(&id).await.unwrap().tier, Tier::Basic);
    }

    #[tokio::test]
    async fn checkout_to_free_is_rejected() {
        let f = fixture();
        let id = signed_up(&f).await;
        assert!(matches!(
            f.lifecycle.checkout_completed(&id, Tier::Free, false, "sub_7", None).await,
            Err(EntitlementError::Validation { .. })
        ));
    }
}
