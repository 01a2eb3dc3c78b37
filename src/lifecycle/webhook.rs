// SPDX-License-Identifier: Apache-2.0

//! Billing webhook application
//!
//! Deliveries are at-least-once. An event id is recorded only after its
//! change has been applied, so a failure at any point leaves the event
//! retryable. Each change checks the fresh record before writing, which makes
//! applying the same event twice harmless.

use tracing::{debug, info, instrument};

use folio_core::Tier;

use super::SubscriptionLifecycle;
use crate::billing::{BillingEvent, EventOutcome};
use crate::error::{EntitlementError, EntitlementResult};
use crate::reconciliation::{DiscrepancyKind, ReconciliationEntry};
use crate::store::LookupKey;

impl SubscriptionLifecycle {
    /// Applies one verified billing event. Replaying an event id is a no-op.
    #[instrument(
        skip(self, event),
        fields(
            event_id = event.event_id(),
            kind = event.kind(),
            subscription_id = event.subscription_id()
        )
    )]
    pub async fn apply_billing_event(&self, event: &BillingEvent) -> EntitlementResult<EventOutcome> {
        if self.store.has_billing_event(event.event_id()).await? {
            debug!("Duplicate billing event");
            return Ok(EventOutcome::Duplicate);
        }

        let outcome = self.apply_event(event).await?;
        if !self.store.record_billing_event(event.event_id()).await? {
            debug!("Billing event recorded by a concurrent delivery");
        }
        debug!(?outcome, "Billing event processed");
        Ok(outcome)
    }

    async fn apply_event(&self, event: &BillingEvent) -> EntitlementResult<EventOutcome> {
        match event {
            BillingEvent::CheckoutCompleted {
                user_id,
                subscription_id,
                price_id,
                tier,
                is_yearly,
                ..
            } => {
                let (tier, is_yearly) =
                    self.tier_for_price(price_id.as_deref(), *tier, *is_yearly, subscription_id)?;

                let Some(user) = self
                    .store
                    .find_user(&LookupKey::UserId(user_id.clone()))
                    .await?
                else {
                    self.reconciliation.record(
                        ReconciliationEntry::new(
                            DiscrepancyKind::UnknownSubscription,
                            "Checkout completed for unknown user",
                        )
                        .for_user(user_id.as_str())
                        .with_external_id(subscription_id.as_str()),
                    );
                    return Err(EntitlementError::inconsistent(format!(
                        "Checkout for unknown user {}",
                        user_id
                    )));
                };

                let (_, linked) = self
                    .link_checkout(user, tier, is_yearly, subscription_id, price_id.as_deref(), true)
                    .await?;
                Ok(if linked { EventOutcome::Applied } else { EventOutcome::Ignored })
            }

            BillingEvent::SubscriptionUpdated {
                subscription_id,
                price_id,
                cancel_at_period_end,
                ..
            } => {
                let Some(user) = self.store.find_by_billing_id(subscription_id).await? else {
                    self.reconciliation.record(
                        ReconciliationEntry::new(
                            DiscrepancyKind::UnknownSubscription,
                            "Update for unlinked subscription",
                        )
                        .with_external_id(subscription_id.as_str()),
                    );
                    return Err(EntitlementError::inconsistent(format!(
                        "No user linked to subscription {}",
                        subscription_id
                    )));
                };

                let mut outcome = EventOutcome::Ignored;

                if let Some(price_id) = price_id.as_deref() {
                    let (tier, _) = self.tier_for_price(Some(price_id), None, None, subscription_id)?;
                    let (_, changed) = self
                        .change_price(user.clone(), tier, Some(price_id), true)
                        .await?;
                    if changed {
                        outcome = EventOutcome::Applied;
                    }
                }

                if let Some(cancel) = *cancel_at_period_end {
                    if user.subscription.cancel_at_period_end != cancel {
                        self.store.set_cancel_at_period_end(&user.id, cancel).await?;
                        info!(user_id = %user.id, cancel, "Cancel flag updated by billing");
                        outcome = EventOutcome::Applied;
                    }
                }

                Ok(outcome)
            }

            BillingEvent::SubscriptionDeleted { subscription_id, .. } => {
                let Some(user) = self.store.find_by_billing_id(subscription_id).await? else {
                    debug!("Deletion for unlinked subscription, already downgraded");
                    return Ok(EventOutcome::Ignored);
                };
                let (_, downgraded) = self
                    .downgrade_if(user, |sub| {
                        sub.stripe_subscription_id.as_deref() == Some(subscription_id.as_str())
                    })
                    .await?;
                Ok(if downgraded { EventOutcome::Applied } else { EventOutcome::Ignored })
            }
        }
    }

    /// Price id from the catalog first, then the tier carried in the event.
    fn tier_for_price(
        &self,
        price_id: Option<&str>,
        fallback_tier: Option<Tier>,
        fallback_yearly: Option<bool>,
        subscription_id: &str,
    ) -> EntitlementResult<(Tier, bool)> {
        if let Some(entry) = price_id.and_then(|id| self.prices.resolve(id)) {
            return Ok((entry.tier, entry.is_yearly));
        }
        if let Some(tier) = fallback_tier.filter(|t| t.is_paid()) {
            return Ok((tier, fallback_yearly.unwrap_or(false)));
        }

        let detail = format!("No tier configured for price {}", price_id.unwrap_or("<none>"));
        self.reconciliation.record(
            ReconciliationEntry::new(DiscrepancyKind::UnknownPrice, detail.clone())
                .with_external_id(subscription_id),
        );
        Err(EntitlementError::inconsistent(detail))
    }
}
