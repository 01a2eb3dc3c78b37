// SPDX-License-Identifier: Apache-2.0

//! Billing webhook events
//!
//! Already verified and normalized by the HTTP layer; only the fields the
//! engine reconciles on are kept.

use serde::{Deserialize, Serialize};

use folio_core::Tier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BillingEvent {
    /// Checkout succeeded and a paid subscription exists.
    #[serde(rename = "checkout.completed")]
    CheckoutCompleted {
        event_id: String,
        user_id: String,
        subscription_id: String,
        #[serde(default)]
        price_id: Option<String>,
        /// Tier from checkout metadata, used when the price id is unknown.
        #[serde(default)]
        tier: Option<Tier>,
        #[serde(default)]
        is_yearly: Option<bool>,
    },

    /// Price or cancellation flag changed on an existing subscription.
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated {
        event_id: String,
        subscription_id: String,
        #[serde(default)]
        price_id: Option<String>,
        #[serde(default)]
        cancel_at_period_end: Option<bool>,
    },

    /// The billing period ended on a cancelled subscription.
    #[serde(rename = "subscription.deleted")]
    SubscriptionDeleted {
        event_id: String,
        subscription_id: String,
    },
}

impl BillingEvent {
    pub fn event_id(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted { event_id, .. }
            | BillingEvent::SubscriptionUpdated { event_id, .. }
            | BillingEvent::SubscriptionDeleted { event_id, .. } => event_id,
        }
    }

    pub fn subscription_id(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted { subscription_id, .. }
            | BillingEvent::SubscriptionUpdated { subscription_id, .. }
            | BillingEvent::SubscriptionDeleted { subscription_id, .. } => subscription_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::CheckoutCompleted { .. } => "checkout.completed",
            BillingEvent::SubscriptionUpdated { .. } => "subscription.updated",
            BillingEvent::SubscriptionDeleted { .. } => "subscription.deleted",
        }
    }
}

/// Result of applying one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Applied,
    /// Same event id was already processed; nothing changed.
    Duplicate,
    /// Valid event with nothing to change locally.
    Ignored,
}
