// SPDX-License-Identifier: Apache-2.0

//! Subscription persistence
//!
//! The `SubscriptionStore` trait is the only way the engine touches user and
//! subscription records. Credit changes go through the conditional
//! `decrement_credit` / `increment_credit` primitives, which each backend
//! must apply as a single atomic update.
//!
//! Every write bumps the record's `version`. Whole-record saves are
//! conditional on the version that was read, so a save never overwrites a
//! credit spend or a cancel flag that landed after the read.

#[cfg(test)]
pub(crate) mod interleave;
pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use folio_core::Subscription;

use crate::error::EntitlementResult;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A user together with the subscription it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub auth_provider_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub subscription: Subscription,
    /// Write counter, bumped by every store mutation.
    #[serde(default)]
    pub version: u64,
}

/// One identifier to look a user up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    UserId(String),
    AuthProviderId(String),
    Email(String),
}

impl LookupKey {
    pub fn kind(&self) -> &'static str {
        match self {
            LookupKey::UserId(_) => "user_id",
            LookupKey::AuthProviderId(_) => "auth_provider_id",
            LookupKey::Email(_) => "email",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            LookupKey::UserId(v) | LookupKey::AuthProviderId(v) | LookupKey::Email(v) => v,
        }
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind(), self.value())
    }
}

/// Emails are matched case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Storage backend for users and subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Returns the backend identifier (e.g., "memory", "sqlite")
    fn backend_id(&self) -> &'static str;

    async fn find_user(&self, key: &LookupKey) -> EntitlementResult<Option<UserRecord>>;

    /// Finds the user whose subscription is linked to the external billing id
    async fn find_by_billing_id(
        &self,
        stripe_subscription_id: &str,
    ) -> EntitlementResult<Option<UserRecord>>;

    /// Inserts a new user and its subscription in one unit
    async fn insert_user(&self, user: &UserRecord) -> EntitlementResult<()>;

    /// Overwrites the whole subscription record, but only if the stored
    /// version still equals `expected_version`. Returns false if another
    /// write got there first.
    async fn save_subscription(
        &self,
        user_id: &str,
        expected_version: u64,
        subscription: &Subscription,
    ) -> EntitlementResult<bool>;

    /// Flips only the cancel flag, leaving credits untouched
    async fn set_cancel_at_period_end(&self, user_id: &str, cancel: bool) -> EntitlementResult<()>;

    /// Atomically decrements remaining credits if they are above zero.
    ///
    /// Returns `Some(new_remaining)` on success, `None` if no credits were
    /// left (no mutation), and `UserNotFound` if there is no record.
    async fn decrement_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>>;

    /// Atomically increments remaining credits if below the total.
    ///
    /// Returns `None` when the balance is already full.
    async fn increment_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>>;

    /// All users on a paid tier, for the monthly reset
    async fn list_paid_subscriptions(&self) -> EntitlementResult<Vec<UserRecord>>;

    /// Removes the user and, by cascade, its subscription
    async fn delete_user(&self, user_id: &str) -> EntitlementResult<bool>;

    /// Whether a webhook event id was already applied
    async fn has_billing_event(&self, event_id: &str) -> EntitlementResult<bool>;

    /// Records an applied webhook event id. Returns false if it was
    /// already recorded.
    async fn record_billing_event(&self, event_id: &str) -> EntitlementResult<bool>;
}
