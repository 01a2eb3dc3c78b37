// SPDX-License-Identifier: Apache-2.0

//! Identity resolution
//!
//! A request may carry any mix of the persisted user id, the identity
//! provider's subject id and an email address. Strategies are tried in
//! order and the first one that finds a record wins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EntitlementError, EntitlementResult};
use crate::store::{LookupKey, SubscriptionStore, UserRecord};

/// Identifiers attached to an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub auth_provider_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn auth_provider(id: impl Into<String>) -> Self {
        Self {
            auth_provider_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        [&self.user_id, &self.auth_provider_id, &self.email]
            .iter()
            .all(|v| v.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverStrategy {
    ByUserId,
    ByAuthProviderId,
    ByEmail,
}

impl ResolverStrategy {
    /// Persisted id, then identity-provider id, then email.
    pub const DEFAULT_ORDER: [ResolverStrategy; 3] = [
        ResolverStrategy::ByUserId,
        ResolverStrategy::ByAuthProviderId,
        ResolverStrategy::ByEmail,
    ];

    fn lookup_key(&self, identity: &Identity) -> Option<LookupKey> {
        let value = match self {
            ResolverStrategy::ByUserId => identity.user_id.as_deref(),
            ResolverStrategy::ByAuthProviderId => identity.auth_provider_id.as_deref(),
            ResolverStrategy::ByEmail => identity.email.as_deref(),
        }?
        .trim();

        if value.is_empty() {
            return None;
        }
        let value = value.to_string();
        Some(match self {
            ResolverStrategy::ByUserId => LookupKey::UserId(value),
            ResolverStrategy::ByAuthProviderId => LookupKey::AuthProviderId(value),
            ResolverStrategy::ByEmail => LookupKey::Email(value),
        })
    }
}

pub struct IdentityResolver {
    store: Arc<dyn SubscriptionStore>,
    strategies: Vec<ResolverStrategy>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self::with_strategies(store, ResolverStrategy::DEFAULT_ORDER.to_vec())
    }

    pub fn with_strategies(
        store: Arc<dyn SubscriptionStore>,
        strategies: Vec<ResolverStrategy>,
    ) -> Self {
        Self { store, strategies }
    }

    /// Resolves the identity to a user record.
    ///
    /// `Unauthorized` if no strategy had an identifier to try,
    /// `UserNotFound` if identifiers were present but matched nothing.
    pub async fn resolve(&self, identity: &Identity) -> EntitlementResult<UserRecord> {
        let mut tried: Option<LookupKey> = None;

        for strategy in &self.strategies {
            let Some(key) = strategy.lookup_key(identity) else {
                continue;
            };
            if let Some(user) = self.store.find_user(&key).await? {
                debug!(user_id = %user.id, via = key.kind(), "Identity resolved");
                return Ok(user);
            }
            tried.get_or_insert(key);
        }

        match tried {
            Some(key) => Err(EntitlementError::user_not_found(key.to_string())),
            None => Err(EntitlementError::Unauthorized),
        }
    }

    /// Like `resolve`, but a missing record is `Ok(None)`.
    pub async fn find(&self, identity: &Identity) -> EntitlementResult<Option<UserRecord>> {
        match self.resolve(identity).await {
            Ok(user) => Ok(Some(user)),
            Err(EntitlementError::UserNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use folio_core::Subscription;

    async fn store_with(users: &[(&str, Option<&str>, Option<&str>)]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for (id, auth, email) in users {
            store
                .insert_user(&UserRecord {
                    id: id.to_string(),
                    auth_provider_id: auth.map(String::from),
                    email: email.map(String::from),
                    subscription: Subscription::new_free(Utc::now()),
                    version: 0,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn persisted_id_wins_over_other_identifiers() {
        let store = store_with(&[
            ("u1", Some("auth|a"), Some("a@example.com")),
            ("u2", Some("auth|b"), Some("b@example.com")),
        ])
        .await;
        let resolver = IdentityResolver::new(store);

        let identity = Identity {
            user_id: Some("u1".into()),
            auth_provider_id: Some("auth|b".into()),
            email: Some("b@example.com".into()),
        };
        assert_eq!(resolver.resolve(&identity).await.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn falls_back_to_auth_provider_then_email() {
        let store = store_with(&[("u1", Some("auth|a"), None), ("u2", None, Some("b@example.com"))]).await;
        let resolver = IdentityResolver::new(store);

        let stale_id = Identity {
            user_id: Some("deleted".into()),
            auth_provider_id: Some("auth|a".into()),
            email: None,
        };
        assert_eq!(resolver.resolve(&stale_id).await.unwrap().id, "u1");

        let email_only = Identity::email("B@Example.com");
        assert_eq!(resolver.resolve(&email_only).await.unwrap().id, "u2");
    }

    #[tokio::test]
    async fn no_identifiers_is_unauthorized() {
        let resolver = IdentityResolver::new(store_with(&[]).await);
        let blank = Identity {
            user_id: Some("  ".into()),
            ..Identity::default()
        };
        assert!(blank.is_anonymous());
        assert!(matches!(
            resolver.resolve(&blank).await,
            Err(EntitlementError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn unmatched_identifiers_are_not_found() {
        let resolver = IdentityResolver::new(store_with(&[]).await);
        assert!(matches!(
            resolver.resolve(&Identity::auth_provider("auth|x")).await,
            Err(EntitlementError::UserNotFound { .. })
        ));
        assert!(resolver.find(&Identity::user("nobody")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn custom_order_is_respected() {
        let store = store_with(&[
            ("u1", None, Some("a@example.com")),
            ("u2", Some("auth|b"), None),
        ])
        .await;
        let resolver = IdentityResolver::with_strategies(
            store,
            vec![ResolverStrategy::ByEmail, ResolverStrategy::ByAuthProviderId],
        );
        let identity = Identity {
            user_id: None,
            auth_provider_id: Some("auth|b".into()),
            email: Some("a@example.com".into()),
        };
        assert_eq!(resolver.resolve(&identity).await.unwrap().id, "u1");
    }
}
