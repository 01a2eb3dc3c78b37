// SPDX-License-Identifier: Apache-2.0

//! Access Gate
//!
//! Single entry point in front of every gated operation. Checks run in a
//! fixed order (identity, feature, credits) and the first failure becomes a
//! structured denial the UI can render without parsing messages.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use folio_core::{can_access, minimum_tier_for, SubscriptionFeature, Tier};

use crate::config::MeteringOrder;
use crate::error::{EntitlementError, EntitlementResult};
use crate::identity::{Identity, IdentityResolver};
use crate::ledger::CreditLedger;
use crate::metrics;
use crate::reconciliation::{DiscrepancyKind, ReconciliationEntry, ReconciliationLog};
use crate::store::{SubscriptionStore, UserRecord};

/// Machine-readable denial code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Unauthorized,
    UserNotFound,
    SubscriptionRequired,
    CreditsExhausted,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::Unauthorized => "unauthorized",
            DenialReason::UserNotFound => "user_not_found",
            DenialReason::SubscriptionRequired => "subscription_required",
            DenialReason::CreditsExhausted => "credits_exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    pub reason: DenialReason,
    pub tier: Option<Tier>,
    pub credits_remaining: Option<u32>,
    /// Cheapest tier that would unlock the requested feature.
    pub required_tier: Option<Tier>,
}

impl Denial {
    fn bare(reason: DenialReason) -> Self {
        Self {
            reason,
            tier: None,
            credits_remaining: None,
            required_tier: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequirement {
    #[serde(default)]
    pub feature: Option<SubscriptionFeature>,
    #[serde(default)]
    pub require_ai_credits: bool,
}

impl AccessRequirement {
    pub fn feature(feature: SubscriptionFeature) -> Self {
        Self {
            feature: Some(feature),
            require_ai_credits: false,
        }
    }

    /// A feature that also spends one AI credit per use.
    pub fn ai_feature(feature: SubscriptionFeature) -> Self {
        Self {
            feature: Some(feature),
            require_ai_credits: true,
        }
    }
}

/// Proof that the checks passed, carrying the resolved user.
#[derive(Debug, Clone)]
pub struct GrantedAccess {
    pub user: UserRecord,
}

impl GrantedAccess {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn tier(&self) -> Tier {
        self.user.subscription.tier
    }
}

#[derive(Debug, Clone)]
pub enum AccessDecision {
    Allowed(GrantedAccess),
    Denied(Denial),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            AccessDecision::Denied(denial) => Some(denial),
            AccessDecision::Allowed(_) => None,
        }
    }
}

pub struct AccessGate {
    resolver: IdentityResolver,
    ledger: CreditLedger,
    reconciliation: Arc<ReconciliationLog>,
    metering_order: MeteringOrder,
}

impl AccessGate {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        reconciliation: Arc<ReconciliationLog>,
        metering_order: MeteringOrder,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(Arc::clone(&store)),
            ledger: CreditLedger::new(store),
            reconciliation,
            metering_order,
        }
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn metering_order(&self) -> MeteringOrder {
        self.metering_order
    }

    /// Runs identity, feature and credit checks in that order.
    ///
    /// Denials are `Ok(Denied)`; only storage failures are `Err`.
    #[instrument(skip(self, identity))]
    pub async fn check_access(
        &self,
        identity: &Identity,
        requirement: &AccessRequirement,
    ) -> EntitlementResult<AccessDecision> {
        let user = match self.resolver.resolve(identity).await {
            Ok(user) => user,
            Err(EntitlementError::Unauthorized) => {
                return Ok(self.deny(Denial::bare(DenialReason::Unauthorized)));
            }
            Err(EntitlementError::UserNotFound { .. }) => {
                return Ok(self.deny(Denial::bare(DenialReason::UserNotFound)));
            }
            Err(e) => return Err(e),
        };

        let sub = &user.subscription;

        if let Some(feature) = requirement.feature {
            if !can_access(sub.tier, feature) {
                return Ok(self.deny(Denial {
                    reason: DenialReason::SubscriptionRequired,
                    tier: Some(sub.tier),
                    credits_remaining: Some(sub.ai_credits_remaining),
                    required_tier: Some(minimum_tier_for(feature)),
                }));
            }
        }

        if requirement.require_ai_credits && !sub.has_credits() {
            return Ok(self.deny(Denial {
                reason: DenialReason::CreditsExhausted,
                tier: Some(sub.tier),
                credits_remaining: Some(0),
                required_tier: None,
            }));
        }

        debug!(user_id = %user.id, tier = %sub.tier, "Access granted");
        Ok(AccessDecision::Allowed(GrantedAccess { user }))
    }

    fn deny(&self, denial: Denial) -> AccessDecision {
        metrics::record_denial(denial.reason);
        info!(reason = denial.reason.code(), "Access denied");
        AccessDecision::Denied(denial)
    }

    /// Like `check_access`, but a denial becomes the matching error so
    /// callers can propagate it with `?`.
    pub async fn require(
        &self,
        identity: &Identity,
        requirement: &AccessRequirement,
    ) -> EntitlementResult<GrantedAccess> {
        let denial = match self.check_access(identity, requirement).await? {
            AccessDecision::Allowed(granted) => return Ok(granted),
            AccessDecision::Denied(denial) => denial,
        };

        Err(match (denial.reason, requirement.feature) {
            (DenialReason::Unauthorized, _) => EntitlementError::Unauthorized,
            (DenialReason::UserNotFound, _) => EntitlementError::user_not_found(
                identity
                    .user_id
                    .as_deref()
                    .or(identity.auth_provider_id.as_deref())
                    .or(identity.email.as_deref())
                    .unwrap_or_default(),
            ),
            (DenialReason::SubscriptionRequired, Some(feature)) => {
                EntitlementError::SubscriptionRequired {
                    feature,
                    tier: denial.tier.unwrap_or_default(),
                }
            }
            (DenialReason::SubscriptionRequired, None) => {
                EntitlementError::inconsistent("Feature denial without a requested feature")
            }
            (DenialReason::CreditsExhausted, _) => EntitlementError::CreditsExhausted {
                tier: denial.tier.unwrap_or_default(),
            },
        })
    }

    /// Charges one credit for a granted operation.
    pub async fn use_credit(&self, granted: &GrantedAccess) -> EntitlementResult<u32> {
        self.ledger.use_credit(granted.user_id()).await
    }

    /// Runs a metered action and charges for it according to the configured
    /// metering order.
    ///
    /// With `ChargeAfter` a successful action's result is always returned,
    /// even when the charge fails afterwards. With `ReserveFirst` the credit
    /// is taken up front and returned if the action fails.
    #[instrument(skip(self, granted, action), fields(user_id = granted.user_id()))]
    pub async fn run_metered<T, F>(
        &self,
        granted: &GrantedAccess,
        action: F,
    ) -> EntitlementResult<T>
    where
        F: Future<Output = EntitlementResult<T>>,
    {
        match self.metering_order {
            MeteringOrder::ChargeAfter => {
                let output = action.await?;
                if let Err(e) = self.use_credit(granted).await {
                    error!("Action succeeded but credit was not charged: {}", e);
                    self.reconciliation.record(
                        ReconciliationEntry::new(DiscrepancyKind::ChargeFailedAfterAction, e.to_string())
                            .for_user(granted.user_id()),
                    );
                }
                Ok(output)
            }
            MeteringOrder::ReserveFirst => {
                self.use_credit(granted).await?;
                match action.await {
                    Ok(output) => Ok(output),
                    Err(action_err) => {
                        if let Err(e) = self.ledger.refund_credit(granted.user_id()).await {
                            error!("Failed to refund reserved credit: {}", e);
                            self.reconciliation.record(
                                ReconciliationEntry::new(DiscrepancyKind::RefundFailed, e.to_string())
                                    .for_user(granted.user_id()),
                            );
                        }
                        Err(action_err)
                    }
                }
            }
        }
    }
}
