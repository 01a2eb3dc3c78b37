// SPDX-License-Identifier: Apache-2.0

//! Monthly credit reset
//!
//! Run by an external scheduler, one invocation per period. Each record is
//! written independently, so an interrupted run can simply be started again.
//!
//! Periods advance from the stored renewal date, never from the time the
//! run happened to start, so scheduler jitter cannot push a cancellation
//! past the run that should have ended it.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::SubscriptionLifecycle;
use crate::error::{EntitlementError, EntitlementResult};
use crate::ledger::CreditLedger;
use crate::metrics;
use crate::observability::Sensitive;

/// Authenticates the scheduled trigger against a stored Argon2 hash.
pub struct CronGuard {
    secret_hash: Option<String>,
}

impl CronGuard {
    /// With no hash configured every trigger is rejected.
    pub fn new(secret_hash: Option<String>) -> Self {
        Self {
            secret_hash: secret_hash.filter(|h| !h.trim().is_empty()),
        }
    }

    /// Produces the PHC string to configure as `cron_secret_hash`.
    pub fn hash_secret(secret: &str) -> EntitlementResult<String> {
        if secret.is_empty() {
            return Err(EntitlementError::validation("Cron secret cannot be empty"));
        }
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| EntitlementError::config(format!("Failed to hash cron secret: {}", e)))
    }

    pub fn verify(&self, presented: &Sensitive<String>) -> EntitlementResult<()> {
        let Some(stored) = self.secret_hash.as_deref() else {
            warn!("Scheduled trigger rejected: no cron secret configured");
            return Err(EntitlementError::Unauthorized);
        };

        let parsed = PasswordHash::new(stored)
            .map_err(|e| EntitlementError::config(format!("Invalid cron secret hash: {}", e)))?;

        if Argon2::default()
            .verify_password(presented.expose().as_bytes(), &parsed)
            .is_ok()
        {
            Ok(())
        } else {
            warn!("Scheduled trigger rejected: secret mismatch");
            Err(EntitlementError::Unauthorized)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub processed: usize,
    pub reset: usize,
    pub downgraded: usize,
    /// No longer matched its listing when written; left for the next run.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetAction {
    Replenish,
    Downgrade,
}

impl SubscriptionLifecycle {
    /// Resets every paid subscription to its tier allowance, downgrading
    /// those whose period ended with a pending cancellation.
    ///
    /// Free subscriptions are not part of the bulk reset.
    #[instrument(skip(self))]
    pub async fn run_monthly_reset(&self) -> EntitlementResult<ResetReport> {
        let now = self.now();
        let paid = self.store.list_paid_subscriptions().await?;
        let mut report = ResetReport::default();

        for user in paid {
            report.processed += 1;
            let user_id = user.id.clone();
            let listed_tier = user.subscription.tier;
            let planned = if user.subscription.cancel_at_period_end
                && user.subscription.period_elapsed(now)
            {
                ResetAction::Downgrade
            } else {
                ResetAction::Replenish
            };

            // The fresh record must still call for the listed action.
            let result = self
                .update(user, |sub| {
                    let due = sub.cancel_at_period_end && sub.period_elapsed(now);
                    let still_planned = match planned {
                        ResetAction::Downgrade => due,
                        ResetAction::Replenish => !due,
                    };
                    if sub.tier != listed_tier || !still_planned {
                        return false;
                    }
                    match planned {
                        ResetAction::Downgrade => sub.downgrade_to_free(now),
                        ResetAction::Replenish => sub.apply_monthly_reset(now),
                    }
                    true
                })
                .await;

            match (result, planned) {
                (Ok((_, false)), _) => {
                    debug!(user_id = %user_id, "Subscription changed since listing, skipped");
                    report.skipped += 1;
                }
                (Ok((_, true)), ResetAction::Downgrade) => {
                    info!(user_id = %user_id, from = %listed_tier, "Subscription ended, now on free tier");
                    report.downgraded += 1;
                }
                (Ok((sub, true)), ResetAction::Replenish) => {
                    debug!(
                        user_id = %user_id,
                        allowance = CreditLedger::reset_monthly(sub.tier),
                        next_renewal = %sub.next_renewal_date,
                        "Credits reset"
                    );
                    report.reset += 1;
                }
                (Err(e), _) => {
                    error!(user_id = %user_id, "Monthly reset failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        metrics::record_resets(report.reset as u64);
        info!(
            processed = report.processed,
            reset = report.reset,
            downgraded = report.downgraded,
            skipped = report.skipped,
            failed = report.failed,
            "Monthly reset finished"
        );
        Ok(report)
    }

    /// Entry point for the scheduled trigger: authenticate, then reset.
    pub async fn run_scheduled_reset(
        &self,
        guard: &CronGuard,
        presented: &Sensitive<String>,
    ) -> EntitlementResult<ResetReport> {
        guard.verify(presented)?;
        self.run_monthly_reset().await
    }
}
