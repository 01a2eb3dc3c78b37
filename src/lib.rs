// SPDX-License-Identifier: Apache-2.0

// Folio - reading journal subscriptions and AI credit metering
// Core library

pub mod billing;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod observability;
pub mod reconciliation;
pub mod store;

use std::sync::Arc;

use tracing::info;

use billing::{BillingProvider, StripeBillingClient};
use config::{EngineConfig, MeteringOrder, PriceCatalog};
use error::EntitlementResult;
use gate::AccessGate;
use lifecycle::{CronGuard, SubscriptionLifecycle};
use reconciliation::ReconciliationLog;
use store::{SqliteStore, SubscriptionStore};

pub use folio_core::{
    can_access, has_reached_book_limit, limits_for, minimum_tier_for, LifecycleState,
    Subscription, SubscriptionFeature, Tier, TierLimits,
};

/// Everything a request handler or the scheduled trigger needs, wired to
/// one store.
pub struct EntitlementEngine {
    pub store: Arc<dyn SubscriptionStore>,
    pub lifecycle: SubscriptionLifecycle,
    pub gate: AccessGate,
    pub reconciliation: Arc<ReconciliationLog>,
}

impl EntitlementEngine {
    pub fn from_parts(
        store: Arc<dyn SubscriptionStore>,
        billing: Arc<dyn BillingProvider>,
        reconciliation: Arc<ReconciliationLog>,
        prices: PriceCatalog,
        metering_order: MeteringOrder,
    ) -> Self {
        let lifecycle = SubscriptionLifecycle::new(
            Arc::clone(&store),
            billing,
            Arc::clone(&reconciliation),
            prices,
        );
        let gate = AccessGate::new(Arc::clone(&store), Arc::clone(&reconciliation), metering_order);
        Self {
            store,
            lifecycle,
            gate,
            reconciliation,
        }
    }

    /// SQLite store, Stripe billing and a file-backed reconciliation log,
    /// all taken from `config`.
    pub async fn from_config(config: &EngineConfig) -> EntitlementResult<Self> {
        let store = SqliteStore::connect(&config.database_url()).await?;
        let billing = StripeBillingClient::new(&config.stripe)?;
        let reconciliation = Arc::new(ReconciliationLog::new(config.data_dir.clone()));

        info!(
            store = store.backend_id(),
            billing = billing.provider_id(),
            metering_order = ?config.metering_order,
            "Entitlement engine ready"
        );

        Ok(Self::from_parts(
            Arc::new(store),
            Arc::new(billing),
            reconciliation,
            config.prices.clone(),
            config.metering_order,
        ))
    }

    pub fn cron_guard(config: &EngineConfig) -> CronGuard {
        CronGuard::new(config.cron_secret_hash.clone())
    }
}
