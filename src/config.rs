// SPDX-License-Identifier: Apache-2.0

//! Engine configuration
//!
//! Loaded from `folio.json` in the data directory, then overridden by
//! environment variables. Missing file means defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use folio_core::Tier;

use crate::error::{EntitlementError, EntitlementResult};
use crate::observability::Sensitive;

const CONFIG_FILE: &str = "folio.json";
const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// When a metered action is charged relative to running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MeteringOrder {
    /// Run the action, then deduct one credit on success.
    #[default]
    ChargeAfter,
    /// Deduct first, refund if the action fails.
    ReserveFirst,
}

impl std::str::FromStr for MeteringOrder {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "charge_after" => Ok(MeteringOrder::ChargeAfter),
            "reserve_first" => Ok(MeteringOrder::ReserveFirst),
            other => Err(EntitlementError::config(format!(
                "Unknown metering order: {}",
                other
            ))),
        }
    }
}

/// A billing price and the tier it buys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub price_id: String,
    pub tier: Tier,
    #[serde(default)]
    pub is_yearly: bool,
}

/// Maps external price ids to tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCatalog {
    #[serde(default)]
    pub prices: Vec<PriceEntry>,
}

impl PriceCatalog {
    pub fn resolve(&self, price_id: &str) -> Option<&PriceEntry> {
        self.prices.iter().find(|p| p.price_id == price_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub secret_key: Sensitive<String>,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_base: default_stripe_api_base(),
            secret_key: Sensitive::default(),
        }
    }
}

fn default_stripe_api_base() -> String {
    STRIPE_API_BASE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub prices: PriceCatalog,
    #[serde(default)]
    pub metering_order: MeteringOrder,
    /// Argon2 PHC hash of the scheduled-trigger secret.
    #[serde(default)]
    pub cron_secret_hash: Option<String>,
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_url: None,
            stripe: StripeConfig::default(),
            prices: PriceCatalog::default(),
            metering_order: MeteringOrder::default(),
            cron_secret_hash: None,
        }
    }

    /// Loads from the default data directory (or `FOLIO_DATA_DIR`).
    pub fn load() -> EntitlementResult<Self> {
        let data_dir = std::env::var_os("FOLIO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = Self::load_from(&data_dir)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `folio.json` from `data_dir` without looking at the environment.
    pub fn load_from(data_dir: &Path) -> EntitlementResult<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::new(data_dir));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| EntitlementError::config(format!("Failed to read config: {}", e)))?;
        let mut config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| EntitlementError::config(format!("Failed to parse config: {}", e)))?;
        config.data_dir = data_dir.to_path_buf();

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> EntitlementResult<()> {
        if let Ok(url) = std::env::var("FOLIO_DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(key) = std::env::var("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = Sensitive::new(key);
        }
        if let Ok(base) = std::env::var("STRIPE_API_BASE") {
            self.stripe.api_base = base;
        }
        if let Ok(hash) = std::env::var("FOLIO_CRON_SECRET_HASH") {
            self.cron_secret_hash = Some(hash);
        }
        if let Ok(order) = std::env::var("FOLIO_METERING_ORDER") {
            self.metering_order = order.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> EntitlementResult<()> {
        for entry in &self.prices.prices {
            if entry.price_id.trim().is_empty() {
                return Err(EntitlementError::config("Price id must not be empty"));
            }
            if !entry.tier.is_paid() {
                return Err(EntitlementError::config(format!(
                    "Price {} maps to the free tier",
                    entry.price_id
                )));
            }
            let duplicates = self
                .prices
                .prices
                .iter()
                .filter(|p| p.price_id == entry.price_id)
                .count();
            if duplicates > 1 {
                return Err(EntitlementError::config(format!(
                    "Duplicate price id: {}",
                    entry.price_id
                )));
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", self.data_dir.join("folio.db").display())
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn save(&self) -> EntitlementResult<()> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| EntitlementError::config(format!("Failed to create data dir: {}", e)))?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EntitlementError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(self.data_dir.join(CONFIG_FILE), content)
            .map_err(|e| EntitlementError::config(format!("Failed to write config: {}", e)))?;
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("folio"))
        .unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_default();
            PathBuf::from(home).join(".folio")
        })
}
