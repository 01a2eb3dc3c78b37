// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the entitlement engine
//!
//! Store, billing and configuration failures are mapped to these variants so
//! callers see one taxonomy regardless of which collaborator failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use folio_core::{SubscriptionFeature, Tier};

/// Unified error type for all entitlement operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum EntitlementError {
    #[error("No resolvable identity on request")]
    Unauthorized,

    #[error("No subscription record for user: {user}")]
    UserNotFound { user: String },

    #[error("Feature {feature} is not included in the {tier} tier")]
    SubscriptionRequired {
        feature: SubscriptionFeature,
        tier: Tier,
    },

    #[error("No AI credits remaining on the {tier} tier")]
    CreditsExhausted { tier: Tier },

    #[error("Billing provider error: {message}")]
    ExternalBilling { message: String },

    #[error("Inconsistent subscription state: {message}")]
    InconsistentState { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl EntitlementError {
    pub fn user_not_found(user: impl Into<String>) -> Self {
        Self::UserNotFound { user: user.into() }
    }

    pub fn billing(msg: impl Into<String>) -> Self {
        Self::ExternalBilling { message: msg.into() }
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::InconsistentState { message: msg.into() }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation { message: msg.into() }
    }
}

impl From<sqlx::Error> for EntitlementError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<reqwest::Error> for EntitlementError {
    fn from(err: reqwest::Error) -> Self {
        Self::billing(err.to_string())
    }
}

/// Result type alias for entitlement operations
pub type EntitlementResult<T> = Result<T, EntitlementError>;
