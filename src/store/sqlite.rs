// SPDX-License-Identifier: Apache-2.0

//! SQLite store
//!
//! Persists users and subscriptions using SQLx.
//!
//! ## Atomicity
//!
//! Credit changes are single `UPDATE ... WHERE ai_credits_remaining > 0
//! RETURNING` statements, so two connections racing on the last credit
//! cannot both succeed. Every statement that touches a subscription bumps
//! `version`; whole-record saves are `UPDATE ... WHERE version = ?`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tracing::{debug, instrument};

use folio_core::{Subscription, Tier};

use super::{normalize_email, LookupKey, SubscriptionStore, UserRecord};
use crate::error::{EntitlementError, EntitlementResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        auth_provider_id TEXT UNIQUE,
        email TEXT UNIQUE,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS subscriptions (
        user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
        tier TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT,
        is_yearly INTEGER NOT NULL DEFAULT 0,
        ai_credits_remaining INTEGER NOT NULL CHECK (ai_credits_remaining >= 0),
        ai_credits_total INTEGER NOT NULL,
        auto_renew INTEGER NOT NULL DEFAULT 1,
        last_renewal_date TEXT NOT NULL,
        next_renewal_date TEXT NOT NULL,
        stripe_price_id TEXT,
        stripe_subscription_id TEXT,
        cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_stripe_id
        ON subscriptions (stripe_subscription_id)",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_tier ON subscriptions (tier)",
    "CREATE TABLE IF NOT EXISTS billing_events (
        event_id TEXT PRIMARY KEY,
        received_at TEXT NOT NULL
    )",
];

const USER_COLUMNS: &str = "u.id, u.auth_provider_id, u.email, s.tier, s.start_date, s.end_date, \
     s.is_yearly, s.ai_credits_remaining, s.ai_credits_total, s.auto_renew, \
     s.last_renewal_date, s.next_renewal_date, s.stripe_price_id, \
     s.stripe_subscription_id, s.cancel_at_period_end, s.version";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    const MAX_CONNECTIONS: u32 = 5;
    const BUSY_TIMEOUT_MS: u64 = 5000;

    /// Opens (creating if missing) the database at `url` and applies the schema.
    pub async fn connect(url: &str) -> EntitlementResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| EntitlementError::config(format!("Invalid database url: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(Self::BUSY_TIMEOUT_MS));

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> EntitlementResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        // Databases created before write versioning lack the column.
        let has_version = sqlx::query(
            "SELECT 1 FROM pragma_table_info('subscriptions') WHERE name = 'version'",
        )
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        if !has_version {
            sqlx::query("ALTER TABLE subscriptions ADD COLUMN version INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
            debug!("Added version column to subscriptions");
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    async fn subscription_exists(&self, user_id: &str) -> EntitlementResult<bool> {
        let row = sqlx::query("SELECT 1 FROM subscriptions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn fetch_user(&self, clause: &str, value: &str) -> EntitlementResult<Option<UserRecord>> {
        let sql = format!(
            "SELECT {} FROM users u JOIN subscriptions s ON s.user_id = u.id WHERE {} LIMIT 1",
            USER_COLUMNS, clause
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }
}

fn credits_from_db(value: i64, column: &str) -> EntitlementResult<u32> {
    u32::try_from(value).map_err(|_| {
        EntitlementError::inconsistent(format!("{} out of range: {}", column, value))
    })
}

fn user_from_row(row: &SqliteRow) -> EntitlementResult<UserRecord> {
    let tier: String = row.try_get("tier")?;
    let tier = Tier::from_str(&tier).map_err(|e| EntitlementError::inconsistent(e.to_string()))?;
    let remaining: i64 = row.try_get("ai_credits_remaining")?;
    let total: i64 = row.try_get("ai_credits_total")?;
    let version: i64 = row.try_get("version")?;

    let subscription = Subscription {
        tier,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        is_yearly: row.try_get("is_yearly")?,
        ai_credits_remaining: credits_from_db(remaining, "ai_credits_remaining")?,
        ai_credits_total: credits_from_db(total, "ai_credits_total")?,
        auto_renew: row.try_get("auto_renew")?,
        last_renewal_date: row.try_get("last_renewal_date")?,
        next_renewal_date: row.try_get("next_renewal_date")?,
        stripe_price_id: row.try_get("stripe_price_id")?,
        stripe_subscription_id: row.try_get("stripe_subscription_id")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
    };

    Ok(UserRecord {
        id: row.try_get("id")?,
        auth_provider_id: row.try_get("auth_provider_id")?,
        email: row.try_get("email")?,
        subscription,
        version: u64::try_from(version).map_err(|_| {
            EntitlementError::inconsistent(format!("version out of range: {}", version))
        })?,
    })
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    fn backend_id(&self) -> &'static str {
        "sqlite"
    }

    async fn find_user(&self, key: &LookupKey) -> EntitlementResult<Option<UserRecord>> {
        match key {
            LookupKey::UserId(id) => self.fetch_user("u.id = ?", id).await,
            LookupKey::AuthProviderId(auth_id) => {
                self.fetch_user("u.auth_provider_id = ?", auth_id).await
            }
            LookupKey::Email(email) => {
                self.fetch_user("u.email = ?", &normalize_email(email)).await
            }
        }
    }

    async fn find_by_billing_id(
        &self,
        stripe_subscription_id: &str,
    ) -> EntitlementResult<Option<UserRecord>> {
        self.fetch_user("s.stripe_subscription_id = ?", stripe_subscription_id)
            .await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn insert_user(&self, user: &UserRecord) -> EntitlementResult<()> {
        let sub = &user.subscription;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, auth_provider_id, email, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(user.auth_provider_id.as_deref())
        .bind(user.email.as_deref().map(normalize_email))
        .bind(sub.start_date)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO subscriptions (user_id, tier, start_date, end_date, is_yearly, \
             ai_credits_remaining, ai_credits_total, auto_renew, last_renewal_date, \
             next_renewal_date, stripe_price_id, stripe_subscription_id, cancel_at_period_end) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(sub.tier.as_str())
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(sub.is_yearly)
        .bind(i64::from(sub.ai_credits_remaining))
        .bind(i64::from(sub.ai_credits_total))
        .bind(sub.auto_renew)
        .bind(sub.last_renewal_date)
        .bind(sub.next_renewal_date)
        .bind(sub.stripe_price_id.as_deref())
        .bind(sub.stripe_subscription_id.as_deref())
        .bind(sub.cancel_at_period_end)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_subscription(
        &self,
        user_id: &str,
        expected_version: u64,
        sub: &Subscription,
    ) -> EntitlementResult<bool> {
        let expected = i64::try_from(expected_version)
            .map_err(|_| EntitlementError::validation("Version out of range"))?;
        let result = sqlx::query(
            "UPDATE subscriptions SET tier = ?, start_date = ?, end_date = ?, is_yearly = ?, \
             ai_credits_remaining = ?, ai_credits_total = ?, auto_renew = ?, \
             last_renewal_date = ?, next_renewal_date = ?, stripe_price_id = ?, \
             stripe_subscription_id = ?, cancel_at_period_end = ?, version = version + 1 \
             WHERE user_id = ? AND version = ?",
        )
        .bind(sub.tier.as_str())
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(sub.is_yearly)
        .bind(i64::from(sub.ai_credits_remaining))
        .bind(i64::from(sub.ai_credits_total))
        .bind(sub.auto_renew)
        .bind(sub.last_renewal_date)
        .bind(sub.next_renewal_date)
        .bind(sub.stripe_price_id.as_deref())
        .bind(sub.stripe_subscription_id.as_deref())
        .bind(sub.cancel_at_period_end)
        .bind(user_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.subscription_exists(user_id).await? {
            debug!(user_id, "Subscription changed since it was read");
            Ok(false)
        } else {
            Err(EntitlementError::user_not_found(user_id))
        }
    }

    async fn set_cancel_at_period_end(&self, user_id: &str, cancel: bool) -> EntitlementResult<()> {
        let result = sqlx::query(
            "UPDATE subscriptions SET cancel_at_period_end = ?, version = version + 1 \
             WHERE user_id = ?",
        )
        .bind(cancel)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::user_not_found(user_id));
        }
        Ok(())
    }

    async fn decrement_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        let row = sqlx::query(
            "UPDATE subscriptions SET ai_credits_remaining = ai_credits_remaining - 1, \
             version = version + 1 \
             WHERE user_id = ? AND ai_credits_remaining > 0 \
             RETURNING ai_credits_remaining",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let remaining: i64 = row.try_get("ai_credits_remaining")?;
                Ok(Some(credits_from_db(remaining, "ai_credits_remaining")?))
            }
            None if self.subscription_exists(user_id).await? => Ok(None),
            None => Err(EntitlementError::user_not_found(user_id)),
        }
    }

    async fn increment_credit(&self, user_id: &str) -> EntitlementResult<Option<u32>> {
        let row = sqlx::query(
            "UPDATE subscriptions SET ai_credits_remaining = ai_credits_remaining + 1, \
             version = version + 1 \
             WHERE user_id = ? AND ai_credits_remaining < ai_credits_total \
             RETURNING ai_credits_remaining",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let remaining: i64 = row.try_get("ai_credits_remaining")?;
                Ok(Some(credits_from_db(remaining, "ai_credits_remaining")?))
            }
            None if self.subscription_exists(user_id).await? => Ok(None),
            None => Err(EntitlementError::user_not_found(user_id)),
        }
    }

    async fn list_paid_subscriptions(&self) -> EntitlementResult<Vec<UserRecord>> {
        let sql = format!(
            "SELECT {} FROM users u JOIN subscriptions s ON s.user_id = u.id \
             WHERE s.tier IN ('basic', 'premium') ORDER BY u.id",
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, user_id: &str) -> EntitlementResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn has_billing_event(&self, event_id: &str) -> EntitlementResult<bool> {
        let row = sqlx::query("SELECT 1 FROM billing_events WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn record_billing_event(&self, event_id: &str) -> EntitlementResult<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO billing_events (event_id, received_at) VALUES (?, ?)")
                .bind(event_id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}
