// SPDX-License-Identifier: Apache-2.0

//! Reconciliation Log
//!
//! Append-only record of places where local subscription state and billing
//! or metering truth may have diverged. Entries are never acted on
//! automatically; they are the work queue for manual reconciliation.
//! Stored as JSON lines next to a bounded in-memory cache.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Maximum entries to keep in memory for fast access
const MEMORY_CACHE_SIZE: usize = 1000;
const LOG_FILE: &str = "reconciliation.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Local cancel flag set but billing was not told.
    BillingCancelFailed,
    /// Local cancel flag cleared but billing was not told.
    BillingResumeFailed,
    /// Account deleted locally while the external subscription may still bill.
    BillingDeleteFailed,
    /// Gated action ran but its credit could not be charged.
    ChargeFailedAfterAction,
    /// Reserved credit could not be returned after a failed action.
    RefundFailed,
    /// Webhook referenced a price id with no configured tier.
    UnknownPrice,
    /// Webhook referenced a subscription with no local record.
    UnknownSubscription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: DiscrepancyKind,
    pub user_id: Option<String>,
    pub external_id: Option<String>,
    pub detail: String,
}

impl ReconciliationEntry {
    pub fn new(kind: DiscrepancyKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            user_id: None,
            external_id: None,
            detail: detail.into(),
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

pub struct ReconciliationLog {
    entries: RwLock<VecDeque<ReconciliationEntry>>,
    /// None keeps the log in memory only
    log_path: Option<PathBuf>,
}

impl ReconciliationLog {
    pub fn new(data_dir: PathBuf) -> Self {
        let log_path = data_dir.join(LOG_FILE);
        if let Err(e) = fs::create_dir_all(&data_dir) {
            error!("Failed to create reconciliation log directory: {}", e);
        }

        let log = Self {
            entries: RwLock::new(VecDeque::with_capacity(MEMORY_CACHE_SIZE)),
            log_path: Some(log_path),
        };
        log.load_recent_entries();
        log
    }

    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            log_path: None,
        }
    }

    fn load_recent_entries(&self) {
        let Some(path) = self.log_path.as_ref().filter(|p| p.exists()) else {
            return;
        };

        match File::open(path) {
            Ok(file) => {
                let mut entries = self.entries.write();
                for line in BufReader::new(file).lines().map_while(Result::ok) {
                    if let Ok(entry) = serde_json::from_str::<ReconciliationEntry>(&line) {
                        if entries.len() >= MEMORY_CACHE_SIZE {
                            entries.pop_front();
                        }
                        entries.push_back(entry);
                    }
                }
                debug!("Loaded {} reconciliation entries from file", entries.len());
            }
            Err(e) => warn!("Failed to load reconciliation log: {}", e),
        }
    }

    /// Records a discrepancy. Persistence failures are logged, never raised.
    pub fn record(&self, entry: ReconciliationEntry) {
        warn!(
            kind = ?entry.kind,
            user_id = ?entry.user_id,
            external_id = ?entry.external_id,
            detail = %entry.detail,
            "Reconciliation required"
        );

        {
            let mut entries = self.entries.write();
            if entries.len() >= MEMORY_CACHE_SIZE {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        if let Some(path) = &self.log_path {
            if let Err(e) = append_to_file(path, &entry) {
                error!("Failed to write reconciliation entry: {}", e);
            }
        }
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<ReconciliationEntry> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn count_of(&self, kind: DiscrepancyKind) -> usize {
        self.entries.read().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn append_to_file(path: &PathBuf, entry: &ReconciliationEntry) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let json = serde_json::to_string(entry)?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = ReconciliationLog::new(dir.path().to_path_buf());
            log.record(
                ReconciliationEntry::new(DiscrepancyKind::BillingCancelFailed, "timeout")
                    .for_user("user_1")
                    .with_external_id("sub_1"),
            );
        }

        let reopened = ReconciliationLog::new(dir.path().to_path_buf());
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, DiscrepancyKind::BillingCancelFailed);
        assert_eq!(recent[0].user_id.as_deref(), Some("user_1"));
        assert_eq!(recent[0].external_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn recent_is_newest_first() {
        let log = ReconciliationLog::in_memory();
        log.record(ReconciliationEntry::new(DiscrepancyKind::UnknownPrice, "first"));
        log.record(ReconciliationEntry::new(DiscrepancyKind::RefundFailed, "second"));

        let recent = log.recent(1);
        assert_eq!(recent[0].detail, "second");
        assert_eq!(log.count_of(DiscrepancyKind::UnknownPrice), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOG_FILE), "not json\n").unwrap();
        let log = ReconciliationLog::new(dir.path().to_path_buf());
        assert!(log.is_empty());
    }
}
