// SPDX-License-Identifier: Apache-2.0

// Scheduled trigger entry point.
//
//   folio reset           verify FOLIO_CRON_SECRET, then run the monthly reset
//   folio hash-secret     print the Argon2 hash to configure for FOLIO_CRON_SECRET
//   folio reconciliation  print recent reconciliation entries as JSON lines

use std::process::ExitCode;

use tracing::{error, info};

use folio_lib::config::EngineConfig;
use folio_lib::error::{EntitlementError, EntitlementResult};
use folio_lib::lifecycle::CronGuard;
use folio_lib::observability::{init_tracing, Sensitive};
use folio_lib::reconciliation::ReconciliationLog;
use folio_lib::EntitlementEngine;

const RECONCILIATION_REPORT_LIMIT: usize = 100;

fn presented_secret() -> Sensitive<String> {
    Sensitive::new(std::env::var("FOLIO_CRON_SECRET").unwrap_or_default())
}

async fn run_reset(config: &EngineConfig) -> EntitlementResult<()> {
    let guard = EntitlementEngine::cron_guard(config);
    // Authenticate before touching the database.
    guard.verify(&presented_secret())?;

    let engine = EntitlementEngine::from_config(config).await?;
    let report = engine.lifecycle.run_monthly_reset().await?;
    info!(?report, "Scheduled reset complete");

    if report.failed > 0 {
        return Err(EntitlementError::inconsistent(format!(
            "{} subscriptions failed to reset",
            report.failed
        )));
    }
    Ok(())
}

fn print_reconciliation(config: &EngineConfig) -> EntitlementResult<()> {
    let log = ReconciliationLog::new(config.data_dir.clone());
    for entry in log.recent(RECONCILIATION_REPORT_LIMIT) {
        let line = serde_json::to_string(&entry)
            .map_err(|e| EntitlementError::storage(format!("Failed to encode entry: {}", e)))?;
        println!("{}", line);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = std::env::args().nth(1).unwrap_or_else(|| "reset".to_string());

    if command == "hash-secret" {
        return match CronGuard::hash_secret(presented_secret().expose()) {
            Ok(hash) => {
                println!("{}", hash);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_dir());

    match command.as_str() {
        "reset" => match run_reset(&config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Scheduled reset failed: {}", e);
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        },
        "reconciliation" => match print_reconciliation(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        },
        other => {
            eprintln!("Unknown command: {}", other);
            ExitCode::FAILURE
        }
    }
}
