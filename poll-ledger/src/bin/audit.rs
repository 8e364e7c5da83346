//! Ledger audit binary
//!
//! Opens the configured store, audits every poll and exits non-zero if any
//! ledger fails verification or disagrees with its stored tally.
//!
//! Usage: `ledger-audit [config.toml]` (falls back to `POLL_LEDGER_*` env vars)

use anyhow::Context;
use poll_ledger::{Config, VoteCoordinator};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => Config::from_env()?,
    };

    tracing::info!(data_dir = ?config.data_dir, "Starting ledger audit");

    let coordinator = VoteCoordinator::open(config).context("opening poll store")?;
    let reports = coordinator.audit_all().await?;

    let mut damaged = 0usize;
    for (poll_id, outcome) in &reports {
        match outcome {
            Ok(report) if report.is_healthy() => {
                tracing::info!(
                    poll_id = %poll_id,
                    votes = report.recounted_tally.total(),
                    "Ledger OK"
                );
            }
            Ok(report) => {
                damaged += 1;
                tracing::error!(
                    poll_id = %poll_id,
                    report = %serde_json::to_string(report)?,
                    "Ledger FAILED audit"
                );
            }
            Err(e) => {
                damaged += 1;
                tracing::error!(poll_id = %poll_id, error = %e, "Ledger could not be audited");
            }
        }
    }

    coordinator.shutdown().await?;
    tracing::info!(polls = reports.len(), damaged, "Audit finished");

    Ok(if damaged == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
