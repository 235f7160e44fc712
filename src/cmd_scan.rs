//! One-shot scan subcommands.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use linkaudit_scheduler::{Dataset, JobScheduler, ScanOptions, SchedulerSet};

use crate::cli::Commands;

const CLI_CONTEXT: &str = "cli";

/// Handle every subcommand except `serve`.
pub(crate) async fn handle_scan_command(
    command: Commands,
    schedulers: Arc<SchedulerSet>,
    actor: Option<u64>,
) -> anyhow::Result<()> {
    match command {
        Commands::Tick => tick(&schedulers).await,
        Commands::Scan { dataset, full, force, queue } => {
            let scheduler = scheduler_for(&schedulers, &dataset)?;
            let options = ScanOptions {
                requested_by: actor,
                ..ScanOptions::manual(CLI_CONTEXT)
            };
            let outcome = scheduler.request_scan(full, force, queue, options).await?;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("{}", outcome.message);
            }
            Ok(())
        }
        Commands::Cancel { dataset } => {
            let outcome = scheduler_for(&schedulers, &dataset)?.cancel_scan().await?;
            print_json(&outcome)
        }
        Commands::Status { dataset } => {
            let status = scheduler_for(&schedulers, &dataset)?.get_status().await?;
            print_json(&serde_json::json!({
                "dataset": dataset,
                "status": status,
                "progress_percent": status.progress_percent(),
            }))
        }
        Commands::History { dataset, limit } => {
            let entries = scheduler_for(&schedulers, &dataset)?.get_history(limit).await?;
            print_json(&entries)
        }
        Commands::Insights { dataset } => {
            let insights = scheduler_for(&schedulers, &dataset)?.get_insights().await?;
            print_json(&insights)
        }
        Commands::Reset { dataset } => {
            let outcome = scheduler_for(&schedulers, &dataset)?.reset(actor).await?;
            print_json(&outcome)
        }
        Commands::Reschedule { dataset: Some(dataset) } => {
            let outcome = scheduler_for(&schedulers, &dataset)?
                .reschedule_recurring_event(CLI_CONTEXT)
                .await?;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("{}", outcome.message);
            }
            Ok(())
        }
        Commands::Reschedule { dataset: None } => {
            let outcomes = schedulers.reschedule_all(CLI_CONTEXT).await?;
            let by_dataset: serde_json::Map<String, serde_json::Value> = outcomes
                .into_iter()
                .map(|(dataset, outcome)| Ok((dataset.to_string(), serde_json::to_value(outcome)?)))
                .collect::<Result<_, serde_json::Error>>()?;
            print_json(&by_dataset)
        }
        Commands::Serve { .. } => anyhow::bail!("serve is not a one-shot command"),
    }
}

/// Run one polling cycle; due batches go to stdout, one JSON object per line.
async fn tick(schedulers: &SchedulerSet) -> anyhow::Result<()> {
    let report = schedulers.tick(Utc::now().timestamp()).await?;
    for batch in &report.batches {
        println!("{}", serde_json::to_string(batch)?);
    }
    info!(
        "Tick: {} due batches, {} recurring runs, {} stale, {} unknown, {} failed",
        report.batches.len(),
        report.recurring.len(),
        report.stale,
        report.unknown,
        report.failed.len()
    );
    Ok(())
}

fn scheduler_for(schedulers: &SchedulerSet, name: &str) -> anyhow::Result<Arc<JobScheduler>> {
    let dataset: Dataset = name.parse().map_err(anyhow::Error::msg)?;
    schedulers
        .get(dataset)
        .with_context(|| format!("dataset '{}' has no scheduler", dataset))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
