//! CLI command implementations.
//!
//! Each `run_*` function backs one `sentinel` subcommand: it builds the Coda
//! client from config, performs the operation, and prints to stdout.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::client::WorkspaceClient;
use crate::coda::CodaClient;
use crate::config::Config;
use crate::models::Alert;
use crate::progress::ProgressMode;
use crate::remediate::{RemediationAction, RemediationDispatcher};
use crate::scan::{ScanReport, Scanner};
use crate::server;

fn connect(config: &Config) -> Result<Arc<dyn WorkspaceClient>> {
    let client = CodaClient::from_config(&config.workspace)
        .context("Failed to initialise the Coda client")?;
    Ok(Arc::new(client))
}

/// `sentinel scan`: one scan cycle, then print every alert.
pub async fn run_scan(config: &Config, json: bool, progress: ProgressMode) -> Result<()> {
    let scanner =
        Arc::new(Scanner::new(config, connect(config)?).with_progress(progress.reporter()));

    let on_interrupt = Arc::clone(&scanner);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling scan");
            on_interrupt.shutdown();
        }
    });

    let report = scanner.run_scan().await;
    interrupt.abort();

    let alerts = scanner.store().snapshot();
    if json {
        let out = serde_json::json!({ "report": report, "alerts": alerts });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_alerts(&alerts);
        println!();
        print_summary(&report);
    }

    Ok(())
}

fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No alerts.");
        return;
    }

    println!("{:<3} {:<24} {:<24} MESSAGE", "SEV", "TYPE", "SUBJECT");
    for alert in alerts {
        println!(
            "{:<3} {:<24} {:<24} {}",
            alert.severity.value(),
            alert.alert_type,
            alert.subject_id,
            alert.message
        );
    }
}

fn print_summary(report: &ScanReport) {
    println!("cycle:          {}", report.cycle_id);
    println!("documents:      {}", report.documents);
    println!("alerts:         {}", report.alerts);
    println!("fetch failures: {}", report.fetch_failures);
    println!(
        "duration:       {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    if report.cancelled {
        println!("status:         cancelled");
    }
}

/// `sentinel documents`: list the workspace's documents.
pub async fn run_documents(config: &Config) -> Result<()> {
    let client = connect(config)?;
    let documents = client
        .list_documents()
        .await
        .context("Failed to list documents")?;

    println!("{:<16} {:<20} NAME", "ID", "UPDATED");
    for doc in &documents {
        println!(
            "{:<16} {:<20} {}",
            doc.id,
            doc.updated_at.format("%Y-%m-%d %H:%M:%S"),
            doc.name
        );
    }
    println!();
    println!("{} documents", documents.len());

    Ok(())
}

/// `sentinel remediate`: apply one action; a failed outcome is an error.
pub async fn run_remediate(
    config: &Config,
    doc_id: &str,
    action: RemediationAction,
) -> Result<()> {
    let dispatcher = RemediationDispatcher::new(connect(config)?);
    let outcome = dispatcher.remediate(doc_id, action).await;

    if !outcome.success {
        anyhow::bail!("{} on {} failed: {}", action, doc_id, outcome.message);
    }
    println!("{}", outcome.message);
    Ok(())
}

/// `sentinel serve`: HTTP API plus background scanning.
pub async fn run_serve(config: &Config) -> Result<()> {
    let client = connect(config)?;
    let scanner = Arc::new(Scanner::new(config, Arc::clone(&client)));
    let dispatcher = Arc::new(RemediationDispatcher::new(client));
    server::run_server(config, scanner, dispatcher).await
}
