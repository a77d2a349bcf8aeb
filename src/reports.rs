//! `report-analyst reports`: list stored analyses.

use anyhow::Result;

use crate::config::Config;
use crate::server::format_ts_iso;
use crate::store::{ReportStore, SqliteReportStore};

/// CLI entry point. Prints one line per stored report, newest first.
pub async fn run_reports(config: &Config) -> Result<()> {
    let store = SqliteReportStore::new(config.db.path.clone());
    let reports = store.list_reports().await?;
    store.close().await;

    if reports.is_empty() {
        println!("No reports stored yet.");
        return Ok(());
    }

    println!("{:<6} {:<22} REPORT", "ID", "CREATED");
    for report in &reports {
        println!(
            "{:<6} {:<22} {}",
            report.id,
            format_ts_iso(report.create_time),
            report.report_name
        );
    }
    println!();
    println!("{} report(s)", reports.len());

    Ok(())
}
