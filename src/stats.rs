//! Trust-lifecycle statistics and QA run history.
//!
//! Gives a quick answer to "how much of the cache is actually servable":
//! counts by trust level and QA status, plus the most recent scheduler runs.
//! Used by `afx stats`.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::db;
use crate::store::sqlite::SqliteStore;
use crate::store::FactStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let today_start = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);

    let stats = store.trust_stats(today_start).await?;

    println!("Autofacts — Trust Lifecycle Stats");
    println!("=================================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!();
    println!("  Chunks:          {}", stats.total);
    println!("  Verified:        {}", stats.verified);
    println!("  Candidate:       {}", stats.candidate);
    println!("  Unverified:      {}", stats.unverified);
    println!("  Banned:          {}", stats.banned);
    println!();
    println!("  QA pass:         {}", stats.qa_pass);
    println!("  QA fail:         {}", stats.qa_fail);
    println!("  QA pending:      {}", stats.qa_pending);
    println!();
    println!("  Created today:   {}", stats.created_since);

    let runs = store.recent_qa_runs(10).await?;
    if !runs.is_empty() {
        println!();
        println!("  Recent QA runs:");
        println!(
            "  {:<18} {:>9} {:>7} {:>7} {:>9} {:>9}",
            "STARTED", "EXAMINED", "PASS", "FAIL", "REPAIRED", "DURATION"
        );
        println!("  {}", "-".repeat(66));
        for run in &runs {
            println!(
                "  {:<18} {:>9} {:>7} {:>7} {:>9} {:>8}s",
                format_ts(run.started_at),
                run.examined,
                run.passed,
                run.failed,
                run.repaired,
                run.finished_at - run.started_at
            );
        }
    }

    println!();

    store.pool().close().await;
    Ok(())
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
