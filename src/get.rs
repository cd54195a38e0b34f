//! Chunk inspection by row id.
//!
//! Prints a chunk's full trust state with visibility derived on the spot,
//! never read from storage. Used by `afx get` and the operator-override
//! workflow to look before leaping.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::Chunk;
use crate::store::sqlite::SqliteStore;
use crate::store::FactStore;

/// Fetch one chunk by row id.
pub async fn get_chunk(config: &Config, id: &str) -> Result<Chunk> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let chunk = store.get_by_id(id).await?;
    store.pool().close().await;

    match chunk {
        Some(chunk) => Ok(chunk),
        None => bail!("chunk not found: {}", id),
    }
}

/// CLI entry point — fetches a chunk and prints it to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let chunk = get_chunk(config, id).await?;

    println!("--- Chunk ---");
    println!("id:                    {}", chunk.id);
    println!("vehicle_key:           {}", chunk.vehicle_key);
    println!("content_id:            {}", chunk.content_id);
    println!("chunk_type:            {}", chunk.chunk_type);
    println!("title:                 {}", chunk.title);
    println!();
    println!("visibility:            {}", chunk.visibility().as_str());
    println!("verified_status:       {}", chunk.verified_status.as_str());
    println!("qa_status:             {}", chunk.qa_status.as_str());
    println!("qa_pass_count:         {}", chunk.qa_pass_count);
    println!("promotion_count:       {}", chunk.promotion_count);
    println!("regeneration_attempts: {}", chunk.regeneration_attempts);
    if let Some(ref notes) = chunk.qa_notes {
        println!("qa_notes:              {}", notes);
    }
    println!("last_qa_reviewed_at:   {}", format_opt_ts(chunk.last_qa_reviewed_at));
    println!("verified_at:           {}", format_opt_ts(chunk.verified_at));
    println!("failed_at:             {}", format_opt_ts(chunk.failed_at));
    println!("regenerated_at:        {}", format_opt_ts(chunk.regenerated_at));
    println!("created_at:            {}", format_ts_iso(chunk.created_at));
    println!("updated_at:            {}", format_ts_iso(chunk.updated_at));
    println!();

    println!("--- Content ---");
    println!("{}", chunk.content_text);
    println!();
    println!("source_confidence: {:.2}", chunk.source_confidence);
    for source in &chunk.sources {
        println!("source: {}", source);
    }
    println!();
    println!("--- Data ---");
    println!("{}", serde_json::to_string_pretty(&chunk.data)?);

    Ok(())
}

fn format_opt_ts(ts: Option<i64>) -> String {
    ts.map(format_ts_iso).unwrap_or_else(|| "never".to_string())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
