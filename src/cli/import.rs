use std::path::Path;

use anyhow::{Context, Result};

use cairn::config::CairnConfig;
use cairn::db::{self, store, transfer};

/// Import entries from an export file, then embed the new ones.
///
/// Entries whose id already exists are skipped. A sealed export only restores
/// into the vault that produced it.
pub async fn import(config: &CairnConfig, file: &Path, no_embed: bool) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read import file: {}", file.display()))?;
    let bundle: transfer::ExportBundle =
        serde_json::from_str(&json).context("failed to parse import JSON")?;

    let mut conn = db::open_database(config.resolved_db_path())?;
    let (_vault, session) = super::unlock_vault(&conn, config)?;

    println!("Importing {} entries...", bundle.entries.len());
    let summary = transfer::import_entries(&mut conn, &session, &bundle)?;

    let mut jobs = Vec::new();
    if !no_embed {
        for id in &summary.imported {
            let Some(entry) = store::load_entry(&conn, id)? else {
                continue;
            };
            let text = entry.open(&session)?;
            if text.trim().is_empty() {
                continue;
            }
            jobs.push(super::embed::entry_job(&entry, text.as_str()));
        }
    }
    session.lock();

    println!(
        "Import complete: {} imported, {} skipped (already exist).",
        summary.imported.len(),
        summary.skipped
    );

    if no_embed {
        if !summary.imported.is_empty() {
            println!("Skipped embedding; run `cairn reindex` later.");
        }
        return Ok(());
    }
    if jobs.is_empty() {
        return Ok(());
    }
    let embedded = super::embed::run_jobs(&mut conn, config, jobs).await?;
    if embedded.failed > 0 {
        println!(
            "{} entries failed to embed; run `cairn reindex` to retry.",
            embedded.failed
        );
    } else {
        println!("Embedded {} chunk(s).", embedded.chunks);
    }
    Ok(())
}
