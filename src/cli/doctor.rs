//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use cairn::config::{expand_tilde, CairnConfig};
use cairn::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &CairnConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `cairn init` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    let model_dir = expand_tilde(&config.embedding.cache_dir);
    let model_ready =
        model_dir.join("model.onnx").exists() && model_dir.join("tokenizer.json").exists();

    println!("Cairn Health Report");
    println!("===================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("Vault:             {}", if report.user_count > 0 { "present" } else { "missing (run `cairn init`)" });
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.embedding.model);
    println!("  Files:           {}", if model_ready { "OK" } else { "missing (run `cairn model download`)" });
    if let Some(stored) = &report.embedding_model {
        if stored != &config.embedding.model {
            println!("  WARNING: model mismatch! Run `cairn reindex` to embed with the configured model.");
        }
    }
    println!();
    println!("Row counts:");
    println!("  Entries:         {}", report.entry_count);
    println!("  Chunks:          {}", report.chunk_count);
    println!("  Vectors:         {}", report.vector_count);
    println!("  Unembedded:      {}", report.unembedded_chunks);
    println!("  Summaries:       {}", report.summary_count);
    println!("  Audit log:       {}", report.audit_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db {}", db_path.display());
        println!("  2. Or run `sqlite3 {} .recover` into a fresh file", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
