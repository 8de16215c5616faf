pub mod migrations;
pub mod schema;
pub mod store;
pub mod transfer;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

/// Open (or create) the Cairn database at the given path with the schema
/// initialized and migrated.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a migrated in-memory database.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Result of [`check_database_health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub schema_version: u32,
    pub embedding_model: Option<String>,
    pub user_count: i64,
    pub entry_count: i64,
    pub chunk_count: i64,
    pub vector_count: i64,
    /// Chunks with no vector under the stored embedding model.
    pub unembedded_chunks: i64,
    pub summary_count: i64,
    pub audit_count: i64,
    pub integrity_ok: bool,
    pub integrity_details: String,
}

/// Row counts, model bookkeeping and `PRAGMA integrity_check`.
pub fn check_database_health(conn: &Connection) -> rusqlite::Result<HealthReport> {
    let count = |table: &str| -> rusqlite::Result<i64> {
        conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))
    };

    let embedding_model = migrations::get_embedding_model(conn)?;
    let unembedded_chunks: i64 = conn.query_row(
        "SELECT count(*) FROM chunks c
         WHERE NOT EXISTS (
             SELECT 1 FROM vectors v WHERE v.chunk_id = c.id AND v.model = ?1
         )",
        [embedding_model.as_deref().unwrap_or(migrations::DEFAULT_EMBEDDING_MODEL)],
        |r| r.get(0),
    )?;

    let integrity: Vec<String> = conn
        .prepare("PRAGMA integrity_check")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    let integrity_ok = integrity.len() == 1 && integrity[0] == "ok";

    Ok(HealthReport {
        schema_version: migrations::get_schema_version(conn)?,
        embedding_model,
        user_count: count("users")?,
        entry_count: count("entries")?,
        chunk_count: count("chunks")?,
        vector_count: count("vectors")?,
        unembedded_chunks,
        summary_count: count("summaries")?,
        audit_count: count("audit_log")?,
        integrity_ok,
        integrity_details: integrity.join("; "),
    })
}
