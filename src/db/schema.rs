//! SQL DDL for all Cairn tables.
//!
//! Defines `users`, `entries`, `chunks`, `vectors`, `summaries`, `audit_log`
//! and `schema_meta`. Entry bodies and summaries are stored sealed; chunks
//! keep only offsets into their entry, never text. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Vault key material (salt + wrapped DEK)
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    kdf_salt BLOB NOT NULL,
    wrapped_dek BLOB NOT NULL,
    dek_nonce BLOB NOT NULL
);

-- Sealed journal entries
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    cipher BLOB NOT NULL,
    nonce BLOB NOT NULL,
    content_hash TEXT NOT NULL,
    mood_score REAL,
    tags TEXT NOT NULL DEFAULT '[]',
    pinned INTEGER NOT NULL DEFAULT 0 CHECK(pinned IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_entries_occurred ON entries(occurred_at);

-- Chunk spans over an entry's plaintext (character offsets)
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    start_off INTEGER NOT NULL CHECK(start_off >= 0),
    end_off INTEGER NOT NULL CHECK(end_off > start_off),
    occurred_at TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0)
);

CREATE INDEX IF NOT EXISTS idx_chunks_entry ON chunks(entry_id);
CREATE INDEX IF NOT EXISTS idx_chunks_occurred ON chunks(occurred_at);

-- Embedding vectors, little-endian f32
CREATE TABLE IF NOT EXISTS vectors (
    id TEXT PRIMARY KEY,
    chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    model TEXT NOT NULL,
    dims INTEGER NOT NULL CHECK(dims > 0),
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(chunk_id, model)
);

-- Sealed period summaries
CREATE TABLE IF NOT EXISTS summaries (
    id TEXT PRIMARY KEY,
    period TEXT NOT NULL,
    cipher BLOB NOT NULL,
    nonce BLOB NOT NULL,
    citations TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

-- Audit log
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    action TEXT NOT NULL,
    subject TEXT NOT NULL,
    metadata TEXT
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
