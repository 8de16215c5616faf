//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::{Connection, OptionalExtension};

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 4;

/// Model recorded for databases created before the key existed.
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// One forward step: the version it produces and the DDL/DML that gets there.
type Step = (u32, fn(&Connection) -> rusqlite::Result<()>);

const STEPS: &[Step] = &[
    (2, migrate_v1_to_v2),
    (3, migrate_v2_to_v3),
    (4, migrate_v3_to_v4),
];

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM schema_meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )
    .map(drop)
}

/// Schema version recorded in `schema_meta`. Unparseable values read as 0.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw = read_meta(conn, "schema_version")?;
    Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Embedding model the stored vectors were produced with, if recorded.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    read_meta(conn, "embedding_model")
}

/// Record `model` as the one current vectors belong to.
pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    write_meta(conn, "embedding_model", model)
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`]. Every step commits
/// in the same transaction as its version bump.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let found = get_schema_version(conn)?;
    tracing::debug!(schema_version = found, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    for &(to, step) in STEPS.iter().filter(|(to, _)| *to > found) {
        tracing::info!(to, "applying schema migration");
        let tx = conn.unchecked_transaction()?;
        step(&tx)?;
        write_meta(&tx, "schema_version", &to.to_string())?;
        tx.commit()?;
    }

    Ok(())
}

/// v1 → v2: record the embedding model and index vectors by model.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    if read_meta(conn, "embedding_model")?.is_none() {
        write_meta(conn, "embedding_model", DEFAULT_EMBEDDING_MODEL)?;
    }
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_vectors_model ON vectors(model);")
}

/// v2 → v3: persist the Argon2 cost a vault was created with, so a later
/// config change cannot lock the user out.
fn migrate_v2_to_v3(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "ALTER TABLE users ADD COLUMN kdf_memory_kib INTEGER;
         ALTER TABLE users ADD COLUMN kdf_iterations INTEGER;
         ALTER TABLE users ADD COLUMN kdf_parallelism INTEGER;",
    )
}

/// v3 → v4: importance lives on the entry so re-embedding keeps it. Existing
/// entries take the highest importance among their chunks.
fn migrate_v3_to_v4(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "ALTER TABLE entries ADD COLUMN importance REAL NOT NULL DEFAULT 0.5
             CHECK(importance >= 0.0 AND importance <= 1.0);
         UPDATE entries SET importance = COALESCE(
             (SELECT MAX(c.importance) FROM chunks c WHERE c.entry_id = entries.id),
             0.5
         );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_v1() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn user_columns(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM pragma_table_info('users')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn fresh_schema_starts_at_one_and_climbs_to_current() {
        let conn = fresh_v1();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn garbage_version_reads_as_zero() {
        let conn = fresh_v1();
        write_meta(&conn, "schema_version", "not-a-number").unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn upgrade_records_default_model_unless_one_is_set() {
        let conn = fresh_v1();
        assert_eq!(get_embedding_model(&conn).unwrap(), None);
        run_migrations(&conn).unwrap();
        assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some(DEFAULT_EMBEDDING_MODEL));

        let conn = fresh_v1();
        set_embedding_model(&conn, "custom-model").unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("custom-model"));
    }

    #[test]
    fn migration_v2_to_v3_adds_kdf_columns() {
        let conn = fresh_v1();
        assert!(!user_columns(&conn).contains(&"kdf_memory_kib".to_string()));

        run_migrations(&conn).unwrap();

        let columns = user_columns(&conn);
        for name in ["kdf_memory_kib", "kdf_iterations", "kdf_parallelism"] {
            assert!(columns.contains(&name.to_string()), "{name} column missing");
        }
    }

    #[test]
    fn upgrade_backfills_entry_importance_from_chunks() {
        let conn = fresh_v1();
        for step in STEPS.iter().filter(|(to, _)| *to <= 3) {
            (step.1)(&conn).unwrap();
        }
        write_meta(&conn, "schema_version", "3").unwrap();
        conn.execute_batch(
            "INSERT INTO entries (id, created_at, updated_at, occurred_at, cipher, nonce, content_hash)
                 VALUES ('e1', 't', 't', 't', x'00', x'00', 'h'),
                        ('e2', 't', 't', 't', x'00', x'00', 'h');
             INSERT INTO chunks (id, entry_id, start_off, end_off, occurred_at, importance)
                 VALUES ('c1', 'e1', 0, 4, 't', 0.9), ('c2', 'e1', 5, 9, 't', 0.9);",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let importance = |id: &str| -> f64 {
            conn.query_row("SELECT importance FROM entries WHERE id = ?1", [id], |r| r.get(0))
                .unwrap()
        };
        assert!((importance("e1") - 0.9).abs() < 1e-6);
        assert!((importance("e2") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn second_run_applies_nothing() {
        let conn = fresh_v1();
        run_migrations(&conn).unwrap();
        // a re-applied v3 step would fail on the duplicate ALTER TABLE
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn model_overwrites_in_place() {
        let conn = fresh_v1();
        run_migrations(&conn).unwrap();
        set_embedding_model(&conn, "bge-small-en-v1.5").unwrap();
        set_embedding_model(&conn, "nomic-embed-text").unwrap();
        assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("nomic-embed-text"));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_meta WHERE key = 'embedding_model'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
