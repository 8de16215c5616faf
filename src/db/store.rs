//! Row-level reads and writes.
//!
//! Entry bodies go in sealed; chunks are stored as offsets only, so chunk
//! text is recovered by opening the entry and slicing it. [`store_embeddings`]
//! is the write path for a finished embedding job and [`load_candidates`] the
//! read path feeding retrieval.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::chunking::{char_slice, TextChunk};
use crate::crypto::{content_hash, KdfParams};
use crate::error::{CairnError, Result};
use crate::retrieval::CandidateChunk;
use crate::vault::{Session, VaultRecord};

// ── Encoding helpers ─────────────────────────────────────────────────────────

/// Canonical timestamp text. Fixed width so lexical order is time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn read_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn read_tags(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Little-endian f32 encoding used for the `vectors.vector` column.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(CairnError::Validation(format!(
            "vector blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

// ── Audit log ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    VaultCreated,
    PassphraseChanged,
    EntryAdded,
    EntryUpdated,
    EntryDeleted,
    EntryEmbedded,
    EmbeddingFailed,
    Query,
    Exported,
    Imported,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VaultCreated => "vault_created",
            Self::PassphraseChanged => "passphrase_changed",
            Self::EntryAdded => "entry_added",
            Self::EntryUpdated => "entry_updated",
            Self::EntryDeleted => "entry_deleted",
            Self::EntryEmbedded => "entry_embedded",
            Self::EmbeddingFailed => "embedding_failed",
            Self::Query => "query",
            Self::Exported => "exported",
            Self::Imported => "imported",
        }
    }
}

/// Append to `audit_log`. Metadata must never contain plaintext.
pub fn write_audit_log(
    conn: &Connection,
    action: AuditAction,
    subject: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (created_at, action, subject, metadata) VALUES (?1, ?2, ?3, ?4)",
        params![
            timestamp(Utc::now()),
            action.as_str(),
            subject,
            metadata.map(|m| m.to_string())
        ],
    )?;
    Ok(())
}

/// One audit row, newest first from [`recent_audit`].
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub created_at: String,
    pub action: String,
    pub subject: String,
    pub metadata: Option<String>,
}

pub fn recent_audit(conn: &Connection, limit: usize) -> Result<Vec<AuditRecord>> {
    let mut stmt = conn.prepare(
        "SELECT created_at, action, subject, metadata FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(AuditRecord {
                created_at: row.get(0)?,
                action: row.get(1)?,
                subject: row.get(2)?,
                metadata: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Vault ────────────────────────────────────────────────────────────────────

/// A vault row plus the Argon2 cost it was sealed with, when known.
#[derive(Debug, Clone)]
pub struct StoredVault {
    pub record: VaultRecord,
    pub kdf_params: Option<KdfParams>,
}

impl StoredVault {
    /// Stored cost, or `fallback` for vaults created before it was recorded.
    pub fn params_or(&self, fallback: KdfParams) -> KdfParams {
        self.kdf_params.unwrap_or(fallback)
    }
}

pub fn save_vault(conn: &Connection, record: &VaultRecord, params: &KdfParams) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, created_at, kdf_salt, wrapped_dek, dek_nonce,
                            kdf_memory_kib, kdf_iterations, kdf_parallelism)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.created_at,
            record.kdf_salt,
            record.wrapped_dek,
            record.dek_nonce,
            params.memory_kib,
            params.iterations,
            params.parallelism,
        ],
    )?;
    write_audit_log(conn, AuditAction::VaultCreated, &record.id, None)?;
    Ok(())
}

/// Replace the key material of an existing vault (after a passphrase change).
pub fn update_vault(conn: &Connection, record: &VaultRecord, params: &KdfParams) -> Result<()> {
    let rows = conn.execute(
        "UPDATE users SET kdf_salt = ?2, wrapped_dek = ?3, dek_nonce = ?4,
                          kdf_memory_kib = ?5, kdf_iterations = ?6, kdf_parallelism = ?7
         WHERE id = ?1",
        params![
            record.id,
            record.kdf_salt,
            record.wrapped_dek,
            record.dek_nonce,
            params.memory_kib,
            params.iterations,
            params.parallelism,
        ],
    )?;
    if rows == 0 {
        return Err(CairnError::Validation(format!("vault not found: {}", record.id)));
    }
    write_audit_log(conn, AuditAction::PassphraseChanged, &record.id, None)?;
    Ok(())
}

/// The single local vault, if one has been created.
pub fn load_vault(conn: &Connection) -> Result<Option<StoredVault>> {
    let vault = conn
        .query_row(
            "SELECT id, created_at, kdf_salt, wrapped_dek, dek_nonce,
                    kdf_memory_kib, kdf_iterations, kdf_parallelism
             FROM users ORDER BY created_at LIMIT 1",
            [],
            |row| {
                let memory: Option<u32> = row.get(5)?;
                let iterations: Option<u32> = row.get(6)?;
                let parallelism: Option<u32> = row.get(7)?;
                Ok(StoredVault {
                    record: VaultRecord {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        kdf_salt: row.get(2)?,
                        wrapped_dek: row.get(3)?,
                        dek_nonce: row.get(4)?,
                    },
                    kdf_params: match (memory, iterations, parallelism) {
                        (Some(memory_kib), Some(iterations), Some(parallelism)) => {
                            Some(KdfParams {
                                memory_kib,
                                iterations,
                                parallelism,
                            })
                        }
                        _ => None,
                    },
                })
            },
        )
        .optional()?;
    Ok(vault)
}

// ── Entries ──────────────────────────────────────────────────────────────────

/// A sealed entry row.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub cipher: Vec<u8>,
    pub nonce: Vec<u8>,
    pub content_hash: String,
    pub mood_score: Option<f32>,
    pub tags: Vec<String>,
    pub pinned: bool,
    /// Copied onto every chunk when the entry is embedded.
    pub importance: f32,
}

impl EntryRecord {
    /// Seal `text` under the session DEK into a new entry.
    pub fn seal(
        session: &Session,
        text: &str,
        occurred_at: DateTime<Utc>,
        tags: Vec<String>,
    ) -> Result<Self> {
        let blob = session.seal_entry(text)?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::now_v7().to_string(),
            created_at: now,
            updated_at: now,
            occurred_at,
            cipher: blob.cipher,
            nonce: blob.nonce.to_vec(),
            content_hash: content_hash(text.as_bytes()),
            mood_score: None,
            tags,
            pinned: false,
            importance: 0.5,
        })
    }

    /// Replace the body with `text`, sealed under a fresh nonce, and bump
    /// `updated_at`.
    pub fn reseal(&mut self, session: &Session, text: &str) -> Result<()> {
        let blob = session.seal_entry(text)?;
        self.cipher = blob.cipher;
        self.nonce = blob.nonce.to_vec();
        self.content_hash = content_hash(text.as_bytes());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn open(&self, session: &Session) -> Result<Zeroizing<String>> {
        session.open_entry(&self.cipher, &self.nonce).map(Zeroizing::new)
    }
}

pub fn insert_entry(conn: &Connection, entry: &EntryRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO entries (id, created_at, updated_at, occurred_at, cipher, nonce,
                              content_hash, mood_score, tags, pinned, importance)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id,
            timestamp(entry.created_at),
            timestamp(entry.updated_at),
            timestamp(entry.occurred_at),
            entry.cipher,
            entry.nonce,
            entry.content_hash,
            entry.mood_score,
            serde_json::to_string(&entry.tags)?,
            entry.pinned,
            entry.importance.clamp(0.0, 1.0),
        ],
    )?;
    write_audit_log(
        conn,
        AuditAction::EntryAdded,
        &entry.id,
        Some(&serde_json::json!({ "tags": entry.tags.len() })),
    )?;
    Ok(())
}

const ENTRY_COLUMNS: &str = "id, created_at, updated_at, occurred_at, cipher, nonce, \
                             content_hash, mood_score, tags, pinned, importance";

fn entry_from_row(row: &Row) -> rusqlite::Result<EntryRecord> {
    Ok(EntryRecord {
        id: row.get(0)?,
        created_at: read_timestamp(row, 1)?,
        updated_at: read_timestamp(row, 2)?,
        occurred_at: read_timestamp(row, 3)?,
        cipher: row.get(4)?,
        nonce: row.get(5)?,
        content_hash: row.get(6)?,
        mood_score: row.get(7)?,
        tags: read_tags(row, 8)?,
        pinned: row.get(9)?,
        importance: row.get(10)?,
    })
}

pub fn load_entry(conn: &Connection, id: &str) -> Result<Option<EntryRecord>> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
            [id],
            entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

/// All entries, oldest occurrence first.
pub fn load_entries(conn: &Connection) -> Result<Vec<EntryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY occurred_at, id"
    ))?;
    let entries = stmt
        .query_map([], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Overwrite an entry's body and metadata. Its chunks and vectors are
/// dropped in the same transaction, since their offsets point into the old
/// text. Returns `false` if the entry does not exist.
pub fn update_entry(conn: &mut Connection, entry: &EntryRecord) -> Result<bool> {
    let tx = conn.transaction()?;
    let rows = tx.execute(
        "UPDATE entries SET updated_at = ?2, occurred_at = ?3, cipher = ?4, nonce = ?5,
                            content_hash = ?6, mood_score = ?7, tags = ?8, pinned = ?9,
                            importance = ?10
         WHERE id = ?1",
        params![
            entry.id,
            timestamp(entry.updated_at),
            timestamp(entry.occurred_at),
            entry.cipher,
            entry.nonce,
            entry.content_hash,
            entry.mood_score,
            serde_json::to_string(&entry.tags)?,
            entry.pinned,
            entry.importance.clamp(0.0, 1.0),
        ],
    )?;
    if rows == 0 {
        return Ok(false);
    }
    let dropped = tx.execute("DELETE FROM chunks WHERE entry_id = ?1", [&entry.id])?;
    write_audit_log(
        &tx,
        AuditAction::EntryUpdated,
        &entry.id,
        Some(&serde_json::json!({ "chunks_dropped": dropped })),
    )?;
    tx.commit()?;
    Ok(true)
}

/// Delete an entry with its chunks and vectors. Returns `false` if absent.
pub fn delete_entry(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM entries WHERE id = ?1", [id])?;
    if rows > 0 {
        write_audit_log(conn, AuditAction::EntryDeleted, id, None)?;
    }
    Ok(rows > 0)
}

/// Entries with no chunk carrying a vector for `model`.
pub fn entries_missing_vectors(conn: &Connection, model: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT e.id FROM entries e
         WHERE NOT EXISTS (
             SELECT 1 FROM chunks c JOIN vectors v ON v.chunk_id = c.id
             WHERE c.entry_id = e.id AND v.model = ?1
         )
         ORDER BY e.occurred_at, e.id",
    )?;
    let ids = stmt
        .query_map([model], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// Counts over entry metadata. Nothing here needs the vault unlocked.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryStats {
    pub total_entries: usize,
    pub pinned_entries: usize,
    /// Entries with at least one vector for the queried model.
    pub embedded_entries: usize,
    pub total_chunks: usize,
    pub by_tag: BTreeMap<String, usize>,
    /// Keyed `YYYY-MM` by occurrence time.
    pub by_month: BTreeMap<String, usize>,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

pub fn entry_stats(conn: &Connection, model: &str) -> Result<EntryStats> {
    let (total_entries, pinned_entries, oldest, newest) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(pinned), 0), MIN(occurred_at), MAX(occurred_at) FROM entries",
        [],
        |row| {
            Ok((
                row.get::<_, i64>(0)? as usize,
                row.get::<_, i64>(1)? as usize,
                row.get(2)?,
                row.get(3)?,
            ))
        },
    )?;
    let embedded_entries = conn.query_row(
        "SELECT COUNT(DISTINCT c.entry_id) FROM chunks c
         JOIN vectors v ON v.chunk_id = c.id AND v.model = ?1",
        [model],
        |row| row.get::<_, i64>(0),
    )? as usize;
    let total_chunks =
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))? as usize;

    let grouped = |sql: &str| -> Result<BTreeMap<String, usize>> {
        let mut stmt = conn.prepare(sql)?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(counts)
    };
    let by_tag = grouped(
        "SELECT lower(t.value), COUNT(DISTINCT e.id) FROM entries e, json_each(e.tags) t
         GROUP BY lower(t.value)",
    )?;
    let by_month = grouped(
        "SELECT substr(occurred_at, 1, 7), COUNT(*) FROM entries GROUP BY substr(occurred_at, 1, 7)",
    )?;

    Ok(EntryStats {
        total_entries,
        pinned_entries,
        embedded_entries,
        total_chunks,
        by_tag,
        by_month,
        oldest,
        newest,
    })
}

// ── Chunks and vectors ───────────────────────────────────────────────────────

/// Replace an entry's chunks and vectors with a fresh embedding result.
///
/// `chunks` and `vectors` are index-aligned. Runs in one transaction; the
/// chunks inherit the entry's `occurred_at` and `importance`.
pub fn store_embeddings(
    conn: &mut Connection,
    entry_id: &str,
    model: &str,
    chunks: &[TextChunk],
    vectors: &[Vec<f32>],
) -> Result<usize> {
    if chunks.len() != vectors.len() {
        return Err(CairnError::Validation(format!(
            "{} chunks but {} vectors for entry {entry_id}",
            chunks.len(),
            vectors.len()
        )));
    }

    let tx = conn.transaction()?;

    let (occurred_at, importance): (String, f32) = tx
        .query_row(
            "SELECT occurred_at, importance FROM entries WHERE id = ?1",
            [entry_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| CairnError::Validation(format!("entry not found: {entry_id}")))?;

    tx.execute("DELETE FROM chunks WHERE entry_id = ?1", [entry_id])?;

    let now = timestamp(Utc::now());
    {
        let mut insert_chunk = tx.prepare(
            "INSERT INTO chunks (id, entry_id, start_off, end_off, occurred_at, tags, importance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut insert_vector = tx.prepare(
            "INSERT INTO vectors (id, chunk_id, model, dims, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            if chunk.entry_id != entry_id {
                return Err(CairnError::Validation(format!(
                    "chunk {} belongs to entry {}, not {entry_id}",
                    chunk.id, chunk.entry_id
                )));
            }
            insert_chunk.execute(params![
                chunk.id,
                entry_id,
                chunk.start_off as i64,
                chunk.end_off as i64,
                occurred_at,
                serde_json::to_string(&chunk.tags)?,
                importance,
            ])?;
            insert_vector.execute(params![
                uuid::Uuid::now_v7().to_string(),
                chunk.id,
                model,
                vector.len() as i64,
                vector_to_bytes(vector),
                now,
            ])?;
        }
    }

    write_audit_log(
        &tx,
        AuditAction::EntryEmbedded,
        entry_id,
        Some(&serde_json::json!({ "chunks": chunks.len(), "model": model })),
    )?;
    tx.commit()?;

    tracing::debug!(entry_id, chunks = chunks.len(), model, "embeddings stored");
    Ok(chunks.len())
}

/// A chunk row joined with its vector for one model.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub entry_id: String,
    pub start_off: usize,
    pub end_off: usize,
    pub occurred_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub importance: f32,
    pub vector: Option<Vec<u8>>,
}

pub fn load_chunks(conn: &Connection, model: &str) -> Result<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.entry_id, c.start_off, c.end_off, c.occurred_at, c.tags, c.importance,
                v.vector
         FROM chunks c
         LEFT JOIN vectors v ON v.chunk_id = c.id AND v.model = ?1
         ORDER BY c.occurred_at, c.entry_id, c.start_off",
    )?;
    let rows = stmt
        .query_map([model], |row| {
            Ok(ChunkRecord {
                id: row.get(0)?,
                entry_id: row.get(1)?,
                start_off: row.get::<_, i64>(2)? as usize,
                end_off: row.get::<_, i64>(3)? as usize,
                occurred_at: read_timestamp(row, 4)?,
                tags: read_tags(row, 5)?,
                importance: row.get(6)?,
                vector: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Assemble retrieval candidates: open every entry that has chunks and
/// recover each chunk's text from its offsets.
///
/// Chunks whose span no longer fits the entry text are skipped with a
/// warning.
pub fn load_candidates(
    conn: &Connection,
    session: &Session,
    model: &str,
) -> Result<Vec<CandidateChunk>> {
    let chunks = load_chunks(conn, model)?;

    let mut plaintexts: HashMap<String, Zeroizing<String>> = HashMap::new();
    for entry in load_entries(conn)? {
        if chunks.iter().any(|c| c.entry_id == entry.id) {
            let text = entry.open(session)?;
            plaintexts.insert(entry.id, text);
        }
    }

    let mut candidates = Vec::with_capacity(chunks.len());
    for record in chunks {
        let Some(source) = plaintexts.get(&record.entry_id) else {
            continue;
        };
        let Some(slice) = char_slice(source, record.start_off, record.end_off) else {
            tracing::warn!(
                chunk_id = %record.id,
                entry_id = %record.entry_id,
                "chunk span outside entry text, skipping"
            );
            continue;
        };
        let vector = record.vector.as_deref().map(bytes_to_vector).transpose()?;
        candidates.push(CandidateChunk {
            chunk: TextChunk {
                id: record.id,
                entry_id: record.entry_id,
                start_off: record.start_off,
                end_off: record.end_off,
                text: slice.trim().to_string(),
                tags: record.tags,
                importance: record.importance,
            },
            occurred_at: record.occurred_at,
            vector,
        });
    }

    tracing::debug!(candidates = candidates.len(), model, "candidates loaded");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use secrecy::SecretString;

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    fn session() -> (VaultRecord, Session) {
        crate::vault::create(
            &SecretString::from("correct horse".to_string()),
            &KdfParams::insecure_fast(),
        )
        .unwrap()
    }

    fn chunk(entry_id: &str, start: usize, end: usize, text: &str) -> TextChunk {
        TextChunk {
            id: uuid::Uuid::now_v7().to_string(),
            entry_id: entry_id.to_string(),
            start_off: start,
            end_off: end,
            text: text.to_string(),
            tags: vec!["work".into()],
            importance: 0.7,
        }
    }

    #[test]
    fn vector_bytes_are_little_endian_f32() {
        let bytes = vector_to_bytes(&[1.0, -2.5]);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(bytes_to_vector(&bytes).unwrap(), vec![1.0, -2.5]);
        assert!(matches!(
            bytes_to_vector(&[0, 0, 0]),
            Err(CairnError::Validation(_))
        ));
    }

    #[test]
    fn vault_round_trips_with_kdf_params() {
        let conn = test_db();
        assert!(load_vault(&conn).unwrap().is_none());

        let (record, _session) = session();
        let params = KdfParams::insecure_fast();
        save_vault(&conn, &record, &params).unwrap();

        let stored = load_vault(&conn).unwrap().unwrap();
        assert_eq!(stored.record, record);
        assert_eq!(stored.kdf_params, Some(params));
        assert_eq!(stored.params_or(KdfParams::default()), params);
    }

    #[test]
    fn update_vault_requires_existing_row() {
        let conn = test_db();
        let (record, _session) = session();
        assert!(matches!(
            update_vault(&conn, &record, &KdfParams::insecure_fast()),
            Err(CairnError::Validation(_))
        ));
    }

    #[test]
    fn entry_is_stored_sealed() {
        let conn = test_db();
        let (_record, session) = session();
        let entry = EntryRecord::seal(&session, "met Ana for coffee", Utc::now(), vec![]).unwrap();
        insert_entry(&conn, &entry).unwrap();

        let loaded = load_entry(&conn, &entry.id).unwrap().unwrap();
        assert!(!String::from_utf8_lossy(&loaded.cipher).contains("coffee"));
        assert_eq!(loaded.open(&session).unwrap().as_str(), "met Ana for coffee");
        assert_eq!(loaded.content_hash, content_hash(b"met Ana for coffee"));
    }

    #[test]
    fn store_embeddings_replaces_previous_chunks() {
        let mut conn = test_db();
        let (_record, session) = session();
        let text = "One day. Two days.";
        let entry = EntryRecord::seal(&session, text, Utc::now(), vec![]).unwrap();
        insert_entry(&conn, &entry).unwrap();

        let first = vec![chunk(&entry.id, 0, 18, text)];
        store_embeddings(&mut conn, &entry.id, "m", &first, &[vec![1.0, 0.0]]).unwrap();

        let second = vec![chunk(&entry.id, 0, 8, "One day."), chunk(&entry.id, 9, 18, "Two days.")];
        let stored = store_embeddings(
            &mut conn,
            &entry.id,
            "m",
            &second,
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        assert_eq!(stored, 2);

        let chunks = load_chunks(&conn, "m").unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.vector.is_some()));
        assert_eq!(chunks[1].start_off, 9);
    }

    #[test]
    fn store_embeddings_rejects_misaligned_input() {
        let mut conn = test_db();
        let (_record, session) = session();
        let entry = EntryRecord::seal(&session, "text here", Utc::now(), vec![]).unwrap();
        insert_entry(&conn, &entry).unwrap();

        let chunks = vec![chunk(&entry.id, 0, 9, "text here")];
        assert!(store_embeddings(&mut conn, &entry.id, "m", &chunks, &[]).is_err());
        assert!(store_embeddings(&mut conn, "missing", "m", &chunks, &[vec![1.0]]).is_err());
        assert!(load_chunks(&conn, "m").unwrap().is_empty());
    }

    #[test]
    fn candidates_recover_text_from_offsets() {
        let mut conn = test_db();
        let (_record, session) = session();
        let text = "Slept badly. Long walk by the river helped.";
        let entry = EntryRecord::seal(&session, text, Utc::now(), vec!["health".into()]).unwrap();
        insert_entry(&conn, &entry).unwrap();

        let chunks = vec![
            chunk(&entry.id, 0, 12, "Slept badly."),
            chunk(&entry.id, 13, 43, "Long walk by the river helped."),
        ];
        store_embeddings(&mut conn, &entry.id, "m", &chunks, &[vec![1.0], vec![0.5]]).unwrap();

        let candidates = load_candidates(&conn, &session, "m").unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].chunk.text, "Slept badly.");
        assert_eq!(candidates[1].chunk.text, "Long walk by the river helped.");
        assert_eq!(candidates[1].vector, Some(vec![0.5]));

        // a different model has no vectors for these chunks
        let other = load_candidates(&conn, &session, "other").unwrap();
        assert!(other.iter().all(|c| c.vector.is_none()));
    }

    #[test]
    fn missing_vectors_and_delete() {
        let mut conn = test_db();
        let (_record, session) = session();
        let a = EntryRecord::seal(&session, "alpha", Utc::now(), vec![]).unwrap();
        let b = EntryRecord::seal(&session, "beta", Utc::now(), vec![]).unwrap();
        insert_entry(&conn, &a).unwrap();
        insert_entry(&conn, &b).unwrap();
        store_embeddings(&mut conn, &a.id, "m", &[chunk(&a.id, 0, 5, "alpha")], &[vec![1.0]])
            .unwrap();

        assert_eq!(entries_missing_vectors(&conn, "m").unwrap(), vec![b.id.clone()]);

        assert!(delete_entry(&conn, &a.id).unwrap());
        assert!(!delete_entry(&conn, &a.id).unwrap());
        assert!(load_chunks(&conn, "m").unwrap().is_empty());

        let actions: Vec<String> = recent_audit(&conn, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions[0], "entry_deleted");
        assert!(actions.contains(&"entry_embedded".to_string()));
    }

    #[test]
    fn importance_survives_re_embedding() {
        let mut conn = test_db();
        let (_record, session) = session();
        let mut entry = EntryRecord::seal(&session, "Quiet morning.", Utc::now(), vec![]).unwrap();
        entry.importance = 0.9;
        insert_entry(&conn, &entry).unwrap();

        // a rebuilt job carries the default importance; the entry's value wins
        let mut rebuilt = chunk(&entry.id, 0, 14, "Quiet morning.");
        rebuilt.importance = 0.5;
        store_embeddings(&mut conn, &entry.id, "m", &[rebuilt.clone()], &[vec![1.0]]).unwrap();
        store_embeddings(&mut conn, &entry.id, "other", &[rebuilt], &[vec![1.0]]).unwrap();

        assert_eq!(load_entry(&conn, &entry.id).unwrap().unwrap().importance, 0.9);
        let chunks = load_chunks(&conn, "other").unwrap();
        assert_eq!(chunks.len(), 1);
        assert!((chunks[0].importance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn update_entry_reseals_and_drops_stale_chunks() {
        let mut conn = test_db();
        let (_record, session) = session();
        let mut entry = EntryRecord::seal(&session, "Draft thoughts.", Utc::now(), vec![]).unwrap();
        insert_entry(&conn, &entry).unwrap();
        store_embeddings(&mut conn, &entry.id, "m", &[chunk(&entry.id, 0, 15, "Draft thoughts.")], &[vec![1.0]])
            .unwrap();

        let before = entry.updated_at;
        let old_nonce = entry.nonce.clone();
        entry.reseal(&session, "Final thoughts, revised.").unwrap();
        entry.tags = vec!["writing".into()];
        entry.pinned = true;
        assert!(update_entry(&mut conn, &entry).unwrap());

        let loaded = load_entry(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(loaded.open(&session).unwrap().as_str(), "Final thoughts, revised.");
        assert_ne!(loaded.nonce, old_nonce);
        assert!(entry.updated_at >= before);
        assert_eq!(timestamp(loaded.updated_at), timestamp(entry.updated_at));
        assert_eq!(loaded.tags, vec!["writing".to_string()]);
        assert!(loaded.pinned);
        assert!(load_chunks(&conn, "m").unwrap().is_empty());
        assert_eq!(entries_missing_vectors(&conn, "m").unwrap(), vec![entry.id.clone()]);
        assert_eq!(recent_audit(&conn, 1).unwrap()[0].action, "entry_updated");

        let ghost = EntryRecord::seal(&session, "nobody", Utc::now(), vec![]).unwrap();
        assert!(!update_entry(&mut conn, &ghost).unwrap());
    }

    #[test]
    fn stats_count_tags_months_and_pins() {
        use chrono::TimeZone;

        let mut conn = test_db();
        let (_record, session) = session();
        let march = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2024, 4, 9, 8, 0, 0).unwrap();

        let a = EntryRecord::seal(&session, "one", march, vec!["Work".into(), "travel".into()]).unwrap();
        let mut b = EntryRecord::seal(&session, "two", march, vec!["work".into()]).unwrap();
        b.pinned = true;
        let c = EntryRecord::seal(&session, "three", april, vec![]).unwrap();
        for entry in [&a, &b, &c] {
            insert_entry(&conn, entry).unwrap();
        }
        store_embeddings(&mut conn, &a.id, "m", &[chunk(&a.id, 0, 3, "one")], &[vec![1.0]]).unwrap();

        let stats = entry_stats(&conn, "m").unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.pinned_entries, 1);
        assert_eq!(stats.embedded_entries, 1);
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.by_tag.get("work"), Some(&2));
        assert_eq!(stats.by_tag.get("travel"), Some(&1));
        assert_eq!(stats.by_month.get("2024-03"), Some(&2));
        assert_eq!(stats.by_month.get("2024-04"), Some(&1));
        assert_eq!(stats.oldest.as_deref(), Some("2024-03-05T08:00:00.000Z"));

        let empty = entry_stats(&test_db(), "m").unwrap();
        assert_eq!(empty.total_entries, 0);
        assert!(empty.by_tag.is_empty() && empty.newest.is_none());
    }
}
