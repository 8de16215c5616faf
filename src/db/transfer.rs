//! JSON export and import of entries.
//!
//! A sealed export carries ciphertext and restores only into the vault that
//! wrote it. A plain export carries decrypted text and is re-sealed under
//! whichever vault imports it. Chunks and vectors are never exported; the
//! importer re-embeds.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::store::{self, AuditAction, EntryRecord};
use crate::crypto::content_hash;
use crate::error::{CairnError, Result};
use crate::vault::Session;

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Sealed,
    Plain,
}

impl FromStr for ExportFormat {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sealed" => Ok(Self::Sealed),
            "plain" => Ok(Self::Plain),
            other => Err(CairnError::Validation(format!(
                "unknown export format '{other}', expected 'sealed' or 'plain'"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub format: ExportFormat,
    pub exported_at: DateTime<Utc>,
    pub vault_id: String,
    pub entries: Vec<ExportedEntry>,
}

/// One entry. Exactly one of `text` or `cipher`+`nonce` is set, per format.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_score: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    /// Hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

fn default_importance() -> f32 {
    0.5
}

impl Drop for ExportedEntry {
    fn drop(&mut self) {
        if let Some(text) = self.text.as_mut() {
            text.zeroize();
        }
    }
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    /// Ids of newly inserted entries, in bundle order. These need embedding.
    pub imported: Vec<String>,
    /// Entries whose id already exists.
    pub skipped: usize,
}

fn current_vault_id(conn: &Connection) -> Result<String> {
    store::load_vault(conn)?
        .map(|v| v.record.id)
        .ok_or_else(|| CairnError::Validation("no vault; run `cairn init` first".into()))
}

/// Serialize every entry, oldest occurrence first.
///
/// # Errors
///
/// [`CairnError::Validation`] for a plain export without an unlocked session.
pub fn export_entries(
    conn: &Connection,
    session: Option<&Session>,
    format: ExportFormat,
) -> Result<ExportBundle> {
    let vault_id = current_vault_id(conn)?;
    let session = match (format, session) {
        (ExportFormat::Plain, None) => {
            return Err(CairnError::Validation("plain export needs an unlocked vault".into()))
        }
        (_, session) => session,
    };

    let mut entries = Vec::new();
    for entry in store::load_entries(conn)? {
        let (text, cipher, nonce) = match (format, session) {
            (ExportFormat::Plain, Some(session)) => {
                let text = entry.open(session)?;
                (Some(text.as_str().to_owned()), None, None)
            }
            _ => (None, Some(hex::encode(&entry.cipher)), Some(hex::encode(&entry.nonce))),
        };
        entries.push(ExportedEntry {
            id: entry.id.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            occurred_at: entry.occurred_at,
            content_hash: entry.content_hash.clone(),
            mood_score: entry.mood_score,
            tags: entry.tags.clone(),
            pinned: entry.pinned,
            importance: entry.importance,
            text,
            cipher,
            nonce,
        });
    }

    store::write_audit_log(
        conn,
        AuditAction::Exported,
        &vault_id,
        Some(&serde_json::json!({ "entries": entries.len(), "format": format })),
    )?;
    tracing::info!(entries = entries.len(), ?format, "entries exported");

    Ok(ExportBundle {
        version: EXPORT_VERSION,
        format,
        exported_at: Utc::now(),
        vault_id,
        entries,
    })
}

/// Insert the bundle's entries that are not already present.
///
/// Every entry is opened (or sealed) and checked against its content hash
/// before anything is written; one bad entry rejects the whole bundle.
pub fn import_entries(
    conn: &mut Connection,
    session: &Session,
    bundle: &ExportBundle,
) -> Result<ImportSummary> {
    if bundle.version > EXPORT_VERSION {
        return Err(CairnError::Validation(format!(
            "export version {} is newer than supported version {EXPORT_VERSION}",
            bundle.version
        )));
    }
    let vault_id = current_vault_id(conn)?;
    if bundle.format == ExportFormat::Sealed && bundle.vault_id != vault_id {
        return Err(CairnError::Validation(format!(
            "sealed export belongs to vault {}, not {vault_id}; export it as plain instead",
            bundle.vault_id
        )));
    }

    let mut summary = ImportSummary::default();
    let mut records = Vec::new();
    for exported in &bundle.entries {
        if store::load_entry(conn, &exported.id)?.is_some() {
            summary.skipped += 1;
            continue;
        }
        records.push(restore(session, bundle.format, exported)?);
    }

    let tx = conn.transaction()?;
    for record in &records {
        store::insert_entry(&tx, record)?;
        summary.imported.push(record.id.clone());
    }
    store::write_audit_log(
        &tx,
        AuditAction::Imported,
        &vault_id,
        Some(&serde_json::json!({
            "imported": summary.imported.len(),
            "skipped": summary.skipped,
            "format": bundle.format,
        })),
    )?;
    tx.commit()?;

    tracing::info!(imported = summary.imported.len(), skipped = summary.skipped, "entries imported");
    Ok(summary)
}

fn restore(session: &Session, format: ExportFormat, exported: &ExportedEntry) -> Result<EntryRecord> {
    let missing = |field: &str| {
        CairnError::Validation(format!("entry {} has no {field} for a {format:?} export", exported.id))
    };

    let (cipher, nonce, text) = match format {
        ExportFormat::Plain => {
            let text = Zeroizing::new(exported.text.clone().ok_or_else(|| missing("text"))?);
            let blob = session.seal_entry(&text)?;
            (blob.cipher, blob.nonce.to_vec(), text)
        }
        ExportFormat::Sealed => {
            let decode = |field: &str, raw: &Option<String>| -> Result<Vec<u8>> {
                let raw = raw.as_deref().ok_or_else(|| missing(field))?;
                hex::decode(raw).map_err(|e| {
                    CairnError::Validation(format!("entry {} has a malformed {field}: {e}", exported.id))
                })
            };
            let cipher = decode("cipher", &exported.cipher)?;
            let nonce = decode("nonce", &exported.nonce)?;
            let text = Zeroizing::new(session.open_entry(&cipher, &nonce)?);
            (cipher, nonce, text)
        }
    };

    if content_hash(text.as_bytes()) != exported.content_hash {
        return Err(CairnError::Validation(format!(
            "entry {} does not match its content hash",
            exported.id
        )));
    }

    Ok(EntryRecord {
        id: exported.id.clone(),
        created_at: exported.created_at,
        updated_at: exported.updated_at,
        occurred_at: exported.occurred_at,
        cipher,
        nonce,
        content_hash: exported.content_hash.clone(),
        mood_score: exported.mood_score,
        tags: exported.tags.clone(),
        pinned: exported.pinned,
        importance: exported.importance.clamp(0.0, 1.0),
    })
}
