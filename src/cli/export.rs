use std::path::Path;

use anyhow::{Context, Result};

use cairn::config::CairnConfig;
use cairn::db;
use cairn::db::transfer::{self, ExportFormat};

/// Export every entry as JSON to stdout, or to `output` when given.
///
/// Sealed exports copy ciphertext as-is and need no passphrase. Plain exports
/// decrypt every entry, so the file is as sensitive as the journal itself.
pub fn export(config: &CairnConfig, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;

    let bundle = match format {
        ExportFormat::Sealed => transfer::export_entries(&conn, None, format)?,
        ExportFormat::Plain => {
            let (_vault, session) = super::unlock_vault(&conn, config)?;
            let bundle = transfer::export_entries(&conn, Some(&session), format);
            session.lock();
            bundle?
        }
    };

    let json = serde_json::to_string_pretty(&bundle)?;
    match output {
        Some(path) => std::fs::write(path, json.as_bytes())
            .with_context(|| format!("failed to write export file: {}", path.display()))?,
        None => println!("{json}"),
    }

    eprintln!("Exported {} entries ({format:?}).", bundle.entries.len());
    if format == ExportFormat::Plain {
        eprintln!("The export holds decrypted text; store it accordingly.");
    }
    Ok(())
}
