//! CLI `list`, `show`, `edit` and `delete` commands.

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use cairn::config::CairnConfig;
use cairn::db::{self, store};

/// List entry metadata. Needs no passphrase: nothing is decrypted.
pub fn list(config: &CairnConfig) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let entries = store::load_entries(&conn)?;
    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {}{}  [{}]",
            entry.id,
            entry.occurred_at.format("%Y-%m-%d %H:%M"),
            if entry.pinned { "  pinned" } else { "" },
            entry.tags.join(", ")
        );
    }
    println!("\n{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

/// Decrypt and print one entry, optionally just a cited span.
pub fn show(config: &CairnConfig, id: &str, span: Option<(usize, usize)>) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let entry = store::load_entry(&conn, id)?.with_context(|| format!("entry not found: {id}"))?;
    let (_vault, session) = super::unlock_vault(&conn, config)?;
    let text = entry.open(&session)?;
    session.lock();

    match span {
        Some((start, end)) => {
            let slice = cairn::chunking::char_slice(&text, start, end)
                .with_context(|| format!("span [{start}, {end}) is outside the entry"))?;
            println!("{slice}");
        }
        None => println!("{}", text.as_str()),
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct EditArgs {
    pub id: String,
    pub body: Option<String>,
    /// Replaces the tag set when present.
    pub tags: Option<Vec<String>>,
    pub occurred_at: Option<String>,
    pub importance: Option<f32>,
    pub mood: Option<f32>,
    pub pinned: Option<bool>,
    pub no_embed: bool,
}

/// Re-seal an entry with new text or metadata and re-embed it.
///
/// Without `--body` or piped stdin the existing text is kept. The entry's old
/// chunks are dropped in the same transaction as the update.
pub async fn edit(config: &CairnConfig, args: EditArgs) -> Result<()> {
    let new_text = super::add::read_optional_body(args.body)?;
    let occurred_at = args
        .occurred_at
        .as_deref()
        .map(super::add::parse_occurred_at)
        .transpose()?;
    if let Some(importance) = args.importance {
        anyhow::ensure!(
            (0.0..=1.0).contains(&importance),
            "--importance must be within [0, 1]"
        );
    }
    if let Some(mood) = args.mood {
        anyhow::ensure!((-1.0..=1.0).contains(&mood), "--mood must be within [-1, 1]");
    }

    let mut conn = db::open_database(config.resolved_db_path())?;
    let mut entry = store::load_entry(&conn, &args.id)?
        .with_context(|| format!("entry not found: {}", args.id))?;
    let (_vault, session) = super::unlock_vault(&conn, config)?;

    let text: Zeroizing<String> = match new_text {
        Some(text) => text,
        None => entry.open(&session)?,
    };
    entry.reseal(&session, &text)?;
    session.lock();

    if let Some(tags) = args.tags {
        entry.tags = tags;
    }
    if let Some(at) = occurred_at {
        entry.occurred_at = at;
    }
    if let Some(importance) = args.importance {
        entry.importance = importance;
    }
    if args.mood.is_some() {
        entry.mood_score = args.mood;
    }
    if let Some(pinned) = args.pinned {
        entry.pinned = pinned;
    }

    anyhow::ensure!(store::update_entry(&mut conn, &entry)?, "entry not found: {}", args.id);
    println!("Updated entry {}", entry.id);

    if args.no_embed {
        println!("Skipped embedding; run `cairn reindex` later.");
        return Ok(());
    }
    let job = super::embed::entry_job(&entry, text.as_str());
    let summary = super::embed::run_jobs(&mut conn, config, vec![job]).await?;
    if summary.failed > 0 {
        println!("Embedding failed; the edit is saved. Run `cairn reindex` to retry.");
    } else {
        println!("Embedded {} chunk(s).", summary.chunks);
    }
    Ok(())
}

pub fn delete(config: &CairnConfig, id: &str) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    anyhow::ensure!(store::delete_entry(&conn, id)?, "entry not found: {id}");
    println!("Deleted entry {id}");
    Ok(())
}
