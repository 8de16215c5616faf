//! CLI `add` command: seal a new entry and embed it.

use std::io::{IsTerminal, Read};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use zeroize::Zeroizing;

use cairn::config::CairnConfig;
use cairn::db::{self, store};
use cairn::queue::EmbeddingJob;

#[derive(Debug, Default)]
pub struct AddArgs {
    pub body: Option<String>,
    pub tags: Vec<String>,
    pub occurred_at: Option<String>,
    pub importance: f32,
    pub priority: i32,
    pub mood: Option<f32>,
    pub pinned: bool,
    pub no_embed: bool,
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_occurred_at(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}', expected RFC 3339 or YYYY-MM-DD"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|at| at.and_utc())
        .context("invalid date")
}

/// Entry text from `--body`, else from piped stdin. `None` when neither is given.
pub(super) fn read_optional_body(body: Option<String>) -> Result<Option<Zeroizing<String>>> {
    if let Some(value) = body {
        anyhow::ensure!(!value.trim().is_empty(), "--body cannot be empty");
        return Ok(Some(Zeroizing::new(value)));
    }
    if std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buffer = Zeroizing::new(String::new());
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read stdin")?;
    anyhow::ensure!(!buffer.trim().is_empty(), "no input provided on stdin");
    Ok(Some(buffer))
}

fn read_body(body: Option<String>) -> Result<Zeroizing<String>> {
    read_optional_body(body)?.context("no entry text; pass --body or pipe it on stdin")
}

pub async fn add(config: &CairnConfig, args: AddArgs) -> Result<()> {
    let text = read_body(args.body)?;
    let occurred_at = match args.occurred_at.as_deref() {
        Some(raw) => parse_occurred_at(raw)?,
        None => Utc::now(),
    };
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.importance),
        "--importance must be within [0, 1]"
    );
    if let Some(mood) = args.mood {
        anyhow::ensure!((-1.0..=1.0).contains(&mood), "--mood must be within [-1, 1]");
    }

    let mut conn = db::open_database(config.resolved_db_path())?;
    let (_vault, session) = super::unlock_vault(&conn, config)?;

    let mut entry = store::EntryRecord::seal(&session, &text, occurred_at, args.tags.clone())?;
    entry.mood_score = args.mood;
    entry.pinned = args.pinned;
    entry.importance = args.importance;
    store::insert_entry(&conn, &entry)?;
    session.lock();
    println!("Added entry {}", entry.id);

    if args.no_embed {
        println!("Skipped embedding; run `cairn reindex` later.");
        return Ok(());
    }

    let job = EmbeddingJob::new(entry.id.clone(), text.as_str())
        .with_tags(args.tags)
        .with_importance(args.importance)
        .with_priority(args.priority);
    let summary = super::embed::run_jobs(&mut conn, config, vec![job]).await?;

    if summary.failed > 0 {
        println!("Embedding failed; the entry is saved. Run `cairn reindex` to retry.");
    } else {
        println!("Embedded {} chunk(s).", summary.chunks);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurred_at_accepts_dates_and_timestamps() {
        let day = parse_occurred_at("2024-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let at = parse_occurred_at("2024-03-01T09:30:00+02:00").unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-01T07:30:00+00:00");

        assert!(parse_occurred_at("yesterday").is_err());
    }
}
