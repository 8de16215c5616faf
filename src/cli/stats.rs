use anyhow::Result;

use cairn::config::CairnConfig;
use cairn::db::{self, store};

/// Display entry statistics. Reads metadata only, so no passphrase is asked.
pub fn stats(config: &CairnConfig, json: bool) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let model = config.embedding.model.as_str();
    let stats = store::entry_stats(&conn, model)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Journal Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total entries:       {}", stats.total_entries);
    println!("  Pinned:              {}", stats.pinned_entries);
    println!("  Embedded ({model}): {}", stats.embedded_entries);
    println!("  Chunks:              {}", stats.total_chunks);
    println!();

    if !stats.by_tag.is_empty() {
        println!("By Tag:");
        for (tag, count) in &stats.by_tag {
            println!("  {tag:<16} {count}");
        }
        println!();
    }

    if !stats.by_month.is_empty() {
        println!("By Month:");
        for (month, count) in &stats.by_month {
            println!("  {month:<16} {count}");
        }
        println!();
    }

    if let Some(ref oldest) = stats.oldest {
        println!("Oldest entry:          {oldest}");
    }
    if let Some(ref newest) = stats.newest {
        println!("Newest entry:          {newest}");
    }

    Ok(())
}
