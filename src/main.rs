mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn::config::CairnConfig;
use cairn::db::transfer::ExportFormat;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Encrypted journal with cited semantic recall")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and vault
    Init,
    /// Change the vault passphrase
    Passwd,
    /// Add an entry (from --body or stdin) and embed it
    Add {
        #[arg(long)]
        body: Option<String>,
        /// Tag the entry (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        /// When it happened: RFC 3339 or YYYY-MM-DD
        #[arg(long = "at")]
        occurred_at: Option<String>,
        #[arg(long, default_value_t = 0.5)]
        importance: f32,
        /// Queue priority; higher embeds first
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Mood in [-1, 1]
        #[arg(long, allow_hyphen_values = true)]
        mood: Option<f32>,
        #[arg(long)]
        pin: bool,
        /// Store only; embed later with `cairn reindex`
        #[arg(long)]
        no_embed: bool,
    },
    /// Retrieve cited context for a question
    Ask {
        question: String,
        /// Only chunks carrying any of these tags (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        min_importance: Option<f32>,
        #[arg(long, short = 'k')]
        max_results: Option<usize>,
        /// Relevance/diversity trade-off in [0, 1]
        #[arg(long)]
        lambda: Option<f32>,
        /// Shell command that turns the prompts on stdin into a JSON answer
        #[arg(long)]
        synthesizer_cmd: Option<String>,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List entries (metadata only)
    List,
    /// Decrypt and print an entry, or one span of it
    Show {
        id: String,
        #[arg(long, requires = "end")]
        start: Option<usize>,
        #[arg(long, requires = "start")]
        end: Option<usize>,
    },
    /// Change an entry's text (from --body or stdin) or metadata and re-embed it
    Edit {
        id: String,
        #[arg(long)]
        body: Option<String>,
        /// Replace the entry's tags (repeatable)
        #[arg(long = "tag", short = 't', conflicts_with = "clear_tags")]
        tags: Vec<String>,
        /// Remove every tag
        #[arg(long)]
        clear_tags: bool,
        /// When it happened: RFC 3339 or YYYY-MM-DD
        #[arg(long = "at")]
        occurred_at: Option<String>,
        #[arg(long)]
        importance: Option<f32>,
        /// Mood in [-1, 1]
        #[arg(long, allow_hyphen_values = true)]
        mood: Option<f32>,
        #[arg(long, conflicts_with = "unpin")]
        pin: bool,
        #[arg(long)]
        unpin: bool,
        /// Store only; embed later with `cairn reindex`
        #[arg(long)]
        no_embed: bool,
    },
    /// Delete an entry with its chunks and vectors
    Delete { id: String },
    /// Show entry counts by tag and month
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Export all entries as JSON
    Export {
        /// "sealed" keeps ciphertext; "plain" decrypts
        #[arg(long, default_value = "sealed")]
        format: String,
        /// Write to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Import entries from an export file
    Import {
        file: PathBuf,
        /// Store only; embed later with `cairn reindex`
        #[arg(long)]
        no_embed: bool,
    },
    /// Embed entries that have no vectors for the configured model
    Reindex,
    /// Check database health
    Doctor,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.cairn/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CairnConfig::load()?;

    // stdout carries command output; logs go to stderr
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Init => cli::init::init(&config)?,
        Command::Passwd => cli::init::passwd(&config)?,
        Command::Add {
            body,
            tags,
            occurred_at,
            importance,
            priority,
            mood,
            pin,
            no_embed,
        } => {
            let args = cli::add::AddArgs {
                body,
                tags,
                occurred_at,
                importance,
                priority,
                mood,
                pinned: pin,
                no_embed,
            };
            cli::add::add(&config, args).await?;
        }
        Command::Ask {
            question,
            tags,
            from,
            to,
            min_importance,
            max_results,
            lambda,
            synthesizer_cmd,
            json,
        } => {
            let args = cli::ask::AskArgs {
                question,
                tags,
                from,
                to,
                min_importance,
                max_results,
                lambda,
                synthesizer_cmd,
                json,
            };
            cli::ask::ask(&config, args).await?;
        }
        Command::List => cli::entries::list(&config)?,
        Command::Show { id, start, end } => {
            cli::entries::show(&config, &id, start.zip(end))?;
        }
        Command::Edit {
            id,
            body,
            tags,
            clear_tags,
            occurred_at,
            importance,
            mood,
            pin,
            unpin,
            no_embed,
        } => {
            let tags = if clear_tags {
                Some(Vec::new())
            } else {
                Some(tags).filter(|t| !t.is_empty())
            };
            let pinned = match (pin, unpin) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let args = cli::entries::EditArgs {
                id,
                body,
                tags,
                occurred_at,
                importance,
                mood,
                pinned,
                no_embed,
            };
            cli::entries::edit(&config, args).await?;
        }
        Command::Delete { id } => cli::entries::delete(&config, &id)?,
        Command::Stats { json } => cli::stats::stats(&config, json)?,
        Command::Export { format, output } => {
            let format: ExportFormat = format.parse()?;
            cli::export::export(&config, format, output.as_deref())?;
        }
        Command::Import { file, no_embed } => {
            cli::import::import(&config, &file, no_embed).await?;
        }
        Command::Reindex => cli::embed::reindex(&config).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
