//! CLI `ask` command: retrieve cited context for a question and optionally
//! hand it to an external answer synthesizer.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use cairn::chunking::create_estimator;
use cairn::config::CairnConfig;
use cairn::db::{self, store};
use cairn::embedding::{self, EmbeddingProvider};
use cairn::retrieval::{
    answer, AnswerSynthesizer, Orchestrator, QueryFilters, RetrievalOutcome, RetrievalRequest,
};
use cairn::{CairnError, Result as CairnResult};

#[derive(Debug, Default)]
pub struct AskArgs {
    pub question: String,
    pub tags: Vec<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub min_importance: Option<f32>,
    pub max_results: Option<usize>,
    pub lambda: Option<f32>,
    pub synthesizer_cmd: Option<String>,
    pub json: bool,
}

/// Runs a shell command per question. The command reads
/// `{"system": .., "user": ..}` on stdin and writes its reply on stdout.
pub struct CommandSynthesizer {
    command: String,
}

impl CommandSynthesizer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl AnswerSynthesizer for CommandSynthesizer {
    fn synthesize(&self, system_prompt: &str, user_prompt: &str) -> CairnResult<String> {
        let failed = |e: std::io::Error| {
            CairnError::Processing(format!("synthesizer command failed: {e}"))
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(failed)?;

        let payload = serde_json::json!({ "system": system_prompt, "user": user_prompt });
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.to_string().as_bytes()).map_err(failed)?;
        }

        let output = child.wait_with_output().map_err(failed)?;
        if !output.status.success() {
            return Err(CairnError::Processing(format!(
                "synthesizer command exited with {}",
                output.status
            )));
        }
        String::from_utf8(output.stdout).map_err(|_| {
            CairnError::Processing("synthesizer reply is not valid UTF-8".to_string())
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AskReport<'a> {
    outcome: &'a RetrievalOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<&'a cairn::retrieval::Answer>,
}

/// Upper bound of a range. A bare date covers the whole day.
fn parse_range_end(raw: &str) -> Result<DateTime<Utc>> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date
            .and_hms_milli_opt(23, 59, 59, 999)
            .map(|at| at.and_utc())
            .context("invalid date"),
        Err(_) => super::add::parse_occurred_at(raw),
    }
}

fn filters(args: &AskArgs) -> Result<QueryFilters> {
    Ok(QueryFilters {
        tags: args.tags.clone(),
        from: args.from.as_deref().map(super::add::parse_occurred_at).transpose()?,
        to: args.to.as_deref().map(parse_range_end).transpose()?,
        min_importance: args.min_importance,
    })
}

pub async fn ask(config: &CairnConfig, args: AskArgs) -> Result<()> {
    anyhow::ensure!(!args.question.trim().is_empty(), "question cannot be empty");
    let request = RetrievalRequest {
        filters: filters(&args)?,
        max_results: args.max_results,
        lambda: args.lambda,
        ..RetrievalRequest::new(args.question.clone())
    };

    let conn = db::open_database(config.resolved_db_path())?;
    let model = config.embedding.model.as_str();
    if let Some(stored) = db::migrations::get_embedding_model(&conn)? {
        if stored != model {
            tracing::warn!(stored = %stored, configured = model, "embedding model mismatch; run `cairn reindex`");
        }
    }

    let (_vault, session) = super::unlock_vault(&conn, config)?;
    let candidates = store::load_candidates(&conn, &session, model)?;
    session.lock();

    let provider: Arc<dyn EmbeddingProvider> = Arc::from(
        embedding::create_provider(&config.embedding)
            .context("failed to create embedding provider")?,
    );
    let estimator = create_estimator(config).context("failed to create token estimator")?;
    let orchestrator = Orchestrator::new(provider, estimator, config.retrieval.clone());

    let outcome = orchestrator.query(&request, candidates).await?;
    store::write_audit_log(
        &conn,
        store::AuditAction::Query,
        "query",
        Some(&serde_json::json!({
            "blocks": outcome.blocks.len(),
            "confidence": outcome.confidence,
        })),
    )?;

    let reply = match args.synthesizer_cmd.as_deref() {
        Some(cmd) => Some(answer(&outcome, &CommandSynthesizer::new(cmd))?),
        None => None,
    };

    if args.json {
        let report = AskReport {
            outcome: &outcome,
            answer: reply.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(reply) = &reply {
        println!("{}\n", reply.answer);
        for cite in &reply.citations {
            println!("  - entry {} [{}..{})", cite.entry_id, cite.start, cite.end);
        }
        println!("\nConfidence: {:.2}", reply.confidence);
        return Ok(());
    }

    if outcome.is_empty() {
        println!("No matching context.");
        return Ok(());
    }
    println!(
        "{} snippet(s), confidence {:.2}\n",
        outcome.blocks.len(),
        outcome.confidence
    );
    for block in &outcome.blocks {
        println!(
            "[{}] entry {} [{}..{}) score {:.3}{}",
            block.index,
            block.entry_id,
            block.start,
            block.end,
            block.score,
            if block.truncated { " (truncated)" } else { "" }
        );
        println!("    {}\n", block.text);
    }
    Ok(())
}
