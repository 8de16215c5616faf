//! Run embedding jobs to completion and persist what they produce.

use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rusqlite::Connection;

use cairn::chunking::create_estimator;
use cairn::config::CairnConfig;
use cairn::db::store::{self, AuditAction};
use cairn::embedding::{self, EmbeddingProvider};
use cairn::queue::{EmbeddingJob, EmbeddingWorker, JobEvent, SystemClock, WorkerOptions};

#[derive(Debug, Default)]
pub struct EmbedSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
}

/// Queue `jobs`, then persist each success as it arrives. Returns once every
/// job has reached a terminal state.
pub async fn run_jobs(
    conn: &mut Connection,
    config: &CairnConfig,
    jobs: Vec<EmbeddingJob>,
) -> Result<EmbedSummary> {
    let mut summary = EmbedSummary::default();
    if jobs.is_empty() {
        return Ok(summary);
    }

    let provider: Arc<dyn EmbeddingProvider> = Arc::from(
        embedding::create_provider(&config.embedding)
            .context("failed to create embedding provider")?,
    );
    let estimator = create_estimator(config).context("failed to create token estimator")?;
    let (worker, mut events) = EmbeddingWorker::new(
        provider,
        estimator,
        Arc::new(SystemClock::new()),
        WorkerOptions::from_config(config),
    );

    let total = jobs.len();
    for job in jobs {
        worker.add_job(job)?;
    }

    let pb = if total > 1 {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(super::bar_style("  {bar:40.cyan/blue} {pos}/{len} ({eta})")?);
        pb
    } else {
        ProgressBar::hidden()
    };

    while summary.succeeded + summary.failed < total {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            JobEvent::Succeeded {
                entry_id,
                model,
                chunks,
                vectors,
                ..
            } => {
                summary.chunks += store::store_embeddings(conn, &entry_id, &model, &chunks, &vectors)?;
                summary.succeeded += 1;
                pb.inc(1);
            }
            JobEvent::Retrying {
                job_id,
                retries,
                delay,
                error,
            } => {
                tracing::warn!(%job_id, retries, ?delay, %error, "embedding failed, will retry");
            }
            JobEvent::Failed { entry_id, error, .. } => {
                store::write_audit_log(
                    conn,
                    AuditAction::EmbeddingFailed,
                    &entry_id,
                    Some(&serde_json::json!({ "error": error.to_string() })),
                )?;
                pb.suspend(|| eprintln!("Embedding failed for entry {entry_id}: {error}"));
                summary.failed += 1;
                pb.inc(1);
            }
        }
    }

    pb.finish_and_clear();
    worker.wait_idle().await;
    Ok(summary)
}

/// Job that re-embeds a stored entry with its own tags and importance.
pub fn entry_job(entry: &store::EntryRecord, text: &str) -> EmbeddingJob {
    EmbeddingJob::new(entry.id.clone(), text)
        .with_tags(entry.tags.clone())
        .with_importance(entry.importance)
}

/// `cairn reindex`: embed every entry that has no vectors for the
/// configured model.
pub async fn reindex(config: &CairnConfig) -> Result<()> {
    let mut conn = cairn::db::open_database(config.resolved_db_path())?;
    let (_vault, session) = super::unlock_vault(&conn, config)?;

    let model = config.embedding.model.as_str();
    let missing = store::entries_missing_vectors(&conn, model)?;
    if missing.is_empty() {
        println!("All entries are embedded with '{model}'.");
        return Ok(());
    }

    let mut jobs = Vec::with_capacity(missing.len());
    for id in &missing {
        let Some(entry) = store::load_entry(&conn, id)? else {
            continue;
        };
        let text = entry.open(&session)?;
        if text.trim().is_empty() {
            continue;
        }
        jobs.push(entry_job(&entry, text.as_str()));
    }
    session.lock();

    println!("Embedding {} entries with '{model}'...", jobs.len());
    let summary = run_jobs(&mut conn, config, jobs).await?;

    if summary.failed == 0 {
        cairn::db::migrations::set_embedding_model(&conn, model)?;
    }
    println!(
        "Embedded {} entries ({} chunks), {} failed.",
        summary.succeeded, summary.chunks, summary.failed
    );
    Ok(())
}
