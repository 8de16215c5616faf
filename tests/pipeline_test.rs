mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use cairn::chunking::{char_slice, HeuristicEstimator};
use cairn::config::{ChunkingConfig, RetrievalConfig};
use cairn::db::store;
use cairn::queue::{EmbeddingJob, EmbeddingWorker, JobEvent, ManualClock, WorkerOptions};
use cairn::retrieval::{
    answer, AnswerSynthesizer, Orchestrator, RetrievalRequest, NOT_ENOUGH_CONTEXT,
};
use helpers::FakeProvider;

/// Cites the first context block it was given.
struct FirstBlockSynth;

impl AnswerSynthesizer for FirstBlockSynth {
    fn synthesize(&self, _system: &str, user: &str) -> cairn::Result<String> {
        let header = user
            .lines()
            .find(|l| l.starts_with("[1] "))
            .expect("first block header");
        let field = |name: &str| -> String {
            header
                .split_whitespace()
                .find_map(|kv| kv.strip_prefix(&format!("{name}=")))
                .expect("field")
                .to_string()
        };
        Ok(format!(
            r#"Sure. {{"answer": "From your notes.", "citations": [{{"entryId": "{}", "start": {}, "end": {}}}], "confidence": 0.8}}"#,
            field("entryId"),
            field("start"),
            field("end"),
        ))
    }
}

fn worker_options() -> WorkerOptions {
    WorkerOptions {
        batch_size: 4,
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        embed_timeout: Duration::from_secs(5),
        embed_batch_size: 8,
        chunking: ChunkingConfig {
            target_tokens: 12,
            overlap_tokens: 3,
            ..ChunkingConfig::default()
        },
    }
}

fn retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        max_results: 4,
        max_citations: 3,
        lambda: 0.7,
        token_budget: 60,
        min_snippet_tokens: 2,
        time_decay_weight: 0.0,
    }
}

#[tokio::test]
async fn entries_flow_from_vault_to_cited_answer() {
    let mut conn = helpers::test_db();
    let (_record, session) = helpers::test_vault(&conn);

    let entries = [
        (
            "Visited Lisbon in spring. The tram climbed past tiled houses. Ate pastel de nata every morning.",
            vec!["travel"],
            Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap(),
        ),
        (
            "Baked sourdough bread today. The starter finally behaved. Crumb was open and glossy.",
            vec!["cooking"],
            Utc.with_ymd_and_hms(2024, 5, 10, 18, 0, 0).unwrap(),
        ),
        (
            "Long meeting about the quarterly roadmap. Nobody agreed on priorities.",
            vec!["work"],
            Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap(),
        ),
    ];

    let provider = Arc::new(FakeProvider);
    let (worker, mut events) = EmbeddingWorker::new(
        provider.clone(),
        Arc::new(HeuristicEstimator::default()),
        Arc::new(ManualClock::new()),
        worker_options(),
    );

    let mut sources = std::collections::HashMap::new();
    for (text, tags, at) in &entries {
        let id = helpers::insert_entry(&conn, &session, text, *at, tags);
        sources.insert(id.clone(), text.to_string());
        worker
            .enqueue(
                EmbeddingJob::new(id, *text).with_tags(tags.iter().map(|t| t.to_string()).collect()),
            )
            .unwrap();
    }
    worker.process_queue().await;

    let mut stored = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            JobEvent::Succeeded {
                entry_id,
                model,
                chunks,
                vectors,
                ..
            } => {
                assert_eq!(model, "fake-bow");
                stored += 1;
                store::store_embeddings(&mut conn, &entry_id, &model, &chunks, &vectors).unwrap();
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(stored, entries.len());
    assert!(store::entries_missing_vectors(&conn, "fake-bow").unwrap().is_empty());

    let candidates = store::load_candidates(&conn, &session, "fake-bow").unwrap();
    assert!(candidates.len() > entries.len(), "entries should split into several chunks");

    let orchestrator = Orchestrator::new(
        provider,
        Arc::new(HeuristicEstimator::default()),
        retrieval_config(),
    );
    let outcome = orchestrator
        .query(&RetrievalRequest::new("sourdough bread starter"), candidates.clone())
        .await
        .unwrap();

    assert!(!outcome.is_empty());
    assert!(outcome.confidence > 0.0 && outcome.confidence <= 1.0);
    assert!(outcome.blocks[0].text.to_lowercase().contains("bread")
        || outcome.blocks[0].text.to_lowercase().contains("starter"));

    // every citation slices back to the text it was assembled from
    for (block, cite) in outcome.blocks.iter().zip(&outcome.citations) {
        let source = &sources[&cite.entry_id];
        assert_eq!(char_slice(source, cite.start, cite.end), Some(block.text.as_str()));
        assert!((0.0..=1.0).contains(&cite.score));
    }

    let reply = answer(&outcome, &FirstBlockSynth).unwrap();
    assert_eq!(reply.citations.len(), 1);
    assert_eq!(reply.citations[0].entry_id, outcome.blocks[0].entry_id);
    assert_eq!(reply.confidence, 0.8);

    // tag filter that matches nothing: empty context, no synthesizer call
    let mut filtered = RetrievalRequest::new("sourdough bread starter");
    filtered.filters.tags = vec!["gardening".into()];
    let empty = orchestrator.query(&filtered, candidates).await.unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.confidence, 0.0);
    let reply = answer(&empty, &FirstBlockSynth).unwrap();
    assert_eq!(reply.answer, NOT_ENOUGH_CONTEXT);
}

#[tokio::test]
async fn time_range_filter_limits_citations_to_matching_entries() {
    let mut conn = helpers::test_db();
    let (_record, session) = helpers::test_vault(&conn);
    let early = Utc.with_ymd_and_hms(2023, 1, 5, 8, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();

    let old_id = helpers::insert_entry(&conn, &session, "Ran along the river at dawn.", early, &[]);
    let new_id = helpers::insert_entry(&conn, &session, "Ran along the river at dusk.", late, &[]);

    let provider = Arc::new(FakeProvider);
    let (worker, mut events) = EmbeddingWorker::new(
        provider.clone(),
        Arc::new(HeuristicEstimator::default()),
        Arc::new(ManualClock::new()),
        worker_options(),
    );
    worker.enqueue(EmbeddingJob::new(old_id.clone(), "Ran along the river at dawn.")).unwrap();
    worker.enqueue(EmbeddingJob::new(new_id.clone(), "Ran along the river at dusk.")).unwrap();
    worker.process_queue().await;
    while let Ok(JobEvent::Succeeded { entry_id, model, chunks, vectors, .. }) = events.try_recv() {
        store::store_embeddings(&mut conn, &entry_id, &model, &chunks, &vectors).unwrap();
    }

    let candidates = store::load_candidates(&conn, &session, "fake-bow").unwrap();
    let orchestrator = Orchestrator::new(
        provider,
        Arc::new(HeuristicEstimator::default()),
        retrieval_config(),
    );
    let mut request = RetrievalRequest::new("river run");
    request.filters.from = Some(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
    let outcome = orchestrator.query(&request, candidates).await.unwrap();

    assert!(!outcome.citations.is_empty());
    assert!(outcome.citations.iter().all(|c| c.entry_id == new_id));
}
