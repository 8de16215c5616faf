use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cairn::chunking::HeuristicEstimator;
use cairn::config::ChunkingConfig;
use cairn::embedding::EmbeddingProvider;
use cairn::queue::{Clock, EmbeddingJob, EmbeddingWorker, JobEvent, JobStatus, ManualClock, WorkerOptions};
use cairn::CairnError;
use proptest::prelude::*;

/// Fails the first `failures` calls, then succeeds.
struct CountdownProvider {
    failures: usize,
    calls: AtomicUsize,
}

impl EmbeddingProvider for CountdownProvider {
    fn embed(&self, _text: &str) -> cairn::Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CairnError::Processing(format!("transient failure {call}")));
        }
        Ok(vec![0.6, 0.8])
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model_id(&self) -> &str {
        "countdown"
    }
}

fn options(max_retries: u32) -> WorkerOptions {
    WorkerOptions {
        batch_size: 2,
        max_retries,
        base_delay: Duration::from_millis(100),
        embed_timeout: Duration::from_secs(5),
        embed_batch_size: 4,
        chunking: ChunkingConfig::default(),
    }
}

/// Run one single-chunk job to completion on a fresh runtime.
fn run_one(failures: usize, max_retries: u32) -> (JobStatus, Vec<JobEvent>, Duration) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let clock = Arc::new(ManualClock::new());
        let provider = CountdownProvider {
            failures,
            calls: AtomicUsize::new(0),
        };
        let (worker, mut rx) = EmbeddingWorker::new(
            Arc::new(provider),
            Arc::new(HeuristicEstimator::default()),
            clock.clone(),
            options(max_retries),
        );
        let id = worker
            .enqueue(EmbeddingJob::new("entry", "A short single sentence."))
            .unwrap();
        worker.process_queue().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (worker.status(id).unwrap(), events, clock.now())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn retries_end_in_exactly_one_terminal_state(failures in 0usize..6, max_retries in 1u32..5) {
        let (status, events, elapsed) = run_one(failures, max_retries);
        let max = max_retries as usize;

        let retrying = events.iter().filter(|e| matches!(e, JobEvent::Retrying { .. })).count();
        let succeeded = events.iter().filter(|e| matches!(e, JobEvent::Succeeded { .. })).count();
        let failed = events.iter().filter(|e| matches!(e, JobEvent::Failed { .. })).count();
        prop_assert_eq!(succeeded + failed, 1);

        if failures < max {
            prop_assert_eq!(status, JobStatus::Succeeded);
            prop_assert_eq!(retrying, failures);
        } else {
            prop_assert_eq!(status, JobStatus::Failed);
            prop_assert_eq!(retrying, max - 1);
        }

        // virtual time advanced by exactly the scheduled backoffs
        let expected: Duration = (1..=retrying as u32).map(|r| options(max_retries).backoff(r)).sum();
        prop_assert_eq!(elapsed, expected);
    }
}

#[test]
fn one_below_the_limit_succeeds() {
    let (status, events, _) = run_one(2, 3);
    assert_eq!(status, JobStatus::Succeeded);
    assert!(matches!(events.last(), Some(JobEvent::Succeeded { .. })));
}

#[test]
fn hitting_the_limit_fails_and_is_never_requeued() {
    let (status, events, _) = run_one(3, 3);
    assert_eq!(status, JobStatus::Failed);
    match events.last() {
        Some(JobEvent::Failed {
            error: CairnError::QueueTerminal { retries, .. },
            ..
        }) => assert_eq!(*retries, 3),
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert_eq!(
        events.iter().filter(|e| matches!(e, JobEvent::Failed { .. })).count(),
        1
    );
}
