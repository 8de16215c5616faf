//! Background chunk-and-embed worker.
//!
//! One batch is in flight at a time. Jobs in a batch run concurrently and
//! fail independently; failures are retried with exponential backoff through
//! a [`DelayQueue`] driven by an injectable [`Clock`].

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::chunking::{chunk_entry, TextChunk, TokenEstimator};
use crate::config::{CairnConfig, ChunkingConfig};
use crate::embedding::{embed_in_batches, EmbeddingProvider};
use crate::error::{CairnError, Result};

use super::clock::Clock;
use super::delay::DelayQueue;
use super::job::{EmbeddingJob, JobEvent, JobStatus};

/// Largest backoff exponent; keeps `base_delay · 2^n` from overflowing.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Terminal statuses kept for [`EmbeddingWorker::status`]; oldest go first.
const FINISHED_STATUS_CAP: usize = 1024;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Jobs dispatched per batch.
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Limit on each embedding provider call.
    pub embed_timeout: Duration,
    /// Texts per provider call.
    pub embed_batch_size: usize,
    pub chunking: ChunkingConfig,
}

impl WorkerOptions {
    pub fn from_config(config: &CairnConfig) -> Self {
        Self {
            batch_size: config.queue.batch_size,
            max_retries: config.queue.max_retries,
            base_delay: config.queue.base_delay(),
            embed_timeout: config.queue.embed_timeout(),
            embed_batch_size: config.embedding.batch_size,
            chunking: config.chunking.clone(),
        }
    }

    /// Backoff before the attempt following failure number `retries` (1-based).
    pub fn backoff(&self, retries: u32) -> Duration {
        let shift = retries.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }
}

/// Heap entry: higher priority first, then earlier enqueue.
struct Ready {
    priority: i32,
    seq: u64,
    job: EmbeddingJob,
}

impl Ready {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: DelayQueue<EmbeddingJob>,
    statuses: HashMap<Uuid, JobStatus>,
    /// Terminal job ids in completion order.
    finished: VecDeque<Uuid>,
    seq: u64,
}

impl QueueState {
    fn push_ready(&mut self, mut job: EmbeddingJob) {
        self.seq += 1;
        job.status = JobStatus::Queued;
        self.statuses.insert(job.id, JobStatus::Queued);
        self.ready.push(Ready {
            priority: job.priority,
            seq: self.seq,
            job,
        });
    }

    /// Record a terminal status, evicting the oldest beyond the cap.
    fn finish(&mut self, id: Uuid, status: JobStatus) {
        self.statuses.insert(id, status);
        self.finished.push_back(id);
        while self.finished.len() > FINISHED_STATUS_CAP {
            if let Some(oldest) = self.finished.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }
}

struct Inner {
    state: Mutex<QueueState>,
    processing: AtomicBool,
    /// Signalled on enqueue so a drain waiting on a retry deadline wakes up.
    wakeup: Notify,
    idle: Notify,
    provider: Arc<dyn EmbeddingProvider>,
    estimator: Arc<dyn TokenEstimator>,
    clock: Arc<dyn Clock>,
    options: WorkerOptions,
    events: mpsc::UnboundedSender<JobEvent>,
}

/// Priority queue of embedding jobs with retry and backoff. Cheap to clone.
#[derive(Clone)]
pub struct EmbeddingWorker {
    inner: Arc<Inner>,
}

impl EmbeddingWorker {
    /// Create a worker and the receiver for its [`JobEvent`]s.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        estimator: Arc<dyn TokenEstimator>,
        clock: Arc<dyn Clock>,
        options: WorkerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            state: Mutex::new(QueueState::default()),
            processing: AtomicBool::new(false),
            wakeup: Notify::new(),
            idle: Notify::new(),
            provider,
            estimator,
            clock,
            options,
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a job without starting processing.
    ///
    /// # Errors
    ///
    /// [`CairnError::Validation`] if the job has no text to embed.
    pub fn enqueue(&self, job: EmbeddingJob) -> Result<Uuid> {
        if job.text.trim().is_empty() {
            return Err(CairnError::Validation(format!(
                "entry {} has no text to embed",
                job.entry_id
            )));
        }
        let id = job.id;
        tracing::debug!(job_id = %id, entry_id = %job.entry_id, priority = job.priority, "job queued");
        self.state().push_ready(job);
        self.inner.wakeup.notify_one();
        Ok(id)
    }

    /// Queue a job and start processing on the current tokio runtime if idle.
    pub fn add_job(&self, job: EmbeddingJob) -> Result<Uuid> {
        let id = self.enqueue(job)?;
        if self.try_begin() {
            let worker = self.clone();
            tokio::spawn(async move { worker.run_until_idle().await });
        }
        Ok(id)
    }

    /// Drain the queue, including retries, then return. A no-op if another
    /// drain is already running.
    pub async fn process_queue(&self) {
        if self.try_begin() {
            self.run_until_idle().await;
        }
    }

    /// Drop all queued and delayed jobs. A batch already dispatched still
    /// completes. Returns how many jobs were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        let dropped_ready: HashSet<Uuid> = state.ready.drain().map(|r| r.job.id).collect();
        let delayed = state.delayed.clear();
        state
            .statuses
            .retain(|id, status| !dropped_ready.contains(id) && *status != JobStatus::Retrying);
        let dropped = dropped_ready.len() + delayed;
        tracing::info!(dropped, "queue cleared");
        dropped
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.state().statuses.get(&job_id).copied()
    }

    /// Jobs waiting to run, including those waiting out a retry delay.
    pub fn pending_len(&self) -> usize {
        let state = self.state();
        state.ready.len() + state.delayed.len()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Wait until no drain is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.is_processing() {
                return;
            }
            notified.await;
        }
    }

    fn try_begin(&self) -> bool {
        self.inner
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run_until_idle(&self) {
        loop {
            self.drain().await;
            self.inner.processing.store(false, Ordering::Release);
            // a job may have been enqueued between the last empty check and the store
            if self.pending_len() == 0 || !self.try_begin() {
                break;
            }
        }
        self.inner.idle.notify_waiters();
    }

    async fn drain(&self) {
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                let next_due = self.state().delayed.next_due();
                match next_due {
                    Some(due) => {
                        tokio::select! {
                            _ = self.inner.clock.sleep_until(due) => {}
                            _ = self.inner.wakeup.notified() => {}
                        }
                        continue;
                    }
                    None => break,
                }
            }

            tracing::debug!(jobs = batch.len(), "dispatching batch");
            let mut set = JoinSet::new();
            for job in batch {
                let inner = Arc::clone(&self.inner);
                set.spawn(async move {
                    let outcome = run_job(&inner, &job).await;
                    (job, outcome)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((job, outcome)) => self.settle(job, outcome),
                    Err(e) => tracing::error!(error = %e, "embedding task aborted"),
                }
            }
        }
    }

    /// Promote due retries, then take up to `batch_size` jobs by priority.
    fn take_batch(&self) -> Vec<EmbeddingJob> {
        let now = self.inner.clock.now();
        let mut state = self.state();
        for job in state.delayed.pop_due(now) {
            state.push_ready(job);
        }

        let mut batch = Vec::with_capacity(self.inner.options.batch_size);
        while batch.len() < self.inner.options.batch_size.max(1) {
            let Some(Ready { mut job, .. }) = state.ready.pop() else {
                break;
            };
            job.status = JobStatus::Processing;
            state.statuses.insert(job.id, JobStatus::Processing);
            batch.push(job);
        }
        batch
    }

    fn settle(&self, mut job: EmbeddingJob, outcome: Result<(String, Vec<TextChunk>, Vec<Vec<f32>>)>) {
        let options = &self.inner.options;
        let event = match outcome {
            Ok((model, chunks, vectors)) => {
                self.state().finish(job.id, JobStatus::Succeeded);
                tracing::info!(
                    job_id = %job.id,
                    entry_id = %job.entry_id,
                    chunks = chunks.len(),
                    attempts = job.retries + 1,
                    "job succeeded"
                );
                JobEvent::Succeeded {
                    job_id: job.id,
                    entry_id: job.entry_id.clone(),
                    model,
                    chunks,
                    vectors,
                }
            }
            Err(err) => {
                job.retries += 1;
                if err.is_retryable() && job.retries < options.max_retries {
                    let delay = options.backoff(job.retries);
                    let due = self.inner.clock.now() + delay;
                    tracing::warn!(
                        job_id = %job.id,
                        retries = job.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job failed, will retry"
                    );
                    let event = JobEvent::Retrying {
                        job_id: job.id,
                        retries: job.retries,
                        delay,
                        error: err.to_string(),
                    };
                    job.status = JobStatus::Retrying;
                    let mut state = self.state();
                    state.statuses.insert(job.id, JobStatus::Retrying);
                    state.delayed.push(due, job);
                    event
                } else {
                    tracing::error!(
                        job_id = %job.id,
                        entry_id = %job.entry_id,
                        retries = job.retries,
                        error = %err,
                        "job failed permanently"
                    );
                    self.state().finish(job.id, JobStatus::Failed);
                    JobEvent::Failed {
                        job_id: job.id,
                        entry_id: job.entry_id.clone(),
                        error: CairnError::QueueTerminal {
                            job_id: job.id,
                            retries: job.retries,
                            last_error: err.to_string(),
                        },
                    }
                }
            }
        };

        if self.inner.events.send(event).is_err() {
            tracing::debug!("job event receiver dropped");
        }
    }
}

/// Chunk the entry, then embed the chunks one provider batch at a time.
async fn run_job(inner: &Inner, job: &EmbeddingJob) -> Result<(String, Vec<TextChunk>, Vec<Vec<f32>>)> {
    let chunks = {
        let estimator = Arc::clone(&inner.estimator);
        let chunking = inner.options.chunking.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || {
            chunk_entry(
                &job.entry_id,
                &job.text,
                &job.tags,
                job.importance,
                &chunking,
                estimator.as_ref(),
            )
        })
        .await
        .map_err(|e| CairnError::Processing(format!("chunking task failed: {e}")))??
    };

    let batch_size = inner.options.embed_batch_size.max(1);
    let mut vectors = Vec::with_capacity(chunks.len());
    for group in chunks.chunks(batch_size) {
        let texts: Vec<String> = group.iter().map(|c| c.text.clone()).collect();
        let provider = Arc::clone(&inner.provider);
        // A timed-out call keeps running on the blocking pool; its result is discarded.
        let call = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embed_in_batches(provider.as_ref(), &refs, batch_size)
        });
        let embedded = match tokio::time::timeout(inner.options.embed_timeout, call).await {
            Err(_) => {
                return Err(CairnError::Processing(format!(
                    "embedding call timed out after {} ms",
                    inner.options.embed_timeout.as_millis()
                )))
            }
            Ok(Err(e)) => return Err(CairnError::Processing(format!("embedding task failed: {e}"))),
            Ok(Ok(result)) => result?,
        };
        vectors.extend(embedded);
    }

    Ok((inner.provider.model_id().to_string(), chunks, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::HeuristicEstimator;
    use crate::queue::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls, then returns constant vectors.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for FlakyProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures || text.contains("poison") {
                return Err(CairnError::Processing(format!("model hiccup #{call}")));
            }
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn model_id(&self) -> &str {
            "flaky"
        }
    }

    fn options(max_retries: u32, batch_size: usize) -> WorkerOptions {
        WorkerOptions {
            batch_size,
            max_retries,
            base_delay: Duration::from_secs(1),
            embed_timeout: Duration::from_secs(5),
            embed_batch_size: 8,
            chunking: ChunkingConfig::default(),
        }
    }

    fn worker_with(
        provider: FlakyProvider,
        opts: WorkerOptions,
    ) -> (EmbeddingWorker, mpsc::UnboundedReceiver<JobEvent>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let (worker, rx) = EmbeddingWorker::new(
            Arc::new(provider),
            Arc::new(HeuristicEstimator::default()),
            clock.clone(),
            opts,
        );
        (worker, rx, clock)
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn backoff_doubles_from_base() {
        let opts = options(5, 1);
        assert_eq!(opts.backoff(1), Duration::from_secs(1));
        assert_eq!(opts.backoff(2), Duration::from_secs(2));
        assert_eq!(opts.backoff(3), Duration::from_secs(4));
        assert_eq!(opts.backoff(200), Duration::from_secs(1 << MAX_BACKOFF_SHIFT));
    }

    #[tokio::test]
    async fn job_succeeds_after_transient_failures() {
        let (worker, mut rx, clock) = worker_with(FlakyProvider::new(2), options(3, 4));
        let id = worker
            .enqueue(EmbeddingJob::new("entry-1", "Went hiking. Saw a heron."))
            .unwrap();

        worker.process_queue().await;

        assert_eq!(worker.status(id), Some(JobStatus::Succeeded));
        let events = drain_events(&mut rx);
        assert!(matches!(events[0], JobEvent::Retrying { retries: 1, .. }));
        assert!(matches!(events[1], JobEvent::Retrying { retries: 2, .. }));
        match &events[2] {
            JobEvent::Succeeded {
                chunks,
                vectors,
                model,
                ..
            } => {
                assert_eq!(chunks.len(), vectors.len());
                assert_eq!(model, "flaky");
            }
            other => panic!("expected success, got {other:?}"),
        }
        // 1s + 2s of backoff elapsed on the virtual clock
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn job_fails_terminally_after_max_retries() {
        let (worker, mut rx, _clock) = worker_with(FlakyProvider::new(usize::MAX), options(3, 4));
        let id = worker.enqueue(EmbeddingJob::new("entry-1", "Never embeds.")).unwrap();

        worker.process_queue().await;

        assert_eq!(worker.status(id), Some(JobStatus::Failed));
        assert_eq!(worker.pending_len(), 0);
        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 3);
        match events.last() {
            Some(JobEvent::Failed {
                error: CairnError::QueueTerminal { retries, last_error, .. },
                ..
            }) => {
                assert_eq!(*retries, 3);
                assert!(last_error.contains("model hiccup"));
            }
            other => panic!("expected terminal failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failures_are_isolated_within_a_batch() {
        let (worker, mut rx, _clock) = worker_with(FlakyProvider::new(0), options(2, 4));
        let good: Vec<Uuid> = (0..3)
            .map(|i| {
                worker
                    .enqueue(EmbeddingJob::new(format!("entry-{i}"), "A normal day."))
                    .unwrap()
            })
            .collect();
        let bad = worker
            .enqueue(EmbeddingJob::new("entry-bad", "This one is poison."))
            .unwrap();

        worker.process_queue().await;

        for id in good {
            assert_eq!(worker.status(id), Some(JobStatus::Succeeded));
        }
        assert_eq!(worker.status(bad), Some(JobStatus::Failed));
        let succeeded = drain_events(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, JobEvent::Succeeded { .. }))
            .count();
        assert_eq!(succeeded, 3);
    }

    #[tokio::test]
    async fn higher_priority_runs_first_and_ties_keep_enqueue_order() {
        let (worker, mut rx, _clock) = worker_with(FlakyProvider::new(0), options(3, 1));
        for (entry, priority) in [("p1", 1), ("p5a", 5), ("p5b", 5), ("p3", 3)] {
            worker
                .enqueue(EmbeddingJob::new(entry, "Some text.").with_priority(priority))
                .unwrap();
        }

        worker.process_queue().await;

        let order: Vec<String> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::Succeeded { entry_id, .. } => Some(entry_id),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["p5a", "p5b", "p3", "p1"]);
    }

    #[tokio::test]
    async fn validation_and_non_retryable_errors() {
        let (worker, _rx, _clock) = worker_with(FlakyProvider::new(0), options(3, 1));
        let err = worker.enqueue(EmbeddingJob::new("entry-1", "   ")).unwrap_err();
        assert!(matches!(err, CairnError::Validation(_)));
        assert_eq!(worker.pending_len(), 0);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        struct SlowProvider;
        impl EmbeddingProvider for SlowProvider {
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(vec![1.0])
            }
            fn dimensions(&self) -> usize {
                1
            }
            fn model_id(&self) -> &str {
                "slow"
            }
        }

        let clock = Arc::new(ManualClock::new());
        let opts = WorkerOptions {
            embed_timeout: Duration::from_millis(20),
            ..options(1, 1)
        };
        let (worker, mut rx) = EmbeddingWorker::new(
            Arc::new(SlowProvider),
            Arc::new(HeuristicEstimator::default()),
            clock,
            opts,
        );
        let id = worker.enqueue(EmbeddingJob::new("entry-1", "Slow going.")).unwrap();
        worker.process_queue().await;

        assert_eq!(worker.status(id), Some(JobStatus::Failed));
        match rx.try_recv() {
            Ok(JobEvent::Failed {
                error: CairnError::QueueTerminal { last_error, .. },
                ..
            }) => assert!(last_error.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_drops_pending_jobs() {
        let (worker, _rx, _clock) = worker_with(FlakyProvider::new(0), options(3, 1));
        let id = worker.enqueue(EmbeddingJob::new("a", "One.")).unwrap();
        worker.enqueue(EmbeddingJob::new("b", "Two.")).unwrap();

        assert_eq!(worker.clear(), 2);
        assert_eq!(worker.pending_len(), 0);
        assert_eq!(worker.status(id), None);
    }

    #[tokio::test]
    async fn add_job_starts_processing_in_background() {
        let (worker, mut rx, _clock) = worker_with(FlakyProvider::new(1), options(3, 2));
        let id = worker
            .add_job(EmbeddingJob::new("entry-1", "Background work."))
            .unwrap();
        assert!(worker.is_processing());

        worker.wait_idle().await;

        assert_eq!(worker.status(id), Some(JobStatus::Succeeded));
        assert!(!worker.is_processing());
        let events = drain_events(&mut rx);
        assert!(matches!(events.last(), Some(JobEvent::Succeeded { .. })));
    }

    #[test]
    fn terminal_statuses_are_capped_oldest_first() {
        let mut state = QueueState::default();
        let ids: Vec<Uuid> = (0..FINISHED_STATUS_CAP + 5).map(|_| Uuid::now_v7()).collect();
        for (i, id) in ids.iter().enumerate() {
            let status = if i % 2 == 0 { JobStatus::Succeeded } else { JobStatus::Failed };
            state.finish(*id, status);
        }

        assert_eq!(state.statuses.len(), FINISHED_STATUS_CAP);
        assert_eq!(state.finished.len(), FINISHED_STATUS_CAP);
        assert!(ids[..5].iter().all(|id| !state.statuses.contains_key(id)));
        assert_eq!(state.statuses.get(&ids[5]), Some(&JobStatus::Failed));
        assert!(state.statuses.contains_key(ids.last().unwrap()));
    }

    #[tokio::test]
    async fn many_jobs_leave_a_bounded_status_map() {
        let (worker, _rx, _clock) = worker_with(FlakyProvider::new(0), options(3, 64));
        let mut ids = Vec::new();
        for i in 0..FINISHED_STATUS_CAP + 10 {
            ids.push(worker.enqueue(EmbeddingJob::new(format!("e{i}"), "Short note.")).unwrap());
        }
        worker.process_queue().await;

        assert_eq!(worker.status(ids[0]), None);
        assert_eq!(worker.status(*ids.last().unwrap()), Some(JobStatus::Succeeded));
        assert!(worker.state().statuses.len() <= FINISHED_STATUS_CAP);
    }
}
