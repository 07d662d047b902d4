//! Durable per-graph FIFO job queue with concurrency = 1 per graph.
//!
//! Generalizes the teacher's `executor::retry` module (`RetryConfig`,
//! exponential `backoff_delay`, `classify_error`/`retry_with_backoff`) from a
//! single in-process retry loop into a multi-graph queue: each graph gets
//! its own FIFO of jobs and its own drain task, so revisions for different
//! graphs apply concurrently while revisions for the same graph apply
//! strictly in submission order.
//!
//! The per-graph FIFO and backoff loop are in-process, but every job is
//! backed by a row in the `revision_jobs` table (see
//! `db::repositories::JobRepository`) so a process restart can find and
//! re-drive anything that didn't reach a terminal status.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::models::JobRecord;
use crate::db::{DatabaseConnection, JobRepository};
use crate::error::{EngineError, ErrorKind, Result};

/// A queued unit of work: apply one revision to one graph.
#[derive(Debug, Clone)]
pub struct Job {
    pub graph_id: String,
    pub revision_id: String,
}

/// Backoff schedule for transient failures. Defaults mirror the teacher's
/// `RetryConfig` shape, retuned to the spec's base/factor/attempt count.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given zero-indexed retry attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.base.as_millis() as f64 * self.factor.powi(attempt as i32)) as u64;
        let delay_ms = if self.jitter {
            let jitter_amount = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter_amount
        } else {
            delay_ms
        };
        Duration::from_millis(delay_ms)
    }
}

/// Applies one queued revision. Implemented by `RevisionOrchestrator`; the
/// queue itself knows nothing about graphs or revisions beyond their ids.
#[async_trait]
pub trait RevisionProcessor: Send + Sync {
    /// Apply `revisionId` to `graphId`. Re-entrant: may be called again
    /// for the same job after a transient failure, and must re-read graph
    /// state rather than assume anything about a prior attempt.
    async fn apply(&self, graph_id: &str, revision_id: &str) -> Result<()>;

    /// Called once retries are exhausted on a transient failure, so the
    /// revision and the graph's `targetVersion` can be moved to their
    /// terminal failed state outside the retry loop.
    async fn mark_failed(&self, graph_id: &str, revision_id: &str, error: &EngineError);
}

struct GraphQueueState {
    jobs: VecDeque<Job>,
    draining: bool,
}

/// Per-graph FIFO queue. Graphs are independent: the `graphs` map only ever
/// grows (an idle graph's entry is cheap to keep around), but each entry's
/// own mutex enforces concurrency = 1 for that graph alone.
///
/// Durability is layered on top of the in-memory `VecDeque`s rather than
/// replacing them: `enqueue` writes a `revision_jobs` row before handing the
/// job to the in-process drain task, and `recover` reloads any row a prior
/// process left non-terminal and re-feeds it into the same drain path, so a
/// restart mid-drain (or mid-backoff) doesn't strand a revision forever.
pub struct RevisionQueue {
    graphs: dashmap::DashMap<String, Arc<Mutex<GraphQueueState>>>,
    policy: RetryPolicy,
    processor: parking_lot::RwLock<Option<Arc<dyn RevisionProcessor>>>,
    jobs: JobRepository,
}

impl RevisionQueue {
    pub fn new(db: Arc<DatabaseConnection>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            graphs: dashmap::DashMap::new(),
            policy,
            processor: parking_lot::RwLock::new(None),
            jobs: JobRepository::new(db),
        })
    }

    pub fn set_processor(&self, processor: Arc<dyn RevisionProcessor>) {
        *self.processor.write() = Some(processor);
    }

    fn state_for(&self, graph_id: &str) -> Arc<Mutex<GraphQueueState>> {
        self.graphs
            .entry(graph_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(GraphQueueState {
                    jobs: VecDeque::new(),
                    draining: false,
                }))
            })
            .clone()
    }

    /// Persist the job row, then hand it to the in-process queue. The row
    /// is written before the in-memory push so a crash between the two
    /// still leaves a `Pending` row for `recover` to pick up on restart;
    /// the reverse order could lose the job entirely.
    pub async fn enqueue(self: &Arc<Self>, job: Job) {
        if let Err(e) = self.jobs.create(&JobRecord::new(&job.graph_id, &job.revision_id)).await {
            error!(
                graph_id = %job.graph_id,
                revision_id = %job.revision_id,
                error = %e,
                "failed to persist revision job, proceeding in-memory only"
            );
        }
        self.dispatch(job).await;
    }

    /// Reload jobs left `Pending`/`Processing` by a previous process and
    /// feed them back into the in-process drain path. Must be called after
    /// `set_processor`, since recovered jobs are dispatched immediately.
    pub async fn recover(self: &Arc<Self>) -> Result<()> {
        let unfinished = self.jobs.list_unfinished().await?;
        for record in unfinished {
            info!(
                graph_id = %record.graph_id,
                revision_id = %record.revision_id,
                attempts = record.attempts,
                "recovering revision job left over from a previous run"
            );
            self.dispatch(Job {
                graph_id: record.graph_id,
                revision_id: record.revision_id,
            })
            .await;
        }
        Ok(())
    }

    /// Push into the per-graph in-memory queue and spawn a drain task if
    /// one isn't already running for this graph.
    async fn dispatch(self: &Arc<Self>, job: Job) {
        let graph_id = job.graph_id.clone();
        let state = self.state_for(&graph_id);

        let should_spawn = {
            let mut guard = state.lock().await;
            guard.jobs.push_back(job);
            if guard.draining {
                false
            } else {
                guard.draining = true;
                true
            }
        };

        if should_spawn {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.drain(graph_id).await;
            });
        }
    }

    async fn drain(self: Arc<Self>, graph_id: String) {
        let state = self.state_for(&graph_id);

        loop {
            let job = {
                let mut guard = state.lock().await;
                match guard.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        guard.draining = false;
                        break;
                    }
                }
            };

            self.process_with_retry(job).await;
        }
    }

    async fn process_with_retry(&self, job: Job) {
        let Some(processor) = self.processor.read().clone() else {
            error!(graph_id = %job.graph_id, "revision queue has no processor registered");
            return;
        };

        if let Err(e) = self.jobs.mark_processing(&job.revision_id).await {
            warn!(graph_id = %job.graph_id, revision_id = %job.revision_id, error = %e, "failed to mark job processing");
        }

        let mut attempt = 0;
        loop {
            match processor.apply(&job.graph_id, &job.revision_id).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(
                            graph_id = %job.graph_id,
                            revision_id = %job.revision_id,
                            attempt,
                            "revision applied after retry"
                        );
                    }
                    if let Err(e) = self.jobs.mark_done(&job.revision_id).await {
                        warn!(graph_id = %job.graph_id, revision_id = %job.revision_id, error = %e, "failed to mark job done");
                    }
                    return;
                }
                Err(e) => {
                    debug!(
                        graph_id = %job.graph_id,
                        revision_id = %job.revision_id,
                        attempt,
                        error = %e,
                        kind = ?e.kind(),
                        "applyRevision attempt failed"
                    );

                    if e.kind() != ErrorKind::Transient || attempt + 1 >= self.policy.max_attempts {
                        if e.kind() == ErrorKind::Transient {
                            error!(
                                graph_id = %job.graph_id,
                                revision_id = %job.revision_id,
                                "exhausted retries, marking revision failed"
                            );
                        }
                        if let Err(persist_err) = self.jobs.mark_failed(&job.revision_id, &e.to_string()).await {
                            warn!(
                                graph_id = %job.graph_id,
                                revision_id = %job.revision_id,
                                error = %persist_err,
                                "failed to persist failed job status"
                            );
                        }
                        processor.mark_failed(&job.graph_id, &job.revision_id, &e).await;
                        return;
                    }

                    let delay = self.policy.backoff_delay(attempt);
                    let next_attempt_at = chrono::Duration::from_std(delay)
                        .map(|d| Utc::now() + d)
                        .unwrap_or_else(|_| Utc::now());
                    if let Err(persist_err) = self
                        .jobs
                        .mark_retry(&job.revision_id, (attempt + 1) as i64, &next_attempt_at.to_rfc3339(), &e.to_string())
                        .await
                    {
                        warn!(
                            graph_id = %job.graph_id,
                            revision_id = %job.revision_id,
                            error = %persist_err,
                            "failed to persist retry state"
                        );
                    }
                    warn!(
                        graph_id = %job.graph_id,
                        revision_id = %job.revision_id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    async fn setup_db() -> Arc<DatabaseConnection> {
        let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE revision_jobs (
                id TEXT PRIMARY KEY, graph_id TEXT NOT NULL, revision_id TEXT NOT NULL,
                status TEXT NOT NULL, attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT NOT NULL, last_error TEXT,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL
            )",
        )
        .execute(db.pool())
        .await
        .unwrap();
        Arc::new(db)
    }

    #[test]
    fn backoff_delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            base: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 5,
            jitter: false,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(8));
    }

    struct RecordingProcessor {
        calls: StdMutex<Vec<String>>,
        fail_until: AtomicUsize,
        done: Notify,
    }

    #[async_trait]
    impl RevisionProcessor for RecordingProcessor {
        async fn apply(&self, graph_id: &str, revision_id: &str) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(format!("{graph_id}/{revision_id}"));
            let remaining = self.fail_until.load(Ordering::SeqCst);
            if calls.iter().filter(|c| *c == &format!("{graph_id}/{revision_id}")).count() <= remaining {
                return Err(EngineError::Database(crate::db::DatabaseError::query_error(
                    "transient",
                )));
            }
            if calls.len() >= 1 {
                self.done.notify_one();
            }
            Ok(())
        }

        async fn mark_failed(&self, _graph_id: &str, _revision_id: &str, _error: &EngineError) {
            self.done.notify_one();
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let processor = Arc::new(RecordingProcessor {
            calls: StdMutex::new(Vec::new()),
            fail_until: AtomicUsize::new(1),
            done: Notify::new(),
        });
        let db = setup_db().await;
        let queue = RevisionQueue::new(
            db,
            RetryPolicy {
                base: Duration::from_millis(1),
                factor: 1.0,
                max_attempts: 5,
                jitter: false,
            },
        );
        queue.set_processor(processor.clone());

        queue
            .enqueue(Job {
                graph_id: "g1".to_string(),
                revision_id: "r1".to_string(),
            })
            .await;

        processor.done.notified().await;
        assert_eq!(processor.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn same_graph_jobs_process_in_fifo_order() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        struct OrderingProcessor {
            order: Arc<StdMutex<Vec<String>>>,
            done: Notify,
        }
        #[async_trait]
        impl RevisionProcessor for OrderingProcessor {
            async fn apply(&self, _graph_id: &str, revision_id: &str) -> Result<()> {
                self.order.lock().unwrap().push(revision_id.to_string());
                if self.order.lock().unwrap().len() == 2 {
                    self.done.notify_one();
                }
                Ok(())
            }
            async fn mark_failed(&self, _graph_id: &str, _revision_id: &str, _error: &EngineError) {}
        }

        let processor = Arc::new(OrderingProcessor {
            order: order.clone(),
            done: Notify::new(),
        });
        let db = setup_db().await;
        let queue = RevisionQueue::new(db, RetryPolicy::default());
        queue.set_processor(processor.clone());

        queue
            .enqueue(Job { graph_id: "g1".to_string(), revision_id: "r1".to_string() })
            .await;
        queue
            .enqueue(Job { graph_id: "g1".to_string(), revision_id: "r2".to_string() })
            .await;

        processor.done.notified().await;
        assert_eq!(*order.lock().unwrap(), vec!["r1".to_string(), "r2".to_string()]);
    }

    #[tokio::test]
    async fn enqueue_persists_a_job_row_that_survives_to_completion() {
        let processor = Arc::new(RecordingProcessor {
            calls: StdMutex::new(Vec::new()),
            fail_until: AtomicUsize::new(0),
            done: Notify::new(),
        });
        let db = setup_db().await;
        let repo = JobRepository::new(db.clone());
        let queue = RevisionQueue::new(db, RetryPolicy::default());
        queue.set_processor(processor.clone());

        queue
            .enqueue(Job { graph_id: "g1".to_string(), revision_id: "r1".to_string() })
            .await;
        processor.done.notified().await;

        // mark_done persists after the notify above fires, so poll briefly
        // rather than assume a single scheduler tick is enough.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if repo.list_unfinished().await.unwrap().is_empty() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job row never reached a terminal status");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn recover_redrives_jobs_left_pending_by_a_previous_run() {
        let processor = Arc::new(RecordingProcessor {
            calls: StdMutex::new(Vec::new()),
            fail_until: AtomicUsize::new(0),
            done: Notify::new(),
        });
        let db = setup_db().await;
        let repo = JobRepository::new(db.clone());
        repo.create(&JobRecord::new("g1", "r1")).await.unwrap();

        let queue = RevisionQueue::new(db, RetryPolicy::default());
        queue.set_processor(processor.clone());
        queue.recover().await.unwrap();

        processor.done.notified().await;
        assert_eq!(*processor.calls.lock().unwrap(), vec!["g1/r1".to_string()]);
    }
}
