//! Queue-job supervisor: processes entries dequeued one at a time from a
//! queue collaborator, with per-entry locking and auto-complete/abandon.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use super::result::JobResult;
use super::runner::{Continuation, Iteration, JobContext, RunContinuousOptions};
use super::shutdown::{EntryLock, NoopLock};

/// Upper bound on a single dequeue wait, per the per-iteration lifecycle
/// below.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors a [`QueueCollaborator`] implementation can surface.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The driver failed to dequeue or acknowledge an entry.
    #[error("queue driver error: {0}")]
    Driver(String),
}

/// Point-in-time queue depth, used by [`QueueJobRunner::run_until_empty`]'s
/// continuation to decide whether more work remains.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Entries waiting to be dequeued.
    pub queued: usize,
    /// Entries dequeued but not yet completed or abandoned.
    pub working: usize,
}

/// Whether a dequeued entry has been resolved by the handler, and how.
/// Tracked so the supervisor's auto-complete step can skip entries the
/// handler already resolved, and test assertions can distinguish completed
/// from abandoned sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Completed,
    Abandoned,
}

/// Operations a queue implementation provides for a dequeued entry.
#[async_trait]
pub trait QueueEntryOps: Send + Sync {
    /// Acknowledges successful processing.
    async fn complete(&self, id: &str) -> Result<(), QueueError>;

    /// Returns the entry to the queue (or dead-letters it) after a failed or
    /// skipped processing attempt.
    async fn abandon(&self, id: &str) -> Result<(), QueueError>;

    /// Extends the entry's processing lease.
    async fn renew_lock(&self, id: &str) -> Result<(), QueueError> {
        let _ = id;
        Ok(())
    }
}

/// A unit of work dequeued from a [`QueueCollaborator`].
///
/// `Complete`/`Abandon` are idempotent: only the first call reaches the
/// queue driver, matching the supervisor's "don't double-resolve an entry
/// the handler already resolved" rule.
pub struct QueueEntry<T> {
    id: String,
    /// The dequeued payload.
    pub value: T,
    /// How many times this entry has been dequeued (including this attempt).
    pub attempts: u32,
    ops: Arc<dyn QueueEntryOps>,
    state: Mutex<EntryState>,
}

impl<T> QueueEntry<T> {
    /// Wraps a dequeued `value` with the driver-provided completion hooks.
    #[must_use]
    pub fn new(id: impl Into<String>, value: T, attempts: u32, ops: Arc<dyn QueueEntryOps>) -> Self {
        Self {
            id: id.into(),
            value,
            attempts,
            ops,
            state: Mutex::new(EntryState::Pending),
        }
    }

    /// The entry's queue-assigned identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acknowledges successful processing. A no-op if already resolved.
    pub async fn complete(&self) -> Result<(), QueueError> {
        if !self.try_resolve(EntryState::Completed) {
            return Ok(());
        }
        self.ops.complete(&self.id).await
    }

    /// Abandons the entry. A no-op if already resolved.
    pub async fn abandon(&self) -> Result<(), QueueError> {
        if !self.try_resolve(EntryState::Abandoned) {
            return Ok(());
        }
        self.ops.abandon(&self.id).await
    }

    /// Extends the processing lease without resolving the entry.
    pub async fn renew_lock(&self) -> Result<(), QueueError> {
        self.ops.renew_lock(&self.id).await
    }

    /// `true` if the handler has not yet called `complete` or `abandon`.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        *self.state.lock() == EntryState::Pending
    }

    /// `true` if this entry was abandoned.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        *self.state.lock() == EntryState::Abandoned
    }

    /// `true` if this entry was completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        *self.state.lock() == EntryState::Completed
    }

    fn try_resolve(&self, to: EntryState) -> bool {
        let mut state = self.state.lock();
        if *state != EntryState::Pending {
            return false;
        }
        *state = to;
        true
    }
}

/// The external queue interface a [`QueueJob`] dequeues from.
#[async_trait]
pub trait QueueCollaborator<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Waits up to `timeout` for an entry, returning `None` if none arrives.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueueEntry<T>>, QueueError>;

    /// Current queued/working counts.
    async fn stats(&self) -> QueueStats;
}

/// Reference in-process [`QueueCollaborator`], in the spirit of the cache
/// engine's bundled [`fluxkit_core::JsonSerializer`] default: enough to
/// exercise and test the supervisor without an external broker.
pub struct InMemoryQueue<T> {
    inner: Mutex<InMemoryQueueState<T>>,
    notify: Notify,
    self_weak: Weak<InMemoryQueue<T>>,
}

struct InMemoryQueueState<T> {
    pending: VecDeque<(String, T)>,
    working: HashSet<String>,
    completed: HashSet<String>,
    abandoned: HashSet<String>,
    attempts: std::collections::HashMap<String, u32>,
}

impl<T> InMemoryQueue<T> {
    /// An empty queue, returned pre-wrapped in `Arc` since dequeued entries
    /// need to hold a strong reference back to the queue for their
    /// `complete`/`abandon` hooks.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(InMemoryQueueState {
                pending: VecDeque::new(),
                working: HashSet::new(),
                completed: HashSet::new(),
                abandoned: HashSet::new(),
                attempts: std::collections::HashMap::new(),
            }),
            notify: Notify::new(),
            self_weak: weak.clone(),
        })
    }

    /// Enqueues `value`, returning the id it was assigned.
    pub fn enqueue(&self, value: T) -> String {
        let id = Uuid::new_v4().to_string();
        {
            let mut state = self.inner.lock();
            state.pending.push_back((id.clone(), value));
        }
        self.notify.notify_one();
        id
    }

    /// Ids completed so far, for test assertions.
    #[must_use]
    pub fn completed_ids(&self) -> HashSet<String> {
        self.inner.lock().completed.clone()
    }

    /// Ids abandoned so far, for test assertions.
    #[must_use]
    pub fn abandoned_ids(&self) -> HashSet<String> {
        self.inner.lock().abandoned.clone()
    }
}

#[async_trait]
impl<T> QueueCollaborator<T> for InMemoryQueue<T>
where
    T: Send + Sync + 'static,
{
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueueEntry<T>>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let popped = {
                let mut state = self.inner.lock();
                state.pending.pop_front()
            };
            if let Some((id, value)) = popped {
                let attempts = {
                    let mut state = self.inner.lock();
                    state.working.insert(id.clone());
                    let entry = state.attempts.entry(id.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                let queue = self.self_weak.upgrade().expect("queue outlives its own dequeued entries");
                let ops: Arc<dyn QueueEntryOps> = Arc::new(InMemoryEntryOps { queue });
                return Ok(Some(QueueEntry::new(id, value, attempts, ops)));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(deadline - now) => return Ok(None),
            }
        }
    }

    async fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            queued: state.pending.len(),
            working: state.working.len(),
        }
    }
}

struct InMemoryEntryOps<T> {
    queue: Arc<InMemoryQueue<T>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> QueueEntryOps for InMemoryEntryOps<T> {
    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.queue.inner.lock();
        state.working.remove(id);
        state.completed.insert(id.to_string());
        Ok(())
    }

    async fn abandon(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.queue.inner.lock();
        state.working.remove(id);
        state.abandoned.insert(id.to_string());
        Ok(())
    }
}

/// A unit of work processed one queue entry at a time.
#[async_trait]
pub trait QueueJob<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Name used in start/iteration log lines.
    fn name(&self) -> &str;

    /// Whether the supervisor auto-resolves the entry after processing.
    /// Defaults to `true`.
    fn auto_complete(&self) -> bool {
        true
    }

    /// Upper bound on a single dequeue wait. Defaults to 30s, but overridable
    /// so tests driving `run_until_empty` against an in-memory queue don't
    /// block out the full window on the trailing empty check.
    fn dequeue_timeout(&self) -> Duration {
        DEQUEUE_TIMEOUT
    }

    /// Acquires a per-entry lock before processing. The default is a no-op
    /// lock that always succeeds, matching plain jobs that never override
    /// locking.
    async fn get_queue_entry_lock(&self, _entry: &QueueEntry<T>) -> Option<Arc<dyn EntryLock>> {
        Some(Arc::new(NoopLock))
    }

    /// Processes one dequeued entry.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed processing attempt; if
    /// `auto_complete` is set and the entry is still pending, it is
    /// abandoned.
    async fn process_queue_entry(
        &self,
        entry: &QueueEntry<T>,
        ctx: &JobContext,
    ) -> anyhow::Result<()>;
}

/// Drives a [`QueueJob`] against entries dequeued from a [`QueueCollaborator`].
pub struct QueueJobRunner<Q, J, T> {
    queue: Arc<Q>,
    job: J,
    processed: AtomicUsize,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<Q, J, T> QueueJobRunner<Q, J, T>
where
    Q: QueueCollaborator<T>,
    J: QueueJob<T>,
    T: Send + Sync + 'static,
{
    /// Builds a supervisor over `queue` running `job`.
    #[must_use]
    pub fn new(queue: Arc<Q>, job: J) -> Self {
        Self {
            queue,
            job,
            processed: AtomicUsize::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    /// Count of entries that completed successfully so far.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Wraps `run_continuous` with a 1ms interval and a continuation that
    /// stops once the queue reports no queued or working entries.
    pub async fn run_until_empty(
        self: Arc<Self>,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> u64 {
        let options = RunContinuousOptions {
            interval: Some(Duration::from_millis(1)),
            iteration_limit: None,
            continuation: Some(Arc::new(StopWhenEmpty {
                queue: Arc::clone(&self.queue),
                _marker: std::marker::PhantomData,
            })),
        };
        super::runner::run_continuous(self.as_ref(), cancellation, options).await
    }

    async fn run_one_iteration(&self, ctx: JobContext) -> JobResult {
        let entry = match self.queue.dequeue(self.job.dequeue_timeout()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return JobResult::success_with_message("no entry"),
            Err(error) => return JobResult::Failed { error: error.to_string(), message: None },
        };

        if ctx.cancellation.is_cancelled() {
            if let Err(error) = entry.abandon().await {
                warn!(job = self.job.name(), %error, "failed to abandon entry on pre-cancelled iteration");
            }
            return JobResult::cancelled_with_message("cancellation requested before processing");
        }

        let Some(lock) = self.job.get_queue_entry_lock(&entry).await else {
            if let Err(error) = entry.abandon().await {
                warn!(job = self.job.name(), %error, "failed to abandon entry after lock acquisition failure");
            }
            return JobResult::cancelled_with_message("failed to acquire queue entry lock");
        };

        let entry_ctx = JobContext {
            cancellation: ctx.cancellation.clone(),
            lock: Arc::clone(&lock),
        };

        let outcome = self.job.process_queue_entry(&entry, &entry_ctx).await;
        lock.release().await;

        let result = match outcome {
            Ok(()) => JobResult::success(),
            Err(error) => JobResult::Failed { error: error.to_string(), message: None },
        };

        if self.job.auto_complete() && entry.is_pending() {
            match &result {
                JobResult::Success { .. } => {
                    if let Err(error) = entry.complete().await {
                        warn!(job = self.job.name(), %error, "failed to complete queue entry");
                    }
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    if let Err(error) = entry.abandon().await {
                        warn!(job = self.job.name(), %error, "failed to abandon queue entry");
                    }
                    warn!(job = self.job.name(), result = %result, "queue entry abandoned after non-success result");
                }
            }
        } else if result.is_success() {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }

        result
    }
}

#[async_trait]
impl<Q, J, T> Iteration for QueueJobRunner<Q, J, T>
where
    Q: QueueCollaborator<T> + 'static,
    J: QueueJob<T>,
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.job.name()
    }

    async fn iterate(&self, ctx: JobContext) -> JobResult {
        self.run_one_iteration(ctx).await
    }
}

struct StopWhenEmpty<Q, T> {
    queue: Arc<Q>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[async_trait]
impl<Q: QueueCollaborator<T>, T: Send + Sync + 'static> Continuation for StopWhenEmpty<Q, T> {
    async fn should_continue(&self, _result: &JobResult) -> anyhow::Result<bool> {
        let stats = self.queue.stats().await;
        Ok(stats.queued + stats.working > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct Echo {
        fail_ids: HashSet<String>,
    }

    #[async_trait]
    impl QueueJob<String> for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn dequeue_timeout(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn process_queue_entry(
            &self,
            entry: &QueueEntry<String>,
            _ctx: &JobContext,
        ) -> anyhow::Result<()> {
            if self.fail_ids.contains(entry.value.as_str()) {
                anyhow::bail!("deliberate failure for {}", entry.value);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_until_empty_auto_completes_and_abandons() {
        let queue = InMemoryQueue::<String>::new();
        let id1 = queue.enqueue("e1".to_string());
        let id2 = queue.enqueue("e2".to_string());
        let id3 = queue.enqueue("e3".to_string());

        let job = Echo {
            fail_ids: ["e2".to_string()].into_iter().collect(),
        };
        let runner = Arc::new(QueueJobRunner::new(Arc::clone(&queue), job));

        runner
            .clone()
            .run_until_empty(CancellationToken::new())
            .await;

        let completed = queue.completed_ids();
        let abandoned = queue.abandoned_ids();
        assert!(completed.contains(&id1));
        assert!(completed.contains(&id3));
        assert!(abandoned.contains(&id2));
        assert_eq!(runner.processed_count(), 2);
    }

    #[tokio::test]
    async fn empty_queue_dequeue_times_out_to_none() {
        let queue = InMemoryQueue::<String>::new();
        let result = queue.dequeue(Duration::from_millis(5)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn pre_cancelled_iteration_abandons_the_entry() {
        let queue = InMemoryQueue::<String>::new();
        let id = queue.enqueue("only".to_string());
        let job = Echo { fail_ids: HashSet::new() };
        let runner = QueueJobRunner::new(Arc::clone(&queue), job);

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let ctx = JobContext::new(cancellation);
        let result = runner.run_one_iteration(ctx).await;

        assert!(result.is_cancelled());
        assert!(queue.abandoned_ids().contains(&id));
    }
}
