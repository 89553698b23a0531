//! Continuous-execution supervisor for units of work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::result::JobResult;
use super::shutdown::{EntryLock, NoopLock};

const ERROR_BACKOFF_FLOOR: Duration = Duration::from_millis(100);

/// Context handed to a job's `run` method.
#[derive(Clone)]
pub struct JobContext {
    /// Fires when the run should stop: outer caller cancellation composed
    /// with the process-wide shutdown token.
    pub cancellation: CancellationToken,
    /// Per-entry lock, renewable by queue jobs; a no-op for plain jobs.
    pub lock: Arc<dyn EntryLock>,
}

impl JobContext {
    /// A context with no lock semantics, for plain (non-queue) jobs.
    #[must_use]
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            lock: Arc::new(NoopLock),
        }
    }
}

/// A unit of work the runner can drive continuously.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Name used in start/iteration log lines.
    fn name(&self) -> &str;

    /// Executes one run of the job's work.
    ///
    /// # Errors
    ///
    /// Any error is captured into `JobResult::Failed` by the runner rather
    /// than propagating.
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

/// Executes `job.run` once, translating cancellation and errors into a
/// [`JobResult`] instead of letting them propagate.
pub async fn try_run(job: &dyn Job, ctx: JobContext) -> JobResult {
    if ctx.cancellation.is_cancelled() {
        return JobResult::cancelled();
    }
    tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => JobResult::cancelled(),
        outcome = job.run(&ctx) => match outcome {
            Ok(()) => JobResult::success(),
            Err(error) => JobResult::Failed { error: error.to_string(), message: None },
        },
    }
}

/// A single loop-driven iteration producing a [`JobResult`].
///
/// Plain [`Job`] implementations get this for free via the blanket impl
/// below, routed through [`try_run`]; [`super::queue_job::QueueJob`]
/// implements it directly since its per-iteration lifecycle produces
/// result variants (e.g. `Success` with a "no entry" message) that don't
/// fit `Job::run`'s plain `Result<()>`.
#[async_trait]
pub trait Iteration: Send + Sync + 'static {
    /// Name used in start/iteration log lines.
    fn name(&self) -> &str;

    /// Runs one iteration, translating cancellation/errors into a result.
    async fn iterate(&self, ctx: JobContext) -> JobResult;
}

#[async_trait]
impl<J: Job> Iteration for J {
    fn name(&self) -> &str {
        Job::name(self)
    }

    async fn iterate(&self, ctx: JobContext) -> JobResult {
        try_run(self, ctx).await
    }
}

/// Called after each iteration; returning `false` stops the loop.
///
/// Exceptions (panics, in this port: errors) in the continuation are logged
/// and ignored -- the loop continues as if it had returned `true`.
#[async_trait]
pub trait Continuation: Send + Sync {
    /// Inspects `result` and decides whether to keep looping.
    async fn should_continue(&self, result: &JobResult) -> anyhow::Result<bool>;
}

/// Options accepted by [`run_continuous`].
#[derive(Clone, Default)]
pub struct RunContinuousOptions {
    /// Delay between successful iterations.
    pub interval: Option<Duration>,
    /// Stops after this many iterations if `> 0`.
    pub iteration_limit: Option<u64>,
    /// Optional continuation callback, checked after every iteration.
    pub continuation: Option<Arc<dyn Continuation>>,
}

/// Drives `item` in a loop until cancellation, the iteration limit, or the
/// continuation callback stops it. Returns the number of iterations run.
pub async fn run_continuous<T: Iteration>(
    item: &T,
    cancellation: CancellationToken,
    options: RunContinuousOptions,
) -> u64 {
    info!(job = item.name(), "starting continuous job run");
    let mut iterations = 0_u64;

    loop {
        let ctx = JobContext::new(cancellation.clone());
        let result = item.iterate(ctx).await;
        info!(job = item.name(), result = %result, "job iteration completed");

        iterations += 1;
        if let Some(limit) = options.iteration_limit {
            if limit > 0 && iterations >= limit {
                break;
            }
        }
        if result.is_cancelled() {
            break;
        }

        if result.is_failed() {
            let backoff = options.interval.unwrap_or(ERROR_BACKOFF_FLOOR).max(ERROR_BACKOFF_FLOOR);
            tokio::time::sleep(backoff).await;
        } else if let Some(interval) = options.interval {
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        tokio::task::yield_now().await;

        if let Some(continuation) = &options.continuation {
            match continuation.should_continue(&result).await {
                Ok(false) => break,
                Ok(true) => {}
                Err(error) => warn!(job = item.name(), %error, "continuation callback failed, continuing"),
            }
        }

        if cancellation.is_cancelled() {
            break;
        }
    }

    iterations
}

/// Spawns `instance_count` independent continuous loops, each built from
/// `factory`, and awaits them all. Returns the total iteration count summed
/// across instances.
pub async fn run_continuous_multi_instance<T, F>(
    factory: F,
    instance_count: usize,
    cancellation: CancellationToken,
    options: RunContinuousOptions,
) -> u64
where
    T: Iteration,
    F: Fn() -> T,
{
    let total = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(instance_count);

    for _ in 0..instance_count.max(1) {
        let job = factory();
        let cancellation = cancellation.clone();
        let options = options.clone();
        let total = Arc::clone(&total);
        handles.push(tokio::spawn(async move {
            let count = run_continuous(&job, cancellation, options).await;
            total.fetch_add(count, Ordering::Relaxed);
        }));
    }

    for handle in handles {
        if let Err(error) = handle.await {
            warn!(%error, "job instance task panicked");
        }
    }

    total.load(Ordering::Relaxed)
}
