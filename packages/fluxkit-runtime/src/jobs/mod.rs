//! Continuous-execution job runner and the queue-job supervisor.

pub mod queue_job;
pub mod result;
pub mod runner;
pub mod shutdown;

pub use queue_job::{
    InMemoryQueue, QueueCollaborator, QueueEntry, QueueEntryOps, QueueError, QueueJob,
    QueueJobRunner, QueueStats,
};
pub use result::JobResult;
pub use runner::{
    run_continuous, run_continuous_multi_instance, try_run, Continuation, Iteration, Job,
    JobContext, RunContinuousOptions,
};
pub use shutdown::{EntryLock, NoopLock, ShutdownToken, SHUTDOWN_FILE_ENV};
