//! Process-wide shutdown signal, composing interactive interrupts with an
//! environment-specified shutdown file.
//!
//! A single linked cancellation token a continuous loop can select against,
//! rather than a full HTTP health-state machine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Env var naming a file whose creation or modification triggers shutdown.
pub const SHUTDOWN_FILE_ENV: &str = "WEBJOBS_SHUTDOWN_FILE";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The process-wide shutdown token.
///
/// Lazily initialized on first access: the `ctrl_c` listener and, if
/// `WEBJOBS_SHUTDOWN_FILE` is set, the file-watcher poll loop, are both
/// spawned the first time [`ShutdownToken::global`] is called.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    token: CancellationToken,
}

static GLOBAL: OnceCell<ShutdownToken> = OnceCell::const_new();

impl ShutdownToken {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns the lazily-initialized, process-wide shutdown token.
    ///
    /// Must be called from within a Tokio runtime the first time, since it
    /// spawns the background listeners.
    pub async fn global() -> Self {
        GLOBAL
            .get_or_init(|| async {
                let token = Self::new();
                token.clone().install_ctrl_c_listener();
                token.clone().install_shutdown_file_watcher();
                token
            })
            .await
            .clone()
    }

    /// A token linking this one with additional parent signals: firing any
    /// parent, or this token directly, cancels the returned child.
    #[must_use]
    pub fn linked_with(&self, others: &[CancellationToken]) -> CancellationToken {
        let child = self.token.child_token();
        for other in others {
            let child = child.clone();
            let other = other.clone();
            tokio::spawn(async move {
                other.cancelled().await;
                child.cancel();
            });
        }
        child
    }

    /// `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The underlying composable cancellation primitive.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Triggers shutdown directly (mainly for tests).
    pub fn trigger(&self) {
        self.token.cancel();
    }

    fn install_ctrl_c_listener(self) {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown token triggered by interactive interrupt");
                self.token.cancel();
            }
        });
    }

    fn install_shutdown_file_watcher(self) {
        let Ok(path) = std::env::var(SHUTDOWN_FILE_ENV) else {
            return;
        };
        let path = PathBuf::from(path);
        tokio::spawn(async move {
            let mut last_seen = file_stamp(&path);
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                if self.token.is_cancelled() {
                    return;
                }
                let current = file_stamp(&path);
                if current.is_some() && current != last_seen {
                    info!(path = %path.display(), "shutdown token triggered by shutdown file");
                    self.token.cancel();
                    return;
                }
                last_seen = current;
            }
        });
    }
}

fn file_stamp(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A lock handle a job's `GetQueueEntryLock` hook returns.
///
/// The default implementation is a no-op that always succeeds and never
/// expires, matching the source's default behavior for plain (non-queue)
/// jobs that never override locking.
#[async_trait::async_trait]
pub trait EntryLock: Send + Sync {
    /// Releases the lock. Always invoked, even on failure paths.
    async fn release(&self);
}

/// The default no-op lock.
pub struct NoopLock;

#[async_trait::async_trait]
impl EntryLock for NoopLock {
    async fn release(&self) {}
}
