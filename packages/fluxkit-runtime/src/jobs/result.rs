//! Tri-state outcome reported by a single job run.

use std::fmt;

/// Outcome of a single `TryRun` invocation.
#[derive(Debug, Clone)]
pub enum JobResult {
    /// The run completed normally.
    Success {
        /// Optional human-readable detail (e.g. "no entry" for an empty dequeue).
        message: Option<String>,
    },
    /// The run was cancelled before completing.
    Cancelled {
        /// Optional explanation for why cancellation happened.
        message: Option<String>,
    },
    /// The run failed.
    Failed {
        /// The error that caused the failure.
        error: String,
        /// Optional additional context.
        message: Option<String>,
    },
}

impl JobResult {
    /// A successful run with no detail message.
    #[must_use]
    pub fn success() -> Self {
        Self::Success { message: None }
    }

    /// A successful run annotated with `message`.
    #[must_use]
    pub fn success_with_message(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
        }
    }

    /// A cancelled run with no detail message.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Cancelled { message: None }
    }

    /// A cancelled run annotated with `message`.
    #[must_use]
    pub fn cancelled_with_message(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: Some(message.into()),
        }
    }

    /// Captures `error` into a failed result.
    #[must_use]
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self::Failed {
            error: error.to_string(),
            message: None,
        }
    }

    /// `true` if this result is [`JobResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// `true` if this result is [`JobResult::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// `true` if this result is [`JobResult::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { message: Some(m) } => write!(f, "success: {m}"),
            Self::Success { message: None } => write!(f, "success"),
            Self::Cancelled { message: Some(m) } => write!(f, "cancelled: {m}"),
            Self::Cancelled { message: None } => write!(f, "cancelled"),
            Self::Failed { error, message: Some(m) } => write!(f, "failed: {error} ({m})"),
            Self::Failed { error, message: None } => write!(f, "failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_reports_is_success() {
        let result = JobResult::success();
        assert!(result.is_success());
        assert!(!result.is_failed());
        assert!(!result.is_cancelled());
    }

    #[test]
    fn from_error_captures_message() {
        let error = anyhow::anyhow!("boom");
        let result = JobResult::from_error(&error);
        assert!(result.is_failed());
        assert_eq!(result.to_string(), "failed: boom");
    }

    #[test]
    fn display_includes_detail_message() {
        let result = JobResult::cancelled_with_message("outer token fired");
        assert_eq!(result.to_string(), "cancelled: outer token fired");
    }
}
