//! Correlation-id propagation for messages travelling through the bus.
//!
//! A small task-local context so a `Publish` call that omits a correlation
//! id can inherit one from the current distributed-trace scope, per the
//! bus's publish contract.

use std::cell::RefCell;

tokio::task_local! {
    static CURRENT_CORRELATION_ID: RefCell<Option<String>>;
}

/// Runs `f` with `correlation_id` set as the ambient correlation id for any
/// `Publish` call made within it that does not supply one explicitly.
pub async fn with_correlation_id<F, Fut, R>(correlation_id: impl Into<String>, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    CURRENT_CORRELATION_ID
        .scope(RefCell::new(Some(correlation_id.into())), f())
        .await
}

/// Returns the ambient correlation id, if one is set for the current task.
#[must_use]
pub fn current_correlation_id() -> Option<String> {
    CURRENT_CORRELATION_ID
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or(None)
}
