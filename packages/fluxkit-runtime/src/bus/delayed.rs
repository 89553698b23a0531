//! Delayed-message bookkeeping for the bus's background scheduler.

use std::any::TypeId;

use super::message::PublishOptions;

/// A slack window applied when draining delayed messages: all messages due
/// within the next 50ms are delivered together in one batch.
pub const DELIVERY_SLACK_MILLIS: i64 = 50;

/// A message pending publication, held only in the publishing process.
#[derive(Debug, Clone)]
pub struct DelayedMessage {
    /// `TypeId` of the original message type, preserved so the deferred
    /// dispatch can still reach `TypeId`-keyed typed subscribers.
    pub type_id: TypeId,
    /// Wire type name to publish under.
    pub type_name: String,
    /// Serializer-encoded payload.
    pub payload: Vec<u8>,
    /// The options the message was originally published with (minus delay).
    pub options: PublishOptions,
    /// Absolute epoch-millis time at which the message becomes eligible.
    pub send_at: i64,
}

/// Partitions `pending` into `(due, still_pending)`: messages whose
/// `send_at <= now + DELIVERY_SLACK_MILLIS` versus the rest.
///
/// `still_pending` is left in its original relative order; `due` is sorted
/// by `send_at` so earlier-due messages publish first within the batch.
#[must_use]
pub fn drain_due(pending: Vec<DelayedMessage>, now: i64) -> (Vec<DelayedMessage>, Vec<DelayedMessage>) {
    let cutoff = now + DELIVERY_SLACK_MILLIS;
    let (mut due, still_pending): (Vec<_>, Vec<_>) =
        pending.into_iter().partition(|m| m.send_at <= cutoff);
    due.sort_by_key(|m| m.send_at);
    (due, still_pending)
}

/// The earliest `send_at` among `pending`, if any.
#[must_use]
pub fn earliest_send_at(pending: &[DelayedMessage]) -> Option<i64> {
    pending.iter().map(|m| m.send_at).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(send_at: i64) -> DelayedMessage {
        DelayedMessage {
            type_id: TypeId::of::<()>(),
            type_name: "T".to_string(),
            payload: vec![],
            options: PublishOptions::default(),
            send_at,
        }
    }

    #[test]
    fn drain_due_splits_on_slack_boundary() {
        let pending = vec![msg(100), msg(140), msg(500)];
        let (due, still_pending) = drain_due(pending, 100);
        assert_eq!(due.len(), 2);
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].send_at, 500);
    }

    #[test]
    fn drain_due_orders_batch_by_send_at() {
        let pending = vec![msg(140), msg(100)];
        let (due, _) = drain_due(pending, 100);
        assert_eq!(due[0].send_at, 100);
        assert_eq!(due[1].send_at, 140);
    }

    #[test]
    fn earliest_send_at_of_empty_is_none() {
        assert_eq!(earliest_send_at(&[]), None);
    }
}
