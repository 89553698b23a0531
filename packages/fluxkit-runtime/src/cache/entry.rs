//! Stored value plus the metadata the engine needs for eviction and expiry.

/// A single entry held by [`super::engine::CacheEngine`].
///
/// Splits the opaque payload from the server-internal metadata needed for
/// eviction and expiry: an absolute expiry instead of a dirty bit, and the
/// insertion sequence used as an eviction tiebreaker.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Opaque, serializer-encoded payload.
    pub payload: Vec<u8>,
    /// Absolute expiry in epoch millis. `None` means the entry never expires.
    pub expires_at: Option<i64>,
    /// Epoch millis of the last read access. Eviction tiebreaker input.
    pub last_access: i64,
    /// Epoch millis of the last write.
    pub last_modified: i64,
    /// Monotonic insertion sequence, assigned from a process-wide counter.
    pub sequence: u64,
}

impl CacheEntry {
    /// Creates a freshly written entry: `last_access == last_modified == now`.
    #[must_use]
    pub fn new(payload: Vec<u8>, now: i64, expires_at: Option<i64>, sequence: u64) -> Self {
        Self {
            payload,
            expires_at,
            last_access: now,
            last_modified: now,
            sequence,
        }
    }

    /// `true` if `now >= expires_at`. Entries with no expiry never expire.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Records a read access.
    pub fn touch(&mut self, now: i64) {
        self.last_access = now;
    }

    /// The `(last_access, sequence)` key eviction minimizes over.
    #[must_use]
    pub fn eviction_key(&self) -> (i64, u64) {
        (self.last_access, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_matching_access_and_modified_times() {
        let entry = CacheEntry::new(vec![1, 2, 3], 1_000, Some(2_000), 7);
        assert_eq!(entry.last_access, 1_000);
        assert_eq!(entry.last_modified, 1_000);
        assert_eq!(entry.sequence, 7);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let entry = CacheEntry::new(vec![], 0, Some(1_000), 0);
        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));
        assert!(entry.is_expired(1_001));
    }

    #[test]
    fn no_expiry_never_expires() {
        let entry = CacheEntry::new(vec![], 0, None, 0);
        assert!(!entry.is_expired(i64::MAX));
    }

    #[test]
    fn touch_updates_last_access_only() {
        let mut entry = CacheEntry::new(vec![], 0, None, 0);
        entry.touch(500);
        assert_eq!(entry.last_access, 500);
        assert_eq!(entry.last_modified, 0);
    }
}
