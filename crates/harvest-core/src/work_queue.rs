//! Lock-free work queue over a candidate ID range

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::checkpoint::CandidateId;

/// Lazy, lock-free queue distributing IDs of a half-open range to workers.
///
/// Nothing is materialized: workers claim the next ID with an atomic
/// cursor and IDs rejected by `keep` (already processed) are skipped.
pub struct WorkQueue<F> {
    range: Range<CandidateId>,
    cursor: AtomicU64,
    keep: F,
}

impl<F> WorkQueue<F>
where
    F: Fn(CandidateId) -> bool + Sync,
{
    /// Create queue over `range`, yielding only IDs that pass `keep` (resume support)
    pub fn filtered(range: Range<CandidateId>, keep: F) -> Self {
        Self {
            cursor: AtomicU64::new(range.start),
            range,
            keep,
        }
    }

    /// Get next ID to process (lock-free)
    pub fn next(&self) -> Option<CandidateId> {
        loop {
            let id = self.cursor.fetch_add(1, Ordering::Relaxed);
            if id >= self.range.end {
                // Park the cursor so repeated calls cannot wrap around
                self.cursor.store(self.range.end, Ordering::Relaxed);
                return None;
            }
            if (self.keep)(id) {
                return Some(id);
            }
        }
    }

    /// Size of the underlying range
    pub fn range_len(&self) -> u64 {
        self.range.end.saturating_sub(self.range.start)
    }
}
