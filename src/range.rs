//! ID range enumeration and the shared dispatch cursor

use crate::error::{Error, Result};
use crate::types::SkinId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Inclusive, non-empty range of positive IDs
///
/// # Examples
///
/// ```
/// use skin_dl::range::IdRange;
///
/// let range = IdRange::new(3, 6).unwrap();
/// let ids: Vec<u64> = range.iter().map(|id| id.get()).collect();
/// assert_eq!(ids, vec![3, 4, 5, 6]);
///
/// assert!(IdRange::new(6, 3).is_err());
/// assert!(IdRange::new(0, 3).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    start: u64,
    end: u64,
}

impl IdRange {
    /// Validate and build a range; both bounds must be positive and `start <= end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start <= 0 || end <= 0 || start > end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self {
            start: start as u64,
            end: end as u64,
        })
    }

    /// First ID
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last ID (inclusive)
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of IDs in the range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Ascending iterator over the range; each call starts over
    pub fn iter(&self) -> impl Iterator<Item = SkinId> + use<> {
        (self.start..=self.end).map(SkinId)
    }

    /// Fresh cursor that dispatches each ID of the range exactly once
    pub fn cursor(&self) -> IdCursor {
        IdCursor {
            range: *self,
            dispatched: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Display for IdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Lock-free, shared source of IDs for the worker pool
///
/// Each call to [`IdCursor::next`] hands out the next undispatched ID in
/// ascending order. Concurrent callers never receive the same ID and no ID is
/// skipped.
#[derive(Debug)]
pub struct IdCursor {
    range: IdRange,
    /// Number of IDs handed out so far
    dispatched: AtomicU64,
}

impl IdCursor {
    /// Claim the next ID, or `None` once the range is exhausted
    pub fn next(&self) -> Option<SkinId> {
        let len = self.range.len();
        self.dispatched
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < len).then_some(n + 1)
            })
            .ok()
            .map(|offset| SkinId(self.range.start + offset))
    }

    /// How many IDs have been handed out
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }

    /// The IDs never handed out, as a contiguous tail of the range
    pub fn remaining(&self) -> Option<IdRange> {
        let dispatched = self.dispatched();
        if dispatched >= self.range.len() {
            return None;
        }
        Some(IdRange {
            start: self.range.start + dispatched,
            end: self.range.end,
        })
    }
}
