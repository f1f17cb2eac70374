//! Stream cuts: one offset per segment.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use cutpoint_core::{LogName, Offset, SegmentId};

/// A completed, immutable position per segment of one log.
///
/// A cut produced by a checkpoint round covers exactly the segments that
/// were assigned when the round started. Cuts carry no cross-segment
/// ordering: the offset of one segment may correspond to a later write
/// than the offset of another.
///
/// Two cuts are comparable only if they cover the same log and the same
/// segment set; `a <= b` iff every offset in `a` is `<=` the matching
/// offset in `b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCut {
    log: LogName,
    positions: BTreeMap<SegmentId, Offset>,
}

impl StreamCut {
    /// Creates a cut from explicit positions.
    #[must_use]
    pub const fn new(log: LogName, positions: BTreeMap<SegmentId, Offset>) -> Self {
        Self { log, positions }
    }

    /// Creates a cut from `(segment, offset)` pairs.
    #[must_use]
    pub fn from_pairs(log: LogName, pairs: impl IntoIterator<Item = (SegmentId, Offset)>) -> Self {
        Self::new(log, pairs.into_iter().collect())
    }

    /// Returns the log this cut covers.
    #[must_use]
    pub const fn log(&self) -> &LogName {
        &self.log
    }

    /// Returns the offset for a segment, if covered.
    #[must_use]
    pub fn get(&self, segment_id: SegmentId) -> Option<Offset> {
        self.positions.get(&segment_id).copied()
    }

    /// Returns the covered segments in id order.
    pub fn segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.positions.keys().copied()
    }

    /// Returns `(segment, offset)` pairs in segment id order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, Offset)> + '_ {
        self.positions.iter().map(|(s, o)| (*s, *o))
    }

    /// Returns the positions map.
    #[must_use]
    pub const fn positions(&self) -> &BTreeMap<SegmentId, Offset> {
        &self.positions
    }

    /// Returns the number of covered segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if the cut covers no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns true if both cuts cover the same log and segment set.
    #[must_use]
    pub fn is_comparable_with(&self, other: &Self) -> bool {
        self.log == other.log && self.positions.keys().eq(other.positions.keys())
    }
}

impl PartialOrd for StreamCut {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.is_comparable_with(other) {
            return None;
        }

        let mut all_le = true;
        let mut all_ge = true;
        for (a, b) in self.positions.values().zip(other.positions.values()) {
            all_le &= a <= b;
            all_ge &= a >= b;
        }

        match (all_le, all_ge) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl fmt::Display for StreamCut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.log)?;
        for (i, (segment, offset)) in self.positions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", segment.get(), offset)?;
        }
        write!(f, "}}")
    }
}
