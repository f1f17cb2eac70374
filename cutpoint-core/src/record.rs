//! Offsets and records.
//!
//! Records are opaque to cutpoint: serialization is owned by the writer
//! and the reader application. The only structure cutpoint relies on is
//! the `(segment, offset)` address assigned by the partition log.

use bytes::Bytes;

use crate::SegmentId;

/// Offset in a segment.
///
/// Offsets address record positions: offset `n` is the `n`-th record
/// ever appended to the segment. A read position of `n` means records
/// `0..n` have been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the offset for "earliest" (beginning of segment).
    #[must_use]
    pub const fn earliest() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// A single record read from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Segment the record was read from.
    pub segment_id: SegmentId,
    /// Offset of the record within its segment.
    pub offset: Offset,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Record {
    /// Creates a new record.
    #[must_use]
    pub fn new(segment_id: SegmentId, offset: Offset, payload: impl Into<Bytes>) -> Self {
        Self {
            segment_id,
            offset,
            payload: payload.into(),
        }
    }

    /// Returns the read position just past this record.
    #[must_use]
    pub const fn next_offset(&self) -> Offset {
        self.offset.next()
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_ordering() {
        assert!(Offset::new(1) < Offset::new(2));
        assert_eq!(Offset::earliest(), Offset::new(0));
        assert_eq!(Offset::new(u64::MAX).next(), Offset::new(u64::MAX));
    }

    #[test]
    fn test_record_next_offset() {
        let record = Record::new(SegmentId::new(3), Offset::new(9), "hello");
        assert_eq!(record.next_offset(), Offset::new(10));
        assert_eq!(record.size(), 5);
        assert_eq!(record.segment_id, SegmentId::new(3));
    }
}
