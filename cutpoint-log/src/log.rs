//! Partition log collaborator traits.

use async_trait::async_trait;
use bytes::Bytes;
use cutpoint_core::{LogName, Offset, Record, SegmentId};

use crate::error::LogResult;

// -----------------------------------------------------------------------------
// Partition Log
// -----------------------------------------------------------------------------

/// Access to the segments of a partitioned, append-only log.
///
/// Each segment is an independently growing sequence of records addressed
/// by offset. Implementations must preserve per-segment order; nothing is
/// assumed across segments.
#[async_trait]
pub trait PartitionLog: Send + Sync {
    /// Appends a record to a segment and returns its offset.
    ///
    /// Writer-side operation; the reader group never calls it.
    async fn append(&self, log: &LogName, segment_id: SegmentId, payload: Bytes)
        -> LogResult<Offset>;

    /// Reads the record at `offset`.
    ///
    /// Returns `None` when `offset` is at or past the write offset
    /// (end of available data). Returns `LogError::Truncated` when
    /// `offset` lies below the segment's truncation point.
    async fn read_from(
        &self,
        log: &LogName,
        segment_id: SegmentId,
        offset: Offset,
    ) -> LogResult<Option<Record>>;

    /// Discards every record below `offset`.
    ///
    /// A no-op if the segment is already truncated at or past `offset`.
    /// Fails with `LogError::OffsetBeyondEnd` if `offset` exceeds the
    /// write offset.
    async fn truncate_below(
        &self,
        log: &LogName,
        segment_id: SegmentId,
        offset: Offset,
    ) -> LogResult<()>;

    /// Returns the offset the next appended record will receive.
    async fn current_write_offset(&self, log: &LogName, segment_id: SegmentId)
        -> LogResult<Offset>;

    /// Returns the first offset still readable in the segment.
    async fn first_available_offset(
        &self,
        log: &LogName,
        segment_id: SegmentId,
    ) -> LogResult<Offset>;

    /// Returns the log's segments in creation order.
    async fn segments(&self, log: &LogName) -> LogResult<Vec<SegmentId>>;
}

// -----------------------------------------------------------------------------
// Log Admin
// -----------------------------------------------------------------------------

/// Administrative operations on logs.
///
/// These are single unconditional calls to the storage service; scaling
/// up a log changes its segment set and is expected to trigger a reader
/// group rebalance.
#[async_trait]
pub trait LogAdmin: Send + Sync {
    /// Creates a log with `segment_count` segments and returns their ids.
    async fn create_log(&self, log: &LogName, segment_count: u32) -> LogResult<Vec<SegmentId>>;

    /// Adds `count` segments to an existing log and returns the new ids.
    async fn add_segments(&self, log: &LogName, count: u32) -> LogResult<Vec<SegmentId>>;

    /// Seals a log. Sealed logs reject appends. Idempotent.
    async fn seal_log(&self, log: &LogName) -> LogResult<()>;

    /// Returns whether the log is sealed.
    async fn is_sealed(&self, log: &LogName) -> LogResult<bool>;

    /// Deletes a sealed log.
    async fn delete_log(&self, log: &LogName) -> LogResult<()>;

    /// Lists all logs.
    async fn list_logs(&self) -> LogResult<Vec<LogName>>;
}
