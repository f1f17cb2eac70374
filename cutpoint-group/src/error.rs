//! Reader group error types.

use cutpoint_core::{LogName, Offset, ReaderId, RoundId, SegmentId};
use cutpoint_log::LogError;
use thiserror::Error;

use crate::round::AbortReason;

/// Result type for reader group operations.
pub type GroupResult<T> = Result<T, GroupError>;

/// Errors that can occur during reader group operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// A checkpoint round was invalidated before it completed.
    ///
    /// Callers retry with a fresh round.
    #[error("round {round_id} aborted: {reason}")]
    RoundAborted {
        /// The aborted round.
        round_id: RoundId,
        /// Why it was aborted.
        reason: AbortReason,
    },

    /// Another round is already active for the log.
    #[error("round {round_id} already active for {log}")]
    RoundInProgress {
        /// The log.
        log: LogName,
        /// The active round.
        round_id: RoundId,
    },

    /// No segment of the log is assigned to a reader.
    #[error("no segments of {log} are assigned to readers")]
    EmptyAssignment {
        /// The log.
        log: LogName,
    },

    /// A truncation request would move a segment's truncation point backwards.
    #[error("stale cut for {segment_id}: requested {requested} < truncated {current}")]
    StaleCut {
        /// The regressing segment.
        segment_id: SegmentId,
        /// Offset in the rejected cut.
        requested: Offset,
        /// Offset already truncated to.
        current: Offset,
    },

    /// A segment referenced by a cut no longer exists in the log.
    #[error("segment {segment_id} of {log} is not assigned and no longer exists")]
    SegmentUnassigned {
        /// The log.
        log: LogName,
        /// The segment.
        segment_id: SegmentId,
    },

    /// A cut offset lies beyond the data written to the segment.
    #[error("cut offset {offset} of {segment_id} beyond write offset {write_offset}")]
    CutBeyondEnd {
        /// The segment.
        segment_id: SegmentId,
        /// Offset in the cut.
        offset: Offset,
        /// Current write offset.
        write_offset: Offset,
    },

    /// The cut belongs to a different log.
    #[error("cut for {actual} cannot be applied to {expected}")]
    CutLogMismatch {
        /// The log being operated on.
        expected: LogName,
        /// The log the cut covers.
        actual: LogName,
    },

    /// A proposed assignment does not cover exactly the active segments.
    #[error("incomplete assignment for {log}: {segment_id} {reason}")]
    IncompleteAssignment {
        /// The log.
        log: LogName,
        /// The offending segment.
        segment_id: SegmentId,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A segment was assigned to more than one reader.
    #[error("segment {segment_id} assigned to both {first} and {second}")]
    DuplicateAssignment {
        /// The segment.
        segment_id: SegmentId,
        /// First owner.
        first: ReaderId,
        /// Second owner.
        second: ReaderId,
    },

    /// The reader already belongs to the group.
    #[error("reader {reader_id} already in group")]
    DuplicateReader {
        /// The reader.
        reader_id: ReaderId,
    },

    /// The reader does not belong to the group.
    #[error("reader {reader_id} not in group")]
    ReaderNotFound {
        /// The reader.
        reader_id: ReaderId,
    },

    /// Too many readers in the group.
    #[error("too many readers in group: {count} >= {max}")]
    TooManyReaders {
        /// Current count.
        count: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// The reader was torn down.
    #[error("reader {reader_id} closed")]
    ReaderClosed {
        /// The reader.
        reader_id: ReaderId,
    },

    /// No cut is recorded under the name.
    #[error("cut not found: {name}")]
    CutNotFound {
        /// The requested name.
        name: String,
    },

    /// Too many named cuts.
    #[error("too many cuts: {count} >= {max}")]
    TooManyCuts {
        /// Current count.
        count: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// The cut name is empty.
    #[error("cut name must not be empty")]
    InvalidCutName,

    /// The log has no assignment table entry.
    #[error("log {log} not registered with the assignment table")]
    LogNotRegistered {
        /// The log.
        log: LogName,
    },

    /// The coordinator task has stopped.
    #[error("coordinator shut down")]
    CoordinatorShutdown,

    /// Invalid configuration.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Configuration error description.
        message: String,
    },

    /// I/O error in the cut store.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The partition log collaborator failed.
    #[error(transparent)]
    Log(#[from] LogError),
}
