//! Partition log error types.

use cutpoint_core::{LogName, Offset, SegmentId};
use thiserror::Error;

/// Result type for partition log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors returned by the partition log collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log does not exist.
    #[error("log not found: {log}")]
    LogNotFound {
        /// The missing log.
        log: LogName,
    },

    /// The log already exists.
    #[error("log already exists: {log}")]
    LogExists {
        /// The existing log.
        log: LogName,
    },

    /// The segment does not exist in the log.
    #[error("segment {segment_id} not found in {log}")]
    SegmentNotFound {
        /// The log.
        log: LogName,
        /// The missing segment.
        segment_id: SegmentId,
    },

    /// The log is sealed and rejects writes.
    #[error("log {log} is sealed")]
    Sealed {
        /// The sealed log.
        log: LogName,
    },

    /// The log must be sealed before this operation.
    #[error("log {log} is not sealed")]
    NotSealed {
        /// The unsealed log.
        log: LogName,
    },

    /// The requested offset has been truncated away.
    #[error("offset {requested} of {segment_id} truncated, first available is {first_available}")]
    Truncated {
        /// The segment.
        segment_id: SegmentId,
        /// The requested offset.
        requested: Offset,
        /// The first offset still readable.
        first_available: Offset,
    },

    /// The offset lies beyond the data written so far.
    #[error("offset {offset} of {segment_id} beyond write offset {write_offset}")]
    OffsetBeyondEnd {
        /// The segment.
        segment_id: SegmentId,
        /// The requested offset.
        offset: Offset,
        /// The current write offset.
        write_offset: Offset,
    },

    /// A record payload exceeds the configured maximum.
    #[error("record too large: {size} > {max} bytes")]
    RecordTooLarge {
        /// Actual size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// Too many segments for a single log.
    #[error("too many segments for {log}: {count} > {max}")]
    TooManySegments {
        /// The log.
        log: LogName,
        /// Requested segment count.
        count: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// I/O error talking to the storage service.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let log = LogName::parse("scope/stream").unwrap();
        let err = LogError::SegmentNotFound {
            log,
            segment_id: SegmentId::new(7),
        };
        assert_eq!(err.to_string(), "segment segment-7 not found in scope/stream");

        let err = LogError::Truncated {
            segment_id: SegmentId::new(1),
            requested: Offset::new(3),
            first_available: Offset::new(10),
        };
        assert!(err.to_string().contains("first available is 10"));
    }
}
