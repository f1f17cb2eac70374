//! Truncation service.
//!
//! Applies a completed cut to the partition log: every segment the cut
//! moves forward is truncated below its cut offset, and the truncation
//! record is advanced. Calls for the same log are serialized.
//!
//! # Order of operations
//!
//! 1. Plan against the truncation record (`StaleCut` on regression).
//! 2. Validate every planned segment against the partition log.
//! 3. Apply `truncate_below` per segment.
//! 4. Advance the truncation record.
//!
//! Nothing is applied unless steps 1 and 2 pass for every segment.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cutpoint_core::{LogName, Offset, SegmentId};
use cutpoint_log::{LogAdmin, LogError, PartitionLog};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cut::StreamCut;
use crate::error::{GroupError, GroupResult};
use crate::store::{CutStore, TruncationRecord};

/// Result of a successful truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationOutcome {
    /// The truncation record after the call.
    pub record: TruncationRecord,
    /// Segments truncated by this call. Empty when re-applying a cut.
    pub truncated: Vec<SegmentId>,
}

/// Applies cuts to a partition log.
pub struct TruncationService<L: PartitionLog, S: CutStore> {
    log: Arc<L>,
    store: Arc<S>,
    /// Per-log apply locks.
    locks: std::sync::Mutex<HashMap<LogName, Arc<Mutex<()>>>>,
}

impl<L: PartitionLog, S: CutStore> TruncationService<L, S> {
    /// Creates a truncation service.
    #[must_use]
    pub fn new(log: Arc<L>, store: Arc<S>) -> Self {
        Self {
            log,
            store,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, log: &LogName) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(log.clone()).or_default())
    }

    /// Truncates `log` below the offsets of `cut`.
    ///
    /// Idempotent: re-applying a cut that has already been applied
    /// truncates nothing and succeeds. Segments absent from the cut are
    /// untouched.
    ///
    /// # Errors
    ///
    /// - `CutLogMismatch` if the cut covers another log.
    /// - `StaleCut` if any offset lies below the segment's truncation point.
    /// - `SegmentUnassigned` if a segment in the cut no longer exists.
    /// - `CutBeyondEnd` if an offset exceeds the segment's write offset.
    /// - `Log` if the partition log fails while applying. This is the one
    ///   case where a call takes partial effect: segments truncated before
    ///   the failure stay truncated and are recorded, so the record still
    ///   matches the log. Retrying the same cut finishes the rest.
    pub async fn truncate(&self, log: &LogName, cut: &StreamCut) -> GroupResult<TruncationOutcome> {
        if cut.log() != log {
            return Err(GroupError::CutLogMismatch {
                expected: log.clone(),
                actual: cut.log().clone(),
            });
        }

        let lock = self.lock_for(log);
        let _guard = lock.lock().await;

        let record = self.store.truncation_record(log).await?;
        let plan = record.plan(cut)?;
        if plan.is_empty() {
            return Ok(TruncationOutcome {
                record,
                truncated: Vec::new(),
            });
        }

        self.validate(log, &plan).await?;

        let mut applied = BTreeMap::new();
        for (&segment_id, &offset) in &plan {
            if let Err(err) = self.log.truncate_below(log, segment_id, offset).await {
                warn!(
                    log = %log,
                    segment_id = %segment_id,
                    offset = offset.get(),
                    applied = applied.len(),
                    error = %err,
                    "Truncation failed mid-apply"
                );
                if !applied.is_empty() {
                    self.store.advance_truncation(log, &applied).await?;
                }
                return Err(err.into());
            }
            applied.insert(segment_id, offset);
        }

        let record = self.store.advance_truncation(log, &applied).await?;

        // TigerStyle: Assert postcondition.
        for (segment_id, offset) in cut.iter() {
            assert!(record.get(segment_id) >= offset, "truncation record behind cut");
        }

        info!(log = %log, cut = %cut, segments = applied.len(), "Applied truncation");
        Ok(TruncationOutcome {
            record,
            truncated: applied.into_keys().collect(),
        })
    }

    async fn validate(&self, log: &LogName, plan: &BTreeMap<SegmentId, Offset>) -> GroupResult<()> {
        let existing = self.log.segments(log).await?;
        for (&segment_id, &offset) in plan {
            if !existing.contains(&segment_id) {
                return Err(GroupError::SegmentUnassigned {
                    log: log.clone(),
                    segment_id,
                });
            }
            let write_offset = match self.log.current_write_offset(log, segment_id).await {
                Ok(write_offset) => write_offset,
                Err(LogError::SegmentNotFound { .. }) => {
                    return Err(GroupError::SegmentUnassigned {
                        log: log.clone(),
                        segment_id,
                    });
                }
                Err(err) => return Err(err.into()),
            };
            if offset > write_offset {
                return Err(GroupError::CutBeyondEnd {
                    segment_id,
                    offset,
                    write_offset,
                });
            }
        }
        Ok(())
    }
}

impl<L: PartitionLog + LogAdmin, S: CutStore> TruncationService<L, S> {
    /// Deletes a sealed log together with its truncation record and named
    /// cuts.
    ///
    /// A log that no longer exists only has its store entries cleared, so
    /// retrying after a store failure is safe.
    ///
    /// # Errors
    ///
    /// - `Log(NotSealed)` if the log is still open.
    /// - Store failures from clearing the record.
    pub async fn delete_log(&self, log: &LogName) -> GroupResult<()> {
        let lock = self.lock_for(log);
        let _guard = lock.lock().await;

        match self.log.delete_log(log).await {
            Ok(()) | Err(LogError::LogNotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        self.store.forget_log(log).await?;

        info!(log = %log, "Deleted log and its truncation record");
        Ok(())
    }
}
