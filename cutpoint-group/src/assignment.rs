//! Segment assignment table.
//!
//! The table records, per log, which reader owns which segment. Readers
//! never negotiate ownership with each other: every reassignment is a
//! whole-table replacement published through a `watch` channel, so a
//! reader always observes a complete, exclusive assignment.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use cutpoint_core::{LogName, ReaderId, SegmentId};
use tokio::sync::watch;
use tracing::info;

use crate::error::{GroupError, GroupResult};

// -----------------------------------------------------------------------------
// Assignment
// -----------------------------------------------------------------------------

/// A mapping from segment to owning reader.
///
/// Exclusive by construction: a segment has at most one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    owners: BTreeMap<SegmentId, ReaderId>,
}

impl Assignment {
    /// Creates an empty assignment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owners: BTreeMap::new(),
        }
    }

    /// Builds an assignment from `(segment, reader)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAssignment` if a segment is given two different owners.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (SegmentId, ReaderId)>) -> GroupResult<Self> {
        let mut owners = BTreeMap::new();
        for (segment_id, reader_id) in pairs {
            if let Some(first) = owners.insert(segment_id, reader_id) {
                if first != reader_id {
                    return Err(GroupError::DuplicateAssignment {
                        segment_id,
                        first,
                        second: reader_id,
                    });
                }
            }
        }
        Ok(Self { owners })
    }

    /// Computes a balanced assignment of `segments` over `readers`.
    ///
    /// Sticky: a segment stays with its `previous` owner while that owner
    /// is still a reader and holds no more than its fair share. Every
    /// reader ends with `n / r` or `n / r + 1` segments.
    #[must_use]
    pub fn balanced(previous: &Self, segments: &[SegmentId], readers: &[ReaderId]) -> Self {
        let mut owners = BTreeMap::new();
        if readers.is_empty() {
            return Self { owners };
        }

        let base = segments.len() / readers.len();
        let mut extra = segments.len() % readers.len();
        let mut counts: BTreeMap<ReaderId, usize> = readers.iter().map(|r| (*r, 0)).collect();

        // First pass: keep up to `base` segments with their previous owner.
        let mut overflow = Vec::new();
        let mut unowned = Vec::new();
        for &segment_id in segments {
            match previous.owner(segment_id) {
                Some(owner) if counts.contains_key(&owner) => {
                    let count = counts.entry(owner).or_default();
                    if *count < base {
                        *count += 1;
                        owners.insert(segment_id, owner);
                    } else {
                        overflow.push((segment_id, owner));
                    }
                }
                _ => unowned.push(segment_id),
            }
        }

        // Second pass: owners at `base` may keep one more while extras remain.
        for (segment_id, owner) in overflow {
            let count = counts.get(&owner).copied().unwrap_or(usize::MAX);
            if count == base && extra > 0 {
                extra -= 1;
                counts.insert(owner, count + 1);
                owners.insert(segment_id, owner);
            } else {
                unowned.push(segment_id);
            }
        }

        // Remaining segments go to the least loaded reader.
        unowned.sort_unstable();
        for segment_id in unowned {
            let Some((&reader_id, _)) = counts
                .iter()
                .filter(|(_, c)| **c < base || (**c == base && extra > 0))
                .min_by_key(|(r, c)| (**c, **r))
            else {
                break;
            };
            let count = counts.get(&reader_id).copied().unwrap_or_default();
            if count == base {
                extra -= 1;
            }
            counts.insert(reader_id, count + 1);
            owners.insert(segment_id, reader_id);
        }

        Self { owners }
    }

    /// Returns the owner of a segment.
    #[must_use]
    pub fn owner(&self, segment_id: SegmentId) -> Option<ReaderId> {
        self.owners.get(&segment_id).copied()
    }

    /// Returns the segments owned by a reader, in id order.
    #[must_use]
    pub fn segments_of(&self, reader_id: ReaderId) -> Vec<SegmentId> {
        self.owners
            .iter()
            .filter(|(_, r)| **r == reader_id)
            .map(|(s, _)| *s)
            .collect()
    }

    /// Returns all assigned segments.
    #[must_use]
    pub fn segments(&self) -> BTreeSet<SegmentId> {
        self.owners.keys().copied().collect()
    }

    /// Returns all readers owning at least one segment.
    #[must_use]
    pub fn readers(&self) -> BTreeSet<ReaderId> {
        self.owners.values().copied().collect()
    }

    /// Returns `(segment, reader)` pairs in segment id order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, ReaderId)> + '_ {
        self.owners.iter().map(|(s, r)| (*s, *r))
    }

    /// Returns the number of assigned segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns true if nothing is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Returns segments whose owner differs between `self` and `other`,
    /// including segments present in only one of them.
    #[must_use]
    pub fn changed_segments(&self, other: &Self) -> BTreeSet<SegmentId> {
        let mut changed = BTreeSet::new();
        for (segment_id, owner) in &self.owners {
            if other.owners.get(segment_id) != Some(owner) {
                changed.insert(*segment_id);
            }
        }
        for segment_id in other.owners.keys() {
            if !self.owners.contains_key(segment_id) {
                changed.insert(*segment_id);
            }
        }
        changed
    }
}

// -----------------------------------------------------------------------------
// Snapshot
// -----------------------------------------------------------------------------

/// A versioned assignment published to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentSnapshot {
    /// Monotonic version, bumped on every rebalance.
    pub version: u64,
    /// The assignment.
    pub assignment: Assignment,
}

/// Outcome of replacing a log's assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebalance {
    /// The log.
    pub log: LogName,
    /// Version of the new assignment.
    pub version: u64,
    /// Segments whose owner changed.
    pub changed: BTreeSet<SegmentId>,
}

// -----------------------------------------------------------------------------
// Assignment Table
// -----------------------------------------------------------------------------

/// Per-log segment ownership.
///
/// # Thread Safety
///
/// The table is `Send + Sync`. Replacement is atomic per log: subscribers
/// see either the old or the new assignment, never a mix.
#[derive(Debug, Default)]
pub struct AssignmentTable {
    logs: Mutex<HashMap<LogName, watch::Sender<Arc<AssignmentSnapshot>>>>,
}

impl AssignmentTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<LogName, watch::Sender<Arc<AssignmentSnapshot>>>> {
        // The map is only mutated by whole-entry insert/remove, so a poisoned
        // guard still holds a consistent table.
        self.logs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a log with an empty assignment (group formation).
    ///
    /// No-op if the log is already registered.
    pub fn register_log(&self, log: &LogName) {
        let mut logs = self.lock();
        logs.entry(log.clone()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(Arc::new(AssignmentSnapshot {
                version: 0,
                assignment: Assignment::new(),
            }));
            tx
        });
    }

    /// Removes a log (group teardown). Subscribers observe the channel closing.
    pub fn remove_log(&self, log: &LogName) {
        self.lock().remove(log);
    }

    /// Returns the current assignment for a log.
    ///
    /// # Errors
    ///
    /// Returns `LogNotRegistered` if the log has no entry.
    pub fn current_assignment(&self, log: &LogName) -> GroupResult<Arc<AssignmentSnapshot>> {
        let logs = self.lock();
        let tx = logs
            .get(log)
            .ok_or_else(|| GroupError::LogNotRegistered { log: log.clone() })?;
        let snapshot = tx.borrow().clone();
        Ok(snapshot)
    }

    /// Subscribes to assignment changes for a log.
    ///
    /// # Errors
    ///
    /// Returns `LogNotRegistered` if the log has no entry.
    pub fn subscribe(&self, log: &LogName) -> GroupResult<watch::Receiver<Arc<AssignmentSnapshot>>> {
        let logs = self.lock();
        logs.get(log)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| GroupError::LogNotRegistered { log: log.clone() })
    }

    /// Atomically replaces the assignment for a log.
    ///
    /// Returns the set of segments whose owner changed. Callers are
    /// responsible for invalidating in-flight rounds that depend on them;
    /// the barrier coordinator does this when it applies a rebalance.
    ///
    /// # Errors
    ///
    /// Returns `LogNotRegistered` if the log has no entry.
    pub fn on_rebalance(&self, log: &LogName, assignment: Assignment) -> GroupResult<Rebalance> {
        let logs = self.lock();
        let tx = logs
            .get(log)
            .ok_or_else(|| GroupError::LogNotRegistered { log: log.clone() })?;

        let previous = tx.borrow().clone();
        let changed = previous.assignment.changed_segments(&assignment);
        let version = previous.version + 1;
        tx.send_replace(Arc::new(AssignmentSnapshot {
            version,
            assignment,
        }));

        info!(
            log = %log,
            version,
            changed = changed.len(),
            "Applied rebalance"
        );

        Ok(Rebalance {
            log: log.clone(),
            version,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: u64) -> SegmentId {
        SegmentId::new(id)
    }

    fn r(id: u64) -> ReaderId {
        ReaderId::new(id)
    }

    fn segments(n: u64) -> Vec<SegmentId> {
        (0..n).map(SegmentId::new).collect()
    }

    fn assert_balanced(assignment: &Assignment, n: usize, readers: &[ReaderId]) {
        assert_eq!(assignment.len(), n);
        let base = n / readers.len();
        for reader in readers {
            let count = assignment.segments_of(*reader).len();
            assert!(count == base || count == base + 1, "{reader} has {count}");
        }
    }

    #[test]
    fn test_from_pairs_rejects_double_owner() {
        let err = Assignment::from_pairs([(s(0), r(0)), (s(0), r(1))]).unwrap_err();
        assert_eq!(
            err,
            GroupError::DuplicateAssignment {
                segment_id: s(0),
                first: r(0),
                second: r(1),
            }
        );

        // Repeating the same pair is harmless.
        let ok = Assignment::from_pairs([(s(0), r(0)), (s(0), r(0))]).unwrap();
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn test_balanced_from_scratch() {
        let readers = [r(1), r(2)];
        let assignment = Assignment::balanced(&Assignment::new(), &segments(5), &readers);
        assert_balanced(&assignment, 5, &readers);
        assert_eq!(assignment.segments(), segments(5).into_iter().collect());
    }

    #[test]
    fn test_balanced_is_sticky() {
        let readers = [r(1), r(2)];
        let first = Assignment::balanced(&Assignment::new(), &segments(4), &readers);

        // Same inputs produce no movement.
        let second = Assignment::balanced(&first, &segments(4), &readers);
        assert!(first.changed_segments(&second).is_empty());

        // A new segment moves nothing else.
        let third = Assignment::balanced(&first, &segments(5), &readers);
        assert_eq!(first.changed_segments(&third), [s(4)].into_iter().collect());
    }

    #[test]
    fn test_balanced_new_reader_takes_share() {
        let two = [r(1), r(2)];
        let first = Assignment::balanced(&Assignment::new(), &segments(4), &two);

        let three = [r(1), r(2), r(3)];
        let second = Assignment::balanced(&first, &segments(4), &three);
        assert_balanced(&second, 4, &three);
        assert!(!second.segments_of(r(3)).is_empty());

        // Only segments handed to the new reader moved.
        for segment in first.changed_segments(&second) {
            assert_eq!(second.owner(segment), Some(r(3)));
        }
    }

    #[test]
    fn test_balanced_more_readers_than_segments() {
        let readers = [r(1), r(2), r(3)];
        let assignment = Assignment::balanced(&Assignment::new(), &segments(2), &readers);
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.readers().len(), 2);
    }

    #[test]
    fn test_balanced_reader_leaves() {
        let readers = [r(1), r(2)];
        let first = Assignment::balanced(&Assignment::new(), &segments(4), &readers);
        let second = Assignment::balanced(&first, &segments(4), &[r(2)]);
        assert_eq!(second.segments_of(r(2)).len(), 4);
        for segment in first.segments_of(r(2)) {
            assert_eq!(second.owner(segment), Some(r(2)));
        }
    }

    #[test]
    fn test_table_rebalance_versions_and_changes() {
        let table = AssignmentTable::new();
        let log = LogName::parse("a/b").unwrap();
        table.register_log(&log);

        let mut rx = table.subscribe(&log).unwrap();
        assert_eq!(rx.borrow_and_update().version, 0);

        let a1 = Assignment::from_pairs([(s(0), r(0)), (s(1), r(1))]).unwrap();
        let rebalance = table.on_rebalance(&log, a1.clone()).unwrap();
        assert_eq!(rebalance.version, 1);
        assert_eq!(rebalance.changed, [s(0), s(1)].into_iter().collect());
        assert!(rx.has_changed().unwrap());

        let a2 = Assignment::from_pairs([(s(0), r(0)), (s(1), r(2))]).unwrap();
        let rebalance = table.on_rebalance(&log, a2.clone()).unwrap();
        assert_eq!(rebalance.version, 2);
        assert_eq!(rebalance.changed, [s(1)].into_iter().collect());

        let current = table.current_assignment(&log).unwrap();
        assert_eq!(current.assignment, a2);
        assert_eq!(current.assignment.owner(s(1)), Some(r(2)));
    }

    #[test]
    fn test_unregistered_log() {
        let table = AssignmentTable::new();
        let log = LogName::parse("a/b").unwrap();
        assert!(matches!(
            table.current_assignment(&log),
            Err(GroupError::LogNotRegistered { .. })
        ));
        assert!(table.on_rebalance(&log, Assignment::new()).is_err());
    }
}
