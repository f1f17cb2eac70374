//! Checkpoint round state machine.
//!
//! A round is keyed by `(log, round_id)` and moves from `Active` to
//! exactly one terminal state. Transitions are pure functions of the
//! current state and an event; the coordinator owns the only instance
//! and applies events one at a time, which makes completion
//! exactly-once.
//!
//! ```text
//!            Report (not all pending)
//!              ┌──────┐
//!              ▼      │
//!          ┌────────┐─┘  Report (all pending)   ┌──────────┐
//!  start ─►│ Active │──────────────────────────►│ Complete │
//!          └────────┘                           └──────────┘
//!              │  Rebalance (pending changed) / Timeout / Shutdown
//!              ▼
//!          ┌─────────┐
//!          │ Aborted │
//!          └─────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use cutpoint_core::{LogName, Offset, RoundId, SegmentId};

use crate::cut::StreamCut;

// -----------------------------------------------------------------------------
// Status
// -----------------------------------------------------------------------------

/// Why a round was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A pending segment changed owner or was unassigned.
    Rebalance {
        /// First affected pending segment.
        segment_id: SegmentId,
    },
    /// No terminal state within the caller's deadline.
    Timeout,
    /// The coordinator shut down with the round still active.
    Shutdown,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rebalance { segment_id } => write!(f, "rebalance moved {segment_id}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Shutdown => write!(f, "coordinator shut down"),
        }
    }
}

/// Status of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundStatus {
    /// Waiting for reports.
    Active,
    /// Every pending segment reported; the cut is final.
    Complete(StreamCut),
    /// Invalidated; never produces a cut.
    Aborted(AbortReason),
}

impl RoundStatus {
    /// Returns true for `Complete` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// -----------------------------------------------------------------------------
// Events
// -----------------------------------------------------------------------------

/// Input to the round state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    /// A reader reached the marker on a segment.
    Report {
        /// The segment.
        segment_id: SegmentId,
        /// Reader position when the marker was reached.
        offset: Offset,
    },
    /// The assignment changed for these segments.
    Rebalance {
        /// Segments whose owner changed, were added or were removed.
        changed: BTreeSet<SegmentId>,
    },
    /// The caller's deadline passed.
    Timeout,
    /// The coordinator is stopping.
    Shutdown,
}

/// Result of applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The event had no effect.
    Ignored(IgnoreReason),
    /// A report was recorded; the round is still active.
    Recorded {
        /// Pending segments still to report.
        remaining: usize,
    },
    /// The round completed with this cut.
    Completed(StreamCut),
    /// The round was aborted.
    Aborted(AbortReason),
}

/// Why an event was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The round is already terminal.
    Terminal,
    /// The reported segment is not pending in this round.
    SegmentUnassigned,
    /// A rebalance touched no pending segment.
    Unaffected,
}

// -----------------------------------------------------------------------------
// Round State
// -----------------------------------------------------------------------------

/// State of one checkpoint round.
#[derive(Debug, Clone)]
pub struct RoundState {
    log: LogName,
    round_id: RoundId,
    pending: BTreeSet<SegmentId>,
    reported: BTreeMap<SegmentId, Offset>,
    status: RoundStatus,
}

impl RoundState {
    /// Starts a round over the segments assigned at this moment.
    ///
    /// # Panics
    ///
    /// Panics if `pending` is empty. The coordinator rejects empty
    /// assignments before starting a round.
    #[must_use]
    pub fn start(log: LogName, round_id: RoundId, pending: BTreeSet<SegmentId>) -> Self {
        // TigerStyle: Assert precondition.
        assert!(!pending.is_empty(), "round started with no pending segments");

        Self {
            log,
            round_id,
            pending,
            reported: BTreeMap::new(),
            status: RoundStatus::Active,
        }
    }

    /// Returns the log.
    #[must_use]
    pub const fn log(&self) -> &LogName {
        &self.log
    }

    /// Returns the round id.
    #[must_use]
    pub const fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Returns the pending segment set fixed at start.
    #[must_use]
    pub const fn pending(&self) -> &BTreeSet<SegmentId> {
        &self.pending
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> &RoundStatus {
        &self.status
    }

    /// Returns the offsets reported so far.
    ///
    /// Empty once the round is aborted: partial reports are discarded.
    #[must_use]
    pub const fn reported(&self) -> &BTreeMap<SegmentId, Offset> {
        &self.reported
    }

    /// Applies one event.
    pub fn apply(&mut self, event: RoundEvent) -> Transition {
        if self.status.is_terminal() {
            return Transition::Ignored(IgnoreReason::Terminal);
        }

        match event {
            RoundEvent::Report { segment_id, offset } => self.on_report(segment_id, offset),
            RoundEvent::Rebalance { changed } => {
                match changed.iter().find(|s| self.pending.contains(s)) {
                    Some(&segment_id) => self.abort(AbortReason::Rebalance { segment_id }),
                    None => Transition::Ignored(IgnoreReason::Unaffected),
                }
            }
            RoundEvent::Timeout => self.abort(AbortReason::Timeout),
            RoundEvent::Shutdown => self.abort(AbortReason::Shutdown),
        }
    }

    fn on_report(&mut self, segment_id: SegmentId, offset: Offset) -> Transition {
        if !self.pending.contains(&segment_id) {
            return Transition::Ignored(IgnoreReason::SegmentUnassigned);
        }

        // A repeated report for the same segment overwrites the earlier one.
        self.reported.insert(segment_id, offset);

        let remaining = self
            .pending
            .iter()
            .filter(|s| !self.reported.contains_key(s))
            .count();
        if remaining > 0 {
            return Transition::Recorded { remaining };
        }

        let positions: BTreeMap<SegmentId, Offset> = self
            .pending
            .iter()
            .filter_map(|s| self.reported.get(s).map(|o| (*s, *o)))
            .collect();
        let cut = StreamCut::new(self.log.clone(), positions);

        // TigerStyle: Assert postcondition.
        assert!(
            cut.segments().eq(self.pending.iter().copied()),
            "cut must cover exactly the pending segments"
        );

        self.status = RoundStatus::Complete(cut.clone());
        Transition::Completed(cut)
    }

    fn abort(&mut self, reason: AbortReason) -> Transition {
        self.reported.clear();
        self.status = RoundStatus::Aborted(reason);
        Transition::Aborted(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: u64) -> SegmentId {
        SegmentId::new(id)
    }

    fn report(segment: u64, offset: u64) -> RoundEvent {
        RoundEvent::Report {
            segment_id: s(segment),
            offset: Offset::new(offset),
        }
    }

    fn round(segments: &[u64]) -> RoundState {
        RoundState::start(
            LogName::parse("s/l").unwrap(),
            RoundId::new(1),
            segments.iter().map(|id| s(*id)).collect(),
        )
    }

    #[test]
    fn test_round_completes_when_all_report() {
        let mut state = round(&[0, 1]);

        assert_eq!(state.apply(report(0, 100)), Transition::Recorded { remaining: 1 });
        assert_eq!(state.status(), &RoundStatus::Active);

        let Transition::Completed(cut) = state.apply(report(1, 50)) else {
            panic!("expected completion");
        };
        assert_eq!(cut.to_string(), "s/l{0:100, 1:50}");
        assert_eq!(state.status(), &RoundStatus::Complete(cut));
    }

    #[test]
    fn test_rebalance_aborts_and_late_report_is_ignored() {
        let mut state = round(&[0, 1]);
        state.apply(report(0, 100));

        let transition = state.apply(RoundEvent::Rebalance {
            changed: [s(1)].into_iter().collect(),
        });
        assert_eq!(
            transition,
            Transition::Aborted(AbortReason::Rebalance { segment_id: s(1) })
        );
        assert!(state.reported().is_empty());

        // Every report arriving now is a no-op; no cut is ever produced.
        assert_eq!(state.apply(report(0, 100)), Transition::Ignored(IgnoreReason::Terminal));
        assert_eq!(state.apply(report(1, 50)), Transition::Ignored(IgnoreReason::Terminal));
        assert!(matches!(state.status(), RoundStatus::Aborted(_)));
    }

    #[test]
    fn test_rebalance_of_other_segments_does_not_abort() {
        let mut state = round(&[0, 1]);
        let transition = state.apply(RoundEvent::Rebalance {
            changed: [s(2)].into_iter().collect(),
        });
        assert_eq!(transition, Transition::Ignored(IgnoreReason::Unaffected));
        assert_eq!(state.status(), &RoundStatus::Active);
    }

    #[test]
    fn test_report_for_unassigned_segment_is_noop() {
        let mut state = round(&[0]);
        assert_eq!(
            state.apply(report(7, 3)),
            Transition::Ignored(IgnoreReason::SegmentUnassigned)
        );
        assert!(state.reported().is_empty());
    }

    #[test]
    fn test_duplicate_report_overwrites() {
        let mut state = round(&[0, 1]);
        state.apply(report(0, 10));
        state.apply(report(0, 12));
        let Transition::Completed(cut) = state.apply(report(1, 5)) else {
            panic!("expected completion");
        };
        assert_eq!(cut.get(s(0)), Some(Offset::new(12)));
    }

    #[test]
    fn test_completion_is_exactly_once() {
        let mut state = round(&[0]);
        assert!(matches!(state.apply(report(0, 1)), Transition::Completed(_)));
        assert_eq!(state.apply(report(0, 2)), Transition::Ignored(IgnoreReason::Terminal));
        assert_eq!(state.apply(RoundEvent::Timeout), Transition::Ignored(IgnoreReason::Terminal));
        assert!(matches!(state.status(), RoundStatus::Complete(_)));
    }

    #[test]
    fn test_timeout_aborts() {
        let mut state = round(&[0, 1]);
        state.apply(report(0, 1));
        assert_eq!(
            state.apply(RoundEvent::Timeout),
            Transition::Aborted(AbortReason::Timeout)
        );
    }

    #[test]
    #[should_panic(expected = "no pending segments")]
    fn test_empty_round_panics() {
        let _ = round(&[]);
    }
}
