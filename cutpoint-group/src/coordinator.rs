//! Barrier coordinator actor.
//!
//! The coordinator owns every round state and is the only task that
//! mutates one. Commands arrive over a bounded channel with oneshot
//! replies; reader reports arrive over a separate unbounded channel so
//! that reporting never blocks a reader.
//!
//! # Design
//!
//! ```text
//!  ReaderGroup ──(StartRound/Rebalance/Expire)──┐
//!                                               ▼
//!                                      ┌──────────────────┐   markers   ┌──────────┐
//!                                      │ CoordinatorActor │────────────►│ Reader N │
//!                                      └──────────────────┘             └──────────┘
//!                                               ▲                            │
//!                                               └──────────(Report)──────────┘
//! ```
//!
//! Rebalances are applied by the actor itself, so replacing the
//! assignment table and aborting the affected round happen in one step
//! with respect to reports and round starts.
//!
//! Each round carries a deadline armed at start. The actor aborts overdue
//! rounds itself; a caller that stops waiting never leaves a log blocked.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use cutpoint_core::{LogName, Offset, ReaderId, RoundId, SegmentId};
use cutpoint_log::PartitionLog;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::assignment::{Assignment, AssignmentTable, Rebalance};
use crate::cut::StreamCut;
use crate::error::{GroupError, GroupResult};
use crate::round::{RoundEvent, RoundState, RoundStatus, Transition};

/// Terminal rounds kept for status queries.
/// `TigerStyle`: explicit limit on retained history.
const MAX_FINISHED_ROUNDS: usize = 64;

// -----------------------------------------------------------------------------
// Messages
// -----------------------------------------------------------------------------

/// A checkpoint marker for one segment.
///
/// Sits at `position`: after every record written before the round
/// started, before every record written after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    /// The round.
    pub round_id: RoundId,
    /// The segment.
    pub segment_id: SegmentId,
    /// Write offset of the segment at round start.
    pub position: Offset,
}

/// A reader's report that it reached a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// The log.
    pub log: LogName,
    /// The round.
    pub round_id: RoundId,
    /// The segment.
    pub segment_id: SegmentId,
    /// Reader position when the marker was reached. At or above the
    /// marker position.
    pub offset: Offset,
}

/// Reply to a successful round start.
#[derive(Debug)]
struct RoundStart {
    round_id: RoundId,
    markers: BTreeMap<SegmentId, Offset>,
    status: watch::Receiver<RoundStatus>,
}

/// Commands that can be sent to the coordinator.
#[derive(Debug)]
enum CoordinatorCommand {
    RegisterReader {
        log: LogName,
        reader_id: ReaderId,
        mailbox: mpsc::UnboundedSender<Marker>,
        reply: oneshot::Sender<GroupResult<()>>,
    },
    UnregisterReader {
        log: LogName,
        reader_id: ReaderId,
        reply: oneshot::Sender<()>,
    },
    StartRound {
        log: LogName,
        reply: oneshot::Sender<GroupResult<RoundStart>>,
    },
    Rebalance {
        log: LogName,
        assignment: Assignment,
        reply: oneshot::Sender<GroupResult<Rebalance>>,
    },
    Expire {
        log: LogName,
        round_id: RoundId,
        reply: oneshot::Sender<Option<RoundStatus>>,
    },
    RoundStatus {
        log: LogName,
        round_id: RoundId,
        reply: oneshot::Sender<Option<RoundStatus>>,
    },
    LatestCut {
        log: LogName,
        reply: oneshot::Sender<Option<StreamCut>>,
    },
    Shutdown,
}

// -----------------------------------------------------------------------------
// Handle
// -----------------------------------------------------------------------------

/// Handle for sending commands to the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::Sender<CoordinatorCommand>,
    report_tx: mpsc::UnboundedSender<Report>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> GroupResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| GroupError::CoordinatorShutdown)?;
        reply_rx.await.map_err(|_| GroupError::CoordinatorShutdown)
    }

    /// Registers a reader's marker mailbox.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateReader` if the reader is already registered for
    /// the log, or `CoordinatorShutdown` if the actor has stopped.
    pub async fn register_reader(
        &self,
        log: &LogName,
        reader_id: ReaderId,
        mailbox: mpsc::UnboundedSender<Marker>,
    ) -> GroupResult<()> {
        self.request(|reply| CoordinatorCommand::RegisterReader {
            log: log.clone(),
            reader_id,
            mailbox,
            reply,
        })
        .await?
    }

    /// Drops a reader's mailbox. The reader observes its mailbox closing.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorShutdown` if the actor has stopped.
    pub async fn unregister_reader(&self, log: &LogName, reader_id: ReaderId) -> GroupResult<()> {
        self.request(|reply| CoordinatorCommand::UnregisterReader {
            log: log.clone(),
            reader_id,
            reply,
        })
        .await
    }

    /// Starts a checkpoint round over the segments currently assigned.
    ///
    /// # Errors
    ///
    /// - `RoundInProgress` if the log already has an active round.
    /// - `EmptyAssignment` if no segment is assigned.
    /// - `LogNotRegistered` if the log is unknown to the assignment table.
    /// - `Log` if a write offset cannot be read.
    pub async fn start_round(&self, log: &LogName) -> GroupResult<RoundHandle> {
        let start = self
            .request(|reply| CoordinatorCommand::StartRound {
                log: log.clone(),
                reply,
            })
            .await??;

        Ok(RoundHandle {
            log: log.clone(),
            round_id: start.round_id,
            markers: start.markers,
            status: start.status,
            coordinator: self.clone(),
        })
    }

    /// Replaces the assignment of a log, aborting an active round whose
    /// pending segments changed owner.
    ///
    /// # Errors
    ///
    /// Returns `LogNotRegistered` or `CoordinatorShutdown`.
    pub async fn rebalance(&self, log: &LogName, assignment: Assignment) -> GroupResult<Rebalance> {
        self.request(|reply| CoordinatorCommand::Rebalance {
            log: log.clone(),
            assignment,
            reply,
        })
        .await?
    }

    /// Aborts a round on timeout if it is still active and returns its
    /// final status. `None` if the round is unknown.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorShutdown` if the actor has stopped.
    pub async fn expire(&self, log: &LogName, round_id: RoundId) -> GroupResult<Option<RoundStatus>> {
        self.request(|reply| CoordinatorCommand::Expire {
            log: log.clone(),
            round_id,
            reply,
        })
        .await
    }

    /// Returns the status of a round, if it is active or recently finished.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorShutdown` if the actor has stopped.
    pub async fn round_status(
        &self,
        log: &LogName,
        round_id: RoundId,
    ) -> GroupResult<Option<RoundStatus>> {
        self.request(|reply| CoordinatorCommand::RoundStatus {
            log: log.clone(),
            round_id,
            reply,
        })
        .await
    }

    /// Returns the most recently completed cut of a log.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorShutdown` if the actor has stopped.
    pub async fn latest_cut(&self, log: &LogName) -> GroupResult<Option<StreamCut>> {
        self.request(|reply| CoordinatorCommand::LatestCut {
            log: log.clone(),
            reply,
        })
        .await
    }

    /// Reports that a segment reached a marker. Fire-and-forget.
    pub fn report(&self, report: Report) {
        if self.report_tx.send(report).is_err() {
            debug!("Coordinator gone; dropping report");
        }
    }

    /// Returns a sender readers use to report.
    #[must_use]
    pub fn report_sender(&self) -> mpsc::UnboundedSender<Report> {
        self.report_tx.clone()
    }

    /// Requests the actor to shut down. Active rounds are aborted.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(CoordinatorCommand::Shutdown).await;
    }
}

// -----------------------------------------------------------------------------
// Round Handle
// -----------------------------------------------------------------------------

/// Caller-side view of one round.
#[derive(Debug)]
pub struct RoundHandle {
    log: LogName,
    round_id: RoundId,
    markers: BTreeMap<SegmentId, Offset>,
    status: watch::Receiver<RoundStatus>,
    coordinator: CoordinatorHandle,
}

impl RoundHandle {
    /// Returns the round id.
    #[must_use]
    pub const fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Returns the log.
    #[must_use]
    pub const fn log(&self) -> &LogName {
        &self.log
    }

    /// Returns the marker position placed in each pending segment.
    #[must_use]
    pub const fn markers(&self) -> &BTreeMap<SegmentId, Offset> {
        &self.markers
    }

    /// Returns the current status without waiting.
    #[must_use]
    pub fn status(&self) -> RoundStatus {
        self.status.borrow().clone()
    }

    /// Waits for the round to finish.
    ///
    /// If no terminal state is reached within `timeout`, the round is
    /// aborted. A report racing with the deadline may still complete it;
    /// the coordinator decides which happened first. Without a waiter the
    /// coordinator aborts the round at its own deadline.
    ///
    /// # Errors
    ///
    /// - `RoundAborted` if the round was invalidated or timed out.
    /// - `CoordinatorShutdown` if the actor stopped.
    pub async fn wait(&mut self, timeout: Duration) -> GroupResult<StreamCut> {
        let waited = tokio::time::timeout(timeout, self.status.wait_for(RoundStatus::is_terminal))
            .await
            .map(|result| result.map(|status| status.clone()));

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => return Err(GroupError::CoordinatorShutdown),
            Err(_elapsed) => self
                .coordinator
                .expire(&self.log, self.round_id)
                .await?
                .ok_or(GroupError::CoordinatorShutdown)?,
        };

        match status {
            RoundStatus::Complete(cut) => Ok(cut),
            RoundStatus::Aborted(reason) => Err(GroupError::RoundAborted {
                round_id: self.round_id,
                reason,
            }),
            RoundStatus::Active => Err(GroupError::CoordinatorShutdown),
        }
    }
}

// -----------------------------------------------------------------------------
// Actor
// -----------------------------------------------------------------------------

struct ActiveRound {
    state: RoundState,
    status_tx: watch::Sender<RoundStatus>,
    deadline: Instant,
}

struct CoordinatorActor<L: PartitionLog> {
    cmd_rx: mpsc::Receiver<CoordinatorCommand>,
    report_rx: mpsc::UnboundedReceiver<Report>,
    log: Arc<L>,
    table: Arc<AssignmentTable>,
    mailboxes: HashMap<LogName, HashMap<ReaderId, mpsc::UnboundedSender<Marker>>>,
    active: HashMap<LogName, ActiveRound>,
    finished: VecDeque<(LogName, RoundId, RoundStatus)>,
    latest_cuts: HashMap<LogName, StreamCut>,
    next_round_id: RoundId,
    round_timeout: Duration,
}

impl<L: PartitionLog + 'static> CoordinatorActor<L> {
    /// Runs the actor message loop.
    async fn run(mut self) {
        debug!("Coordinator started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                Some(report) = self.report_rx.recv() => self.on_report(report),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(CoordinatorCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => self.expire_overdue(),
            }
        }

        let logs: Vec<LogName> = self.active.keys().cloned().collect();
        for log in logs {
            self.apply(&log, RoundEvent::Shutdown);
        }
        debug!("Coordinator stopped");
    }

    async fn handle(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::RegisterReader {
                log,
                reader_id,
                mailbox,
                reply,
            } => {
                let mailboxes = self.mailboxes.entry(log).or_default();
                let result = if mailboxes.contains_key(&reader_id) {
                    Err(GroupError::DuplicateReader { reader_id })
                } else {
                    mailboxes.insert(reader_id, mailbox);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            CoordinatorCommand::UnregisterReader {
                log,
                reader_id,
                reply,
            } => {
                if let Some(mailboxes) = self.mailboxes.get_mut(&log) {
                    mailboxes.remove(&reader_id);
                }
                let _ = reply.send(());
            }
            CoordinatorCommand::StartRound { log, reply } => {
                let result = self.start_round(log).await;
                let _ = reply.send(result);
            }
            CoordinatorCommand::Rebalance {
                log,
                assignment,
                reply,
            } => {
                let result = self.rebalance(&log, assignment);
                let _ = reply.send(result);
            }
            CoordinatorCommand::Expire {
                log,
                round_id,
                reply,
            } => {
                if self
                    .active
                    .get(&log)
                    .is_some_and(|r| r.state.round_id() == round_id)
                {
                    self.apply(&log, RoundEvent::Timeout);
                }
                let _ = reply.send(self.status_of(&log, round_id));
            }
            CoordinatorCommand::RoundStatus {
                log,
                round_id,
                reply,
            } => {
                let _ = reply.send(self.status_of(&log, round_id));
            }
            CoordinatorCommand::LatestCut { log, reply } => {
                let _ = reply.send(self.latest_cuts.get(&log).cloned());
            }
            CoordinatorCommand::Shutdown => {}
        }
    }

    async fn start_round(&mut self, log: LogName) -> GroupResult<RoundStart> {
        if let Some(active) = self.active.get(&log) {
            return Err(GroupError::RoundInProgress {
                log,
                round_id: active.state.round_id(),
            });
        }

        let snapshot = self.table.current_assignment(&log)?;
        let assignment = &snapshot.assignment;
        if assignment.is_empty() {
            return Err(GroupError::EmptyAssignment { log });
        }

        // Markers sit at the write offset of each segment right now.
        let mut markers = BTreeMap::new();
        for segment_id in assignment.segments() {
            let position = self.log.current_write_offset(&log, segment_id).await?;
            markers.insert(segment_id, position);
        }

        let round_id = self.next_round_id;
        self.next_round_id = round_id.next();

        let state = RoundState::start(log.clone(), round_id, assignment.segments());
        let (status_tx, status_rx) = watch::channel(RoundStatus::Active);

        for (&segment_id, &position) in &markers {
            let marker = Marker {
                round_id,
                segment_id,
                position,
            };
            let delivered = assignment.owner(segment_id).is_some_and(|owner| {
                self.mailboxes
                    .get(&log)
                    .and_then(|m| m.get(&owner))
                    .is_some_and(|mailbox| mailbox.send(marker).is_ok())
            });
            if !delivered {
                warn!(
                    log = %log,
                    round_id = %round_id,
                    segment_id = %segment_id,
                    "Segment owner has no mailbox; round cannot complete"
                );
            }
        }

        info!(
            log = %log,
            round_id = %round_id,
            segments = markers.len(),
            "Started checkpoint round"
        );

        let deadline = Instant::now() + self.round_timeout;
        self.active.insert(
            log,
            ActiveRound {
                state,
                status_tx,
                deadline,
            },
        );
        Ok(RoundStart {
            round_id,
            markers,
            status: status_rx,
        })
    }

    fn rebalance(&mut self, log: &LogName, assignment: Assignment) -> GroupResult<Rebalance> {
        let rebalance = self.table.on_rebalance(log, assignment)?;
        if self.active.contains_key(log) {
            self.apply(
                log,
                RoundEvent::Rebalance {
                    changed: rebalance.changed.clone(),
                },
            );
        }
        Ok(rebalance)
    }

    fn on_report(&mut self, report: Report) {
        let is_current = self
            .active
            .get(&report.log)
            .is_some_and(|r| r.state.round_id() == report.round_id);
        if !is_current {
            debug!(
                log = %report.log,
                round_id = %report.round_id,
                segment_id = %report.segment_id,
                "Ignored report for inactive round"
            );
            return;
        }

        self.apply(
            &report.log,
            RoundEvent::Report {
                segment_id: report.segment_id,
                offset: report.offset,
            },
        );
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.active.values().map(|round| round.deadline).min()
    }

    /// Aborts every active round past its deadline.
    fn expire_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<LogName> = self
            .active
            .iter()
            .filter(|(_, round)| round.deadline <= now)
            .map(|(log, _)| log.clone())
            .collect();

        for log in overdue {
            warn!(log = %log, "Round deadline passed");
            self.apply(&log, RoundEvent::Timeout);
        }
    }

    /// Applies an event to the log's active round and publishes the result.
    fn apply(&mut self, log: &LogName, event: RoundEvent) {
        let Some(active) = self.active.get_mut(log) else {
            return;
        };
        let round_id = active.state.round_id();

        match active.state.apply(event) {
            Transition::Ignored(reason) => {
                debug!(log = %log, round_id = %round_id, ?reason, "Ignored round event");
            }
            Transition::Recorded { remaining } => {
                debug!(log = %log, round_id = %round_id, remaining, "Recorded report");
            }
            Transition::Completed(cut) => {
                info!(log = %log, round_id = %round_id, cut = %cut, "Round complete");
                self.latest_cuts.insert(log.clone(), cut);
                self.finish(log);
            }
            Transition::Aborted(reason) => {
                info!(log = %log, round_id = %round_id, %reason, "Round aborted");
                self.finish(log);
            }
        }
    }

    /// Moves a terminal round from active to history.
    fn finish(&mut self, log: &LogName) {
        let Some(active) = self.active.remove(log) else {
            return;
        };
        let status = active.state.status().clone();

        // TigerStyle: Assert precondition.
        assert!(status.is_terminal(), "finishing an active round");

        active.status_tx.send_replace(status.clone());
        if self.finished.len() == MAX_FINISHED_ROUNDS {
            self.finished.pop_front();
        }
        self.finished
            .push_back((log.clone(), active.state.round_id(), status));
    }

    fn status_of(&self, log: &LogName, round_id: RoundId) -> Option<RoundStatus> {
        if let Some(active) = self.active.get(log) {
            if active.state.round_id() == round_id {
                return Some(active.state.status().clone());
            }
        }
        self.finished
            .iter()
            .rev()
            .find(|(l, r, _)| l == log && *r == round_id)
            .map(|(_, _, status)| status.clone())
    }
}

/// Spawns the barrier coordinator and returns a handle to it.
///
/// # Arguments
///
/// * `log` - Partition log used to place markers.
/// * `table` - Assignment table the coordinator rebalances.
/// * `channel_capacity` - Command channel capacity.
/// * `round_timeout` - Deadline after which an active round is aborted.
#[must_use]
pub fn spawn_coordinator<L: PartitionLog + 'static>(
    log: Arc<L>,
    table: Arc<AssignmentTable>,
    channel_capacity: usize,
    round_timeout: Duration,
) -> CoordinatorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(channel_capacity);
    let (report_tx, report_rx) = mpsc::unbounded_channel();

    let actor = CoordinatorActor {
        cmd_rx,
        report_rx,
        log,
        table,
        mailboxes: HashMap::new(),
        active: HashMap::new(),
        finished: VecDeque::new(),
        latest_cuts: HashMap::new(),
        next_round_id: RoundId::new(1),
        round_timeout,
    };
    tokio::spawn(actor.run());

    CoordinatorHandle { cmd_tx, report_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::AbortReason;
    use bytes::Bytes;
    use cutpoint_log::{LogAdmin, SimulatedPartitionLog};

    fn name() -> LogName {
        LogName::parse("s/l").unwrap()
    }

    fn s(id: u64) -> SegmentId {
        SegmentId::new(id)
    }

    fn r(id: u64) -> ReaderId {
        ReaderId::new(id)
    }

    struct Fixture {
        coordinator: CoordinatorHandle,
        mailboxes: Vec<mpsc::UnboundedReceiver<Marker>>,
    }

    /// Two segments with 100 and 50 records, S0 → R0, S1 → R1.
    async fn setup() -> Fixture {
        setup_with_timeout(Duration::from_secs(5)).await
    }

    async fn setup_with_timeout(round_timeout: Duration) -> Fixture {
        let log = Arc::new(SimulatedPartitionLog::new(42));
        let segments = log.create_log(&name(), 2).await.unwrap();
        for (segment, count) in segments.iter().zip([100u64, 50]) {
            for i in 0..count {
                log.append(&name(), *segment, Bytes::from(i.to_string()))
                    .await
                    .unwrap();
            }
        }

        let table = Arc::new(AssignmentTable::new());
        table.register_log(&name());
        let coordinator = spawn_coordinator(log, table, 16, round_timeout);

        let mut mailboxes = Vec::new();
        for id in 0..3 {
            let (tx, rx) = mpsc::unbounded_channel();
            coordinator.register_reader(&name(), r(id), tx).await.unwrap();
            mailboxes.push(rx);
        }

        let assignment = Assignment::from_pairs([(s(0), r(0)), (s(1), r(1))]).unwrap();
        coordinator.rebalance(&name(), assignment).await.unwrap();
        Fixture {
            coordinator,
            mailboxes,
        }
    }

    fn report(round_id: RoundId, segment: u64, offset: u64) -> Report {
        Report {
            log: name(),
            round_id,
            segment_id: s(segment),
            offset: Offset::new(offset),
        }
    }

    #[tokio::test]
    async fn test_round_completes_with_all_reports() {
        let mut fx = setup().await;
        let mut round = fx.coordinator.start_round(&name()).await.unwrap();
        let round_id = round.round_id();
        assert_eq!(round_id, RoundId::new(1));
        assert_eq!(round.markers().get(&s(0)), Some(&Offset::new(100)));
        assert_eq!(round.markers().get(&s(1)), Some(&Offset::new(50)));

        // Markers went to the owners only.
        let m0 = fx.mailboxes[0].recv().await.unwrap();
        assert_eq!((m0.segment_id, m0.position), (s(0), Offset::new(100)));
        let m1 = fx.mailboxes[1].recv().await.unwrap();
        assert_eq!((m1.segment_id, m1.position), (s(1), Offset::new(50)));
        assert!(fx.mailboxes[2].try_recv().is_err());

        fx.coordinator.report(report(round_id, 0, 100));
        let status = fx.coordinator.round_status(&name(), round_id).await.unwrap();
        assert_eq!(status, Some(RoundStatus::Active));

        fx.coordinator.report(report(round_id, 1, 50));
        let cut = round.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(cut.to_string(), "s/l{0:100, 1:50}");
        assert_eq!(fx.coordinator.latest_cut(&name()).await.unwrap(), Some(cut));
    }

    #[tokio::test]
    async fn test_rebalance_between_reports_aborts() {
        let fx = setup().await;
        let mut round = fx.coordinator.start_round(&name()).await.unwrap();
        let round_id = round.round_id();

        fx.coordinator.report(report(round_id, 0, 100));
        let moved = Assignment::from_pairs([(s(0), r(0)), (s(1), r(2))]).unwrap();
        fx.coordinator.rebalance(&name(), moved).await.unwrap();

        // Late report is ignored.
        fx.coordinator.report(report(round_id, 1, 50));

        let err = round.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(
            err,
            GroupError::RoundAborted {
                round_id,
                reason: AbortReason::Rebalance { segment_id: s(1) },
            }
        );
        assert_eq!(fx.coordinator.latest_cut(&name()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_one_active_round_per_log() {
        let fx = setup().await;
        let first = fx.coordinator.start_round(&name()).await.unwrap();
        let err = fx.coordinator.start_round(&name()).await.unwrap_err();
        assert_eq!(
            err,
            GroupError::RoundInProgress {
                log: name(),
                round_id: first.round_id(),
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_aborts_and_frees_log() {
        let fx = setup().await;
        let mut round = fx.coordinator.start_round(&name()).await.unwrap();
        let err = round.wait(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(
            err,
            GroupError::RoundAborted {
                reason: AbortReason::Timeout,
                ..
            }
        ));

        // A fresh round gets a new, larger id.
        let next = fx.coordinator.start_round(&name()).await.unwrap();
        assert!(next.round_id() > round.round_id());
    }

    #[tokio::test]
    async fn test_unwatched_round_expires_at_deadline() {
        let fx = setup_with_timeout(Duration::from_millis(50)).await;
        let round = fx.coordinator.start_round(&name()).await.unwrap();
        let round_id = round.round_id();
        drop(round);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            fx.coordinator.round_status(&name(), round_id).await.unwrap(),
            Some(RoundStatus::Aborted(AbortReason::Timeout))
        );

        // The log is free again.
        let next = fx.coordinator.start_round(&name()).await.unwrap();
        assert!(next.round_id() > round_id);
    }

    #[tokio::test]
    async fn test_report_before_deadline_completes() {
        let fx = setup_with_timeout(Duration::from_millis(200)).await;
        let mut round = fx.coordinator.start_round(&name()).await.unwrap();
        fx.coordinator.report(report(round.round_id(), 0, 100));
        fx.coordinator.report(report(round.round_id(), 1, 50));

        let cut = round.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(cut.to_string(), "s/l{0:100, 1:50}");

        // The old deadline passing does not touch the finished round.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            fx.coordinator.round_status(&name(), round.round_id()).await.unwrap(),
            Some(RoundStatus::Complete(cut))
        );
    }

    #[tokio::test]
    async fn test_empty_assignment_rejected() {
        let fx = setup().await;
        fx.coordinator
            .rebalance(&name(), Assignment::new())
            .await
            .unwrap();
        assert_eq!(
            fx.coordinator.start_round(&name()).await.unwrap_err(),
            GroupError::EmptyAssignment { log: name() }
        );
    }

    #[tokio::test]
    async fn test_duplicate_reader_and_shutdown() {
        let fx = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            fx.coordinator.register_reader(&name(), r(0), tx).await,
            Err(GroupError::DuplicateReader { reader_id: r(0) })
        );

        let mut round = fx.coordinator.start_round(&name()).await.unwrap();
        fx.coordinator.shutdown().await;
        let err = round.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            GroupError::RoundAborted {
                reason: AbortReason::Shutdown,
                ..
            }
        ));
        assert_eq!(
            fx.coordinator.latest_cut(&name()).await,
            Err(GroupError::CoordinatorShutdown)
        );
    }
}
