//! Reader group facade.
//!
//! A `ReaderGroup` ties the pieces together for one log: it owns the
//! assignment table entry, the coordinator, the truncation service and
//! the membership list, and hands out `GroupReader`s.
//!
//! # Example
//!
//! ```ignore
//! let group = ReaderGroup::create(
//!     ReaderGroupId::new(1),
//!     name.clone(),
//!     Arc::clone(&log),
//!     Arc::new(InMemoryCutStore::new(64)),
//!     GroupConfig::default(),
//! )
//! .await?;
//!
//! let mut reader = group.create_reader(ReaderId::new(1)).await?;
//! tokio::spawn(async move { while reader.advance().await.is_ok() {} });
//!
//! let cut = group.initiate_checkpoint("nightly").await?;
//! group.truncate_to_checkpoint("nightly").await?;
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use cutpoint_core::{LogName, ReaderGroupId, ReaderId};
use cutpoint_log::PartitionLog;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::assignment::{Assignment, AssignmentTable, Rebalance};
use crate::config::GroupConfig;
use crate::coordinator::{spawn_coordinator, CoordinatorHandle, RoundHandle};
use crate::cut::StreamCut;
use crate::error::{GroupError, GroupResult};
use crate::reader::{GroupReader, PositionBoard, ReaderChannels};
use crate::store::{CutStore, TruncationRecord};
use crate::truncation::{TruncationOutcome, TruncationService};

/// A group of readers consuming one log.
pub struct ReaderGroup<L: PartitionLog + 'static, S: CutStore> {
    group_id: ReaderGroupId,
    log_name: LogName,
    log: Arc<L>,
    store: Arc<S>,
    table: Arc<AssignmentTable>,
    coordinator: CoordinatorHandle,
    truncation: TruncationService<L, S>,
    board: PositionBoard,
    /// Members. Held across a membership change and its rebalance.
    readers: Mutex<BTreeSet<ReaderId>>,
    config: GroupConfig,
}

impl<L: PartitionLog + 'static, S: CutStore> ReaderGroup<L, S> {
    /// Forms a group over an existing log.
    ///
    /// The group starts with no readers and an empty assignment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad config, or `Log` if the log
    /// does not exist.
    pub async fn create(
        group_id: ReaderGroupId,
        log_name: LogName,
        log: Arc<L>,
        store: Arc<S>,
        config: GroupConfig,
    ) -> GroupResult<Self> {
        config.validate()?;
        let segments = log.segments(&log_name).await?;

        let table = Arc::new(AssignmentTable::new());
        table.register_log(&log_name);
        let coordinator = spawn_coordinator(
            Arc::clone(&log),
            Arc::clone(&table),
            config.coordinator_channel_capacity,
            config.round_timeout,
        );
        let truncation = TruncationService::new(Arc::clone(&log), Arc::clone(&store));

        info!(
            group_id = %group_id,
            log = %log_name,
            segments = segments.len(),
            "Created reader group"
        );

        Ok(Self {
            group_id,
            log_name,
            log,
            store,
            table,
            coordinator,
            truncation,
            board: PositionBoard::new(),
            readers: Mutex::new(BTreeSet::new()),
            config,
        })
    }

    /// Returns the group id.
    #[must_use]
    pub const fn group_id(&self) -> ReaderGroupId {
        self.group_id
    }

    /// Returns the log this group reads.
    #[must_use]
    pub const fn log_name(&self) -> &LogName {
        &self.log_name
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Returns the coordinator handle.
    #[must_use]
    pub const fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Returns the current assignment.
    ///
    /// # Errors
    ///
    /// Returns `LogNotRegistered` after shutdown.
    pub fn assignment(&self) -> GroupResult<Assignment> {
        Ok(self.table.current_assignment(&self.log_name)?.assignment.clone())
    }

    /// Returns the current members in id order.
    pub async fn readers(&self) -> Vec<ReaderId> {
        self.readers.lock().await.iter().copied().collect()
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Adds a reader to the group and rebalances.
    ///
    /// # Errors
    ///
    /// - `DuplicateReader` if the id is already a member.
    /// - `TooManyReaders` if the group is full.
    pub async fn create_reader(&self, reader_id: ReaderId) -> GroupResult<GroupReader<L>> {
        let mut readers = self.readers.lock().await;
        if readers.contains(&reader_id) {
            return Err(GroupError::DuplicateReader { reader_id });
        }
        #[allow(clippy::cast_possible_truncation)]
        let count = readers.len() as u32;
        if count >= self.config.max_readers {
            return Err(GroupError::TooManyReaders {
                count,
                max: self.config.max_readers,
            });
        }

        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        self.coordinator
            .register_reader(&self.log_name, reader_id, mailbox_tx)
            .await?;
        let assignment = self.table.subscribe(&self.log_name)?;

        readers.insert(reader_id);
        if let Err(err) = self.rebalance_members(&readers).await {
            readers.remove(&reader_id);
            self.coordinator
                .unregister_reader(&self.log_name, reader_id)
                .await?;
            return Err(err);
        }

        info!(group_id = %self.group_id, reader_id = %reader_id, "Reader joined group");

        let channels = ReaderChannels {
            assignment,
            mailbox: mailbox_rx,
            reports: self.coordinator.report_sender(),
            board: self.board.clone(),
        };
        Ok(GroupReader::new(
            reader_id,
            self.log_name.clone(),
            Arc::clone(&self.log),
            channels,
            self.config.reader_poll_interval,
        ))
    }

    /// Removes a reader and hands its segments to the remaining members.
    ///
    /// The removed reader's next `advance` fails with `ReaderClosed`.
    ///
    /// # Errors
    ///
    /// Returns `ReaderNotFound` if the id is not a member.
    pub async fn remove_reader(&self, reader_id: ReaderId) -> GroupResult<()> {
        let mut readers = self.readers.lock().await;
        if !readers.remove(&reader_id) {
            return Err(GroupError::ReaderNotFound { reader_id });
        }

        self.rebalance_members(&readers).await?;
        self.coordinator
            .unregister_reader(&self.log_name, reader_id)
            .await?;

        info!(group_id = %self.group_id, reader_id = %reader_id, "Reader left group");
        Ok(())
    }

    /// Applies an explicit assignment.
    ///
    /// # Errors
    ///
    /// - `IncompleteAssignment` unless the assignment covers exactly the
    ///   log's segments.
    /// - `ReaderNotFound` if an owner is not a member.
    pub async fn rebalance(&self, assignment: Assignment) -> GroupResult<Rebalance> {
        let readers = self.readers.lock().await;
        let segments: BTreeSet<_> = self.log.segments(&self.log_name).await?.into_iter().collect();

        if let Some(&segment_id) = segments.difference(&assignment.segments()).next() {
            return Err(GroupError::IncompleteAssignment {
                log: self.log_name.clone(),
                segment_id,
                reason: "is not assigned",
            });
        }
        if let Some(&segment_id) = assignment.segments().difference(&segments).next() {
            return Err(GroupError::IncompleteAssignment {
                log: self.log_name.clone(),
                segment_id,
                reason: "does not exist",
            });
        }
        if let Some(&reader_id) = assignment.readers().difference(&readers).next() {
            return Err(GroupError::ReaderNotFound { reader_id });
        }

        self.coordinator.rebalance(&self.log_name, assignment).await
    }

    /// Picks up segments added by scaling the log and rebalances.
    ///
    /// # Errors
    ///
    /// Returns `Log` if the segment list cannot be read.
    pub async fn refresh_segments(&self) -> GroupResult<Rebalance> {
        let readers = self.readers.lock().await;
        self.rebalance_members(&readers).await
    }

    async fn rebalance_members(&self, readers: &BTreeSet<ReaderId>) -> GroupResult<Rebalance> {
        let segments = self.log.segments(&self.log_name).await?;
        let previous = self.table.current_assignment(&self.log_name)?;
        let readers: Vec<ReaderId> = readers.iter().copied().collect();
        let assignment = Assignment::balanced(&previous.assignment, &segments, &readers);
        self.coordinator.rebalance(&self.log_name, assignment).await
    }

    // -------------------------------------------------------------------------
    // Checkpoints
    // -------------------------------------------------------------------------

    /// Starts a single checkpoint round. Callers wait on the handle.
    ///
    /// The round aborts after `round_timeout` whether or not anyone waits,
    /// so a dropped handle does not block later rounds.
    ///
    /// # Errors
    ///
    /// Returns `RoundInProgress` or `EmptyAssignment`.
    pub async fn start_round(&self) -> GroupResult<RoundHandle> {
        self.coordinator.start_round(&self.log_name).await
    }

    /// Runs checkpoint rounds until one completes and records the cut
    /// under `name`.
    ///
    /// Aborted rounds are retried with a fresh round id, up to
    /// `max_round_attempts`. Readers must keep advancing meanwhile.
    ///
    /// # Errors
    ///
    /// - `InvalidCutName` for an empty name.
    /// - `RoundAborted` from the last attempt if every attempt aborted.
    /// - `RoundInProgress` if a round started elsewhere is still active.
    pub async fn initiate_checkpoint(&self, name: &str) -> GroupResult<StreamCut> {
        if name.is_empty() {
            return Err(GroupError::InvalidCutName);
        }

        let mut last_err = GroupError::CoordinatorShutdown;
        for attempt in 1..=self.config.max_round_attempts {
            let mut round = self.start_round().await?;
            match round.wait(self.config.round_timeout).await {
                Ok(cut) => {
                    self.store.record(name, cut.clone()).await?;
                    info!(
                        group_id = %self.group_id,
                        name,
                        round_id = %round.round_id(),
                        cut = %cut,
                        "Checkpoint recorded"
                    );
                    return Ok(cut);
                }
                Err(err @ GroupError::RoundAborted { .. }) => {
                    warn!(
                        group_id = %self.group_id,
                        name,
                        attempt,
                        error = %err,
                        "Checkpoint round aborted"
                    );
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    /// Returns the cut recorded under `name`.
    ///
    /// # Errors
    ///
    /// Returns `CutNotFound` if nothing is recorded under the name.
    pub async fn checkpoint(&self, name: &str) -> GroupResult<StreamCut> {
        self.store.get(name).await
    }

    /// Lists recorded checkpoint names.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn checkpoints(&self) -> GroupResult<Vec<String>> {
        self.store.list().await
    }

    /// Returns the most recent cut completed by any round of this group.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorShutdown` after shutdown.
    pub async fn latest_cut(&self) -> GroupResult<Option<StreamCut>> {
        self.coordinator.latest_cut(&self.log_name).await
    }

    // -------------------------------------------------------------------------
    // Truncation
    // -------------------------------------------------------------------------

    /// Truncates the log to the checkpoint recorded under `name`.
    ///
    /// # Errors
    ///
    /// `CutNotFound`, or any error of [`TruncationService::truncate`].
    pub async fn truncate_to_checkpoint(&self, name: &str) -> GroupResult<TruncationOutcome> {
        let cut = self.store.get(name).await?;
        self.truncate(&cut).await
    }

    /// Truncates the log to `cut`.
    ///
    /// # Errors
    ///
    /// See [`TruncationService::truncate`].
    pub async fn truncate(&self, cut: &StreamCut) -> GroupResult<TruncationOutcome> {
        self.truncation.truncate(&self.log_name, cut).await
    }

    /// Returns the log's truncation record.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn truncation_record(&self) -> GroupResult<TruncationRecord> {
        self.store.truncation_record(&self.log_name).await
    }

    /// Tears the group down. Active rounds abort; readers observe
    /// `ReaderClosed`.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
        self.table.remove_log(&self.log_name);
        info!(group_id = %self.group_id, log = %self.log_name, "Reader group shut down");
    }
}
