//! Readers: sequential consumers of assigned segments.
//!
//! A reader interleaves its owned segments round-robin. Checkpoint
//! markers arrive out of band through a mailbox and are held until the
//! reader's position in the marked segment reaches the marker; the
//! reader then reports to the coordinator (fire-and-forget) and surfaces
//! a [`ReadEvent::Checkpoint`] to the caller.
//!
//! A reader never waits for a round to finish and never observes a
//! round's status.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cutpoint_core::{LogName, Offset, ReaderId, Record, RoundId, SegmentId};
use cutpoint_log::{LogError, PartitionLog};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::assignment::AssignmentSnapshot;
use crate::coordinator::{Marker, Report};
use crate::error::{GroupError, GroupResult};

// -----------------------------------------------------------------------------
// Read Position
// -----------------------------------------------------------------------------

/// Next offset to read, per owned segment.
///
/// Offsets only increase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPosition {
    offsets: BTreeMap<SegmentId, Offset>,
}

impl ReadPosition {
    /// Returns the position in a segment.
    #[must_use]
    pub fn get(&self, segment_id: SegmentId) -> Option<Offset> {
        self.offsets.get(&segment_id).copied()
    }

    /// Returns `(segment, offset)` pairs in segment id order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, Offset)> + '_ {
        self.offsets.iter().map(|(s, o)| (*s, *o))
    }

    /// Returns the number of tracked segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true if no segment is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Moves the position of a segment forward.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is below the current position.
    pub fn advance(&mut self, segment_id: SegmentId, offset: Offset) {
        let entry = self.offsets.entry(segment_id).or_insert(offset);

        // TigerStyle: Assert precondition.
        assert!(offset >= *entry, "read position moved backwards on {segment_id}");
        *entry = offset;
    }

    fn release(&mut self, segment_id: SegmentId) -> Option<Offset> {
        self.offsets.remove(&segment_id)
    }
}

// -----------------------------------------------------------------------------
// Position Board
// -----------------------------------------------------------------------------

/// Last published read position per segment, shared by a group's readers.
///
/// When a segment changes owner, the new owner resumes where the old
/// owner left off instead of replaying the segment.
#[derive(Debug, Clone, Default)]
pub struct PositionBoard {
    positions: Arc<Mutex<HashMap<SegmentId, Offset>>>,
}

impl PositionBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a position. Lower positions than the published one are ignored.
    pub fn publish(&self, segment_id: SegmentId, offset: Offset) {
        let mut positions = self
            .positions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = positions.entry(segment_id).or_insert(offset);
        *entry = (*entry).max(offset);
    }

    /// Returns the published position of a segment.
    #[must_use]
    pub fn get(&self, segment_id: SegmentId) -> Option<Offset> {
        self.positions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&segment_id)
            .copied()
    }
}

// -----------------------------------------------------------------------------
// Reader Trait
// -----------------------------------------------------------------------------

/// What `advance` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A record; the reader's position moved past it.
    Record(Record),
    /// The reader reached a checkpoint marker and reported `offset`.
    ///
    /// Every record of the segment below `offset` was returned before this
    /// event, and none at or above it.
    Checkpoint {
        /// The round.
        round_id: RoundId,
        /// The segment the marker sat in.
        segment_id: SegmentId,
        /// The reported offset.
        offset: Offset,
    },
}

/// A sequential consumer of assigned segments.
#[async_trait]
pub trait Reader: Send {
    /// Returns the next record or checkpoint notification, waiting until
    /// one is available.
    async fn advance(&mut self) -> GroupResult<ReadEvent>;

    /// Returns the reader's position in every owned segment.
    fn current_read_position(&self) -> ReadPosition;
}

// -----------------------------------------------------------------------------
// Group Reader
// -----------------------------------------------------------------------------

/// Wiring a reader needs from its group.
pub(crate) struct ReaderChannels {
    pub(crate) assignment: watch::Receiver<Arc<AssignmentSnapshot>>,
    pub(crate) mailbox: mpsc::UnboundedReceiver<Marker>,
    pub(crate) reports: mpsc::UnboundedSender<Report>,
    pub(crate) board: PositionBoard,
}

/// A reader belonging to a reader group.
pub struct GroupReader<L: PartitionLog> {
    reader_id: ReaderId,
    log_name: LogName,
    log: Arc<L>,
    channels: ReaderChannels,
    position: ReadPosition,
    /// Owned segments in id order, as of `version`.
    owned: Vec<SegmentId>,
    version: Option<u64>,
    /// Round-robin cursor into `owned`.
    cursor: usize,
    /// Markers not yet reached, per segment, in arrival order.
    markers: BTreeMap<SegmentId, VecDeque<Marker>>,
    poll_interval: Duration,
}

impl<L: PartitionLog + 'static> GroupReader<L> {
    pub(crate) fn new(
        reader_id: ReaderId,
        log_name: LogName,
        log: Arc<L>,
        channels: ReaderChannels,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reader_id,
            log_name,
            log,
            channels,
            position: ReadPosition::default(),
            owned: Vec::new(),
            version: None,
            cursor: 0,
            markers: BTreeMap::new(),
            poll_interval,
        }
    }

    /// Returns the reader id.
    #[must_use]
    pub const fn reader_id(&self) -> ReaderId {
        self.reader_id
    }

    /// Returns the segments this reader owned at its last sync.
    #[must_use]
    pub fn owned_segments(&self) -> &[SegmentId] {
        &self.owned
    }

    /// Like [`Reader::advance`], but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` if nothing arrived in time. A cancelled advance
    /// never drops a record or a marker.
    ///
    /// # Errors
    ///
    /// Same as [`Reader::advance`].
    pub async fn advance_timeout(&mut self, timeout: Duration) -> GroupResult<Option<ReadEvent>> {
        match tokio::time::timeout(timeout, self.advance()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Picks up the latest assignment.
    async fn sync_assignment(&mut self) -> GroupResult<()> {
        let snapshot = self.channels.assignment.borrow_and_update().clone();
        if self.version == Some(snapshot.version) {
            return Ok(());
        }

        let owned = snapshot.assignment.segments_of(self.reader_id);

        // Resolve start positions before touching any state.
        let mut acquired = Vec::new();
        for &segment_id in &owned {
            if self.position.get(segment_id).is_some() {
                continue;
            }
            let first = self
                .log
                .first_available_offset(&self.log_name, segment_id)
                .await?;
            let start = self.channels.board.get(segment_id).map_or(first, |p| p.max(first));
            acquired.push((segment_id, start));
        }

        for &segment_id in &self.owned {
            if owned.contains(&segment_id) {
                continue;
            }
            if let Some(offset) = self.position.release(segment_id) {
                self.channels.board.publish(segment_id, offset);
                debug!(
                    reader_id = %self.reader_id,
                    segment_id = %segment_id,
                    offset = offset.get(),
                    "Released segment"
                );
            }
            self.markers.remove(&segment_id);
        }

        for (segment_id, start) in acquired {
            self.position.advance(segment_id, start);
            debug!(
                reader_id = %self.reader_id,
                segment_id = %segment_id,
                offset = start.get(),
                "Acquired segment"
            );
        }

        self.owned = owned;
        self.cursor = 0;
        self.version = Some(snapshot.version);
        Ok(())
    }

    /// Moves queued markers into the per-segment stash.
    fn drain_mailbox(&mut self) -> GroupResult<()> {
        loop {
            match self.channels.mailbox.try_recv() {
                Ok(marker) => self.stash(marker),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(GroupError::ReaderClosed {
                        reader_id: self.reader_id,
                    });
                }
            }
        }
    }

    fn stash(&mut self, marker: Marker) {
        self.markers
            .entry(marker.segment_id)
            .or_default()
            .push_back(marker);
    }

    /// Delivers the first marker whose position the reader has reached.
    fn deliver_marker(&mut self) -> Option<ReadEvent> {
        // The assignment view is at least as new as any queued marker, so
        // markers for segments we do not own belong to aborted rounds.
        let owned = &self.owned;
        self.markers.retain(|segment_id, queue| {
            !queue.is_empty() && owned.contains(segment_id)
        });

        let segment_id = self.markers.iter().find_map(|(segment_id, queue)| {
            let reached = queue.front().is_some_and(|marker| {
                self.position
                    .get(*segment_id)
                    .is_some_and(|position| position >= marker.position)
            });
            reached.then_some(*segment_id)
        })?;
        let marker = self.markers.get_mut(&segment_id)?.pop_front()?;

        // Usually the marker position itself. Higher only if a record
        // appended while the round was starting was delivered first; the
        // report then still covers exactly what the caller has seen.
        let offset = self.position.get(segment_id)?;

        let report = Report {
            log: self.log_name.clone(),
            round_id: marker.round_id,
            segment_id,
            offset,
        };
        if self.channels.reports.send(report).is_err() {
            debug!(reader_id = %self.reader_id, "Coordinator gone; report dropped");
        }

        debug!(
            reader_id = %self.reader_id,
            round_id = %marker.round_id,
            segment_id = %segment_id,
            marker = marker.position.get(),
            offset = offset.get(),
            "Reached checkpoint marker"
        );
        Some(ReadEvent::Checkpoint {
            round_id: marker.round_id,
            segment_id,
            offset,
        })
    }

    /// Reads one record from the next segment that has data.
    ///
    /// Returns `None` without reading further if a marker arrived that the
    /// record read would have overtaken.
    async fn read_next(&mut self) -> GroupResult<Option<Record>> {
        let count = self.owned.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let segment_id = self.owned[index];
            let Some(offset) = self.position.get(segment_id) else {
                continue;
            };

            // Never read past a marker that has not been delivered.
            let blocked = self
                .markers
                .get(&segment_id)
                .and_then(VecDeque::front)
                .is_some_and(|marker| offset >= marker.position);
            if blocked {
                continue;
            }

            let result = self.log.read_from(&self.log_name, segment_id, offset).await;
            match result {
                Ok(Some(record)) => {
                    // A round may have started while the read was in flight.
                    // A record at or past its marker is left unread so the
                    // marker goes out first.
                    self.drain_mailbox()?;
                    let crossed = self
                        .markers
                        .get(&segment_id)
                        .and_then(VecDeque::front)
                        .is_some_and(|marker| record.offset >= marker.position);
                    if crossed {
                        debug!(
                            reader_id = %self.reader_id,
                            segment_id = %segment_id,
                            offset = record.offset.get(),
                            "Record past a new marker; deferring"
                        );
                        return Ok(None);
                    }

                    let next = record.next_offset();
                    self.position.advance(segment_id, next);
                    self.channels.board.publish(segment_id, next);
                    self.cursor = (index + 1) % count;
                    return Ok(Some(record));
                }
                Ok(None) => {}
                Err(LogError::Truncated {
                    first_available, ..
                }) => {
                    warn!(
                        reader_id = %self.reader_id,
                        segment_id = %segment_id,
                        requested = offset.get(),
                        first_available = first_available.get(),
                        "Read position truncated; skipping ahead"
                    );
                    self.position.advance(segment_id, first_available);
                    self.channels.board.publish(segment_id, first_available);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<L: PartitionLog + 'static> Reader for GroupReader<L> {
    async fn advance(&mut self) -> GroupResult<ReadEvent> {
        loop {
            self.sync_assignment().await?;
            self.drain_mailbox()?;

            if let Some(event) = self.deliver_marker() {
                return Ok(event);
            }
            if let Some(record) = self.read_next().await? {
                return Ok(ReadEvent::Record(record));
            }
            if let Some(event) = self.deliver_marker() {
                return Ok(event);
            }

            // Idle: wait for a marker, a rebalance or new data.
            tokio::select! {
                marker = self.channels.mailbox.recv() => match marker {
                    Some(marker) => self.stash(marker),
                    None => {
                        return Err(GroupError::ReaderClosed {
                            reader_id: self.reader_id,
                        });
                    }
                },
                changed = self.channels.assignment.changed() => {
                    if changed.is_err() {
                        return Err(GroupError::ReaderClosed {
                            reader_id: self.reader_id,
                        });
                    }
                },
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn current_read_position(&self) -> ReadPosition {
        self.position.clone()
    }
}
