//! Shared fixtures for integration tests.
//!
//! Builds a simulated log with data in it, a reader group over that log,
//! and reader tasks that keep advancing until their reader is closed.

use std::sync::Arc;

use bytes::Bytes;
use cutpoint_core::{LogName, Offset, ReaderGroupId, ReaderId, SegmentId};
use cutpoint_group::{
    GroupConfig, GroupError, GroupReader, GroupResult, InMemoryCutStore, ReadEvent, Reader,
    ReaderGroup,
};
use cutpoint_log::{LogAdmin, LogResult, PartitionLog, SimulatedPartitionLog};
use tokio::task::JoinHandle;

/// Test seeds for deterministic simulation.
pub mod seeds {
    /// Seeds that have found bugs in the past (regression tests).
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of random seeds to run in CI.
    pub const CI_SEED_COUNT: u32 = 100;
}

/// A reader group over the simulated log with the in-memory cut store.
pub type TestGroup = ReaderGroup<SimulatedPartitionLog, InMemoryCutStore>;

/// A group reader over the simulated log.
pub type TestReader = GroupReader<SimulatedPartitionLog>;

/// Returns the log name used by fixtures.
///
/// # Panics
///
/// Never; the name is a valid literal.
#[must_use]
pub fn test_log_name() -> LogName {
    LogName::new("tests", "orders").expect("valid log name")
}

/// Creates a log with one segment per entry of `records_per_segment`, each
/// holding that many records.
///
/// # Errors
///
/// Propagates log failures.
pub async fn build_log(
    log: &SimulatedPartitionLog,
    name: &LogName,
    records_per_segment: &[u64],
) -> LogResult<Vec<SegmentId>> {
    #[allow(clippy::cast_possible_truncation)]
    let segments = log
        .create_log(name, records_per_segment.len() as u32)
        .await?;
    for (&segment_id, &count) in segments.iter().zip(records_per_segment) {
        append_records(log, name, segment_id, count).await?;
    }
    Ok(segments)
}

/// Appends `count` records to one segment.
///
/// # Errors
///
/// Propagates log failures.
pub async fn append_records(
    log: &SimulatedPartitionLog,
    name: &LogName,
    segment_id: SegmentId,
    count: u64,
) -> LogResult<()> {
    for i in 0..count {
        log.append(name, segment_id, Bytes::from(format!("{segment_id}-{i}")))
            .await?;
    }
    Ok(())
}

/// Returns the current write offset of every segment.
///
/// # Errors
///
/// Propagates log failures.
pub async fn write_offsets(
    log: &SimulatedPartitionLog,
    name: &LogName,
) -> LogResult<Vec<(SegmentId, Offset)>> {
    let mut offsets = Vec::new();
    for segment_id in log.segments(name).await? {
        offsets.push((segment_id, log.current_write_offset(name, segment_id).await?));
    }
    Ok(offsets)
}

/// Forms a group over an existing log with a fresh cut store.
///
/// # Errors
///
/// Propagates group creation failures.
pub async fn create_group(
    log: &Arc<SimulatedPartitionLog>,
    name: &LogName,
    config: GroupConfig,
) -> GroupResult<TestGroup> {
    let store = Arc::new(InMemoryCutStore::new(config.max_cuts));
    ReaderGroup::create(ReaderGroupId::new(1), name.clone(), Arc::clone(log), store, config).await
}

/// Events a reader task saw before it stopped, and the error that stopped it.
#[derive(Debug)]
pub struct ReaderRun {
    /// Everything `advance` returned.
    pub events: Vec<ReadEvent>,
    /// The error that ended the loop.
    pub stopped_by: GroupError,
}

impl ReaderRun {
    /// Returns the `(segment, offset)` of every record seen, in order.
    #[must_use]
    pub fn records(&self) -> Vec<(SegmentId, Offset)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReadEvent::Record(record) => Some((record.segment_id, record.offset)),
                ReadEvent::Checkpoint { .. } => None,
            })
            .collect()
    }

    /// Returns the checkpoint notifications seen, in order.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<ReadEvent> {
        self.events
            .iter()
            .filter(|event| matches!(event, ReadEvent::Checkpoint { .. }))
            .cloned()
            .collect()
    }
}

/// Spawns a task that advances `reader` until it returns an error.
///
/// Readers stop with `ReaderClosed` once removed from the group or after
/// the group shuts down.
pub fn spawn_reader(mut reader: TestReader) -> JoinHandle<ReaderRun> {
    tokio::spawn(async move {
        let mut events = Vec::new();
        loop {
            match reader.advance().await {
                Ok(event) => events.push(event),
                Err(err) => {
                    return ReaderRun {
                        events,
                        stopped_by: err,
                    }
                }
            }
        }
    })
}

/// Creates `count` readers with ids `0..count` and spawns a task for each.
///
/// # Errors
///
/// Propagates membership failures.
pub async fn spawn_readers(group: &TestGroup, count: u64) -> GroupResult<Vec<JoinHandle<ReaderRun>>> {
    let mut tasks = Vec::new();
    for id in 0..count {
        let reader = group.create_reader(ReaderId::new(id)).await?;
        tasks.push(spawn_reader(reader));
    }
    Ok(tasks)
}
