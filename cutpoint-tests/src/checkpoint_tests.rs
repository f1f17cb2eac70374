//! Checkpoint round tests.
//!
//! Reader groups over the simulated log with readers running in their own
//! tasks. Covers:
//! - Cuts matching marker positions and write offsets
//! - Marker ordering relative to records, with concurrent writers
//! - Rounds aborted by rebalance and timeout, then retried
//! - Rounds nobody waits on expiring at the coordinator's deadline
//! - Segment handoff and scale-up
//! - Shutdown

// Test-specific lint allowances.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cutpoint_core::{Offset, ReaderId, RoundId, SegmentId};
use cutpoint_group::{
    AbortReason, GroupConfig, GroupError, ReadEvent, Reader, RoundStatus, StreamCut,
};
use cutpoint_log::{LogAdmin, PartitionLog, SimulatedPartitionLog};

use crate::scenarios::{
    append_records, build_log, create_group, seeds::REGRESSION_SEEDS, spawn_reader,
    spawn_readers, test_log_name, write_offsets, ReaderRun,
};

/// Asserts that a reader's checkpoint notifications split each segment's
/// records exactly at the reported offset.
///
/// Only valid for readers that consumed their segments from offset zero.
fn assert_marker_order(run: &ReaderRun) {
    let mut delivered: BTreeMap<(RoundId, SegmentId), Offset> = BTreeMap::new();
    let mut seen: BTreeMap<SegmentId, Offset> = BTreeMap::new();
    for event in &run.events {
        match event {
            ReadEvent::Checkpoint {
                round_id,
                segment_id,
                offset,
            } => {
                // Nothing at or past the checkpoint was returned before it.
                if let Some(&highest) = seen.get(segment_id) {
                    assert!(
                        highest < *offset,
                        "record {}@{} returned before {} checkpoint at {}",
                        segment_id,
                        highest,
                        round_id,
                        offset
                    );
                }
                delivered.insert((*round_id, *segment_id), *offset);
            }
            ReadEvent::Record(record) => {
                let highest = seen.entry(record.segment_id).or_insert(record.offset);
                *highest = (*highest).max(record.offset);
                for (&(round_id, segment_id), &offset) in &delivered {
                    if segment_id == record.segment_id {
                        assert!(
                            record.offset >= offset,
                            "record {}@{} read after {} marker at {}",
                            record.segment_id,
                            record.offset,
                            round_id,
                            offset
                        );
                    }
                }
            }
        }
    }

    // Readers here start at offset zero, so every record below a delivered
    // marker was read exactly once before it.
    let records = run.records();
    for (&(_, segment_id), &offset) in &delivered {
        let below = records
            .iter()
            .filter(|(s, o)| *s == segment_id && *o < offset)
            .count();
        assert_eq!(below as u64, offset.get(), "{} below {}", segment_id, offset);
    }
}

async fn join_all(tasks: Vec<tokio::task::JoinHandle<ReaderRun>>) -> Vec<ReaderRun> {
    let mut runs = Vec::new();
    for task in tasks {
        runs.push(task.await.expect("reader task panicked"));
    }
    runs
}

// ============================================================================
// Completed Rounds
// ============================================================================

#[tokio::test]
async fn test_checkpoint_two_readers_cut_at_write_offsets() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(42));
    let segments = build_log(&log, &name, &[100, 50]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
    let tasks = spawn_readers(&group, 2).await.unwrap();

    let cut = group.initiate_checkpoint("c1").await.unwrap();

    let expected = StreamCut::from_pairs(
        name.clone(),
        [
            (segments[0], Offset::new(100)),
            (segments[1], Offset::new(50)),
        ],
    );
    assert_eq!(cut, expected);
    assert_eq!(group.checkpoint("c1").await.unwrap(), expected);
    assert_eq!(group.checkpoints().await.unwrap(), vec!["c1".to_string()]);
    assert_eq!(group.latest_cut().await.unwrap(), Some(expected));

    group.shutdown().await;
    let runs = join_all(tasks).await;

    let mut checkpoints = Vec::new();
    let mut records = Vec::new();
    for run in &runs {
        assert!(matches!(run.stopped_by, GroupError::ReaderClosed { .. }));
        assert_marker_order(run);
        checkpoints.extend(run.checkpoints());
        records.extend(run.records());
    }

    // One notification per segment, each carrying the cut offset.
    assert_eq!(checkpoints.len(), 2);
    for event in checkpoints {
        let ReadEvent::Checkpoint {
            round_id,
            segment_id,
            offset,
        } = event
        else {
            unreachable!();
        };
        assert_eq!(round_id, RoundId::new(1));
        assert_eq!(cut.get(segment_id), Some(offset));
    }

    // Every record read exactly once.
    records.sort();
    records.dedup();
    assert_eq!(records.len(), 150);
}

#[tokio::test]
async fn test_checkpoint_cut_equals_markers() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(7));
    build_log(&log, &name, &[10, 20, 30]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
    let tasks = spawn_readers(&group, 2).await.unwrap();

    let mut round = group.start_round().await.unwrap();
    let markers = round.markers().clone();
    assert_eq!(markers.len(), 3);

    let cut = round.wait(Duration::from_secs(2)).await.unwrap();
    assert_eq!(cut.positions(), &markers);
    assert_eq!(round.status(), RoundStatus::Complete(cut));

    group.shutdown().await;
    join_all(tasks).await;
}

#[tokio::test]
async fn test_checkpoint_with_concurrent_writers() {
    for &seed in REGRESSION_SEEDS {
        let name = test_log_name();
        let log = Arc::new(SimulatedPartitionLog::new(seed));
        let segments = build_log(&log, &name, &[5, 5]).await.unwrap();
        let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
        let tasks = spawn_readers(&group, 2).await.unwrap();

        let writer = {
            let log = Arc::clone(&log);
            let name = name.clone();
            let segments = segments.clone();
            tokio::spawn(async move {
                for i in 0..200_u64 {
                    let segment_id = segments[(i % 2) as usize];
                    append_records(&log, &name, segment_id, 1).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let before: BTreeMap<_, _> = write_offsets(&log, &name)
            .await
            .unwrap()
            .into_iter()
            .collect();
        let cut = group.initiate_checkpoint("live").await.unwrap();
        let after: BTreeMap<_, _> = write_offsets(&log, &name)
            .await
            .unwrap()
            .into_iter()
            .collect();

        for (segment_id, offset) in cut.iter() {
            assert!(offset >= before[&segment_id], "seed {}: cut behind start", seed);
            assert!(offset <= after[&segment_id], "seed {}: cut ahead of log", seed);
        }

        writer.await.unwrap();
        group.shutdown().await;
        for run in join_all(tasks).await {
            assert_marker_order(&run);
        }
    }
}

#[tokio::test]
async fn test_checkpoint_successive_cuts_never_regress() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(99));
    let segments = build_log(&log, &name, &[3, 3]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
    let tasks = spawn_readers(&group, 2).await.unwrap();

    let mut cuts = Vec::new();
    for i in 0..3 {
        for &segment_id in &segments {
            append_records(&log, &name, segment_id, 4).await.unwrap();
        }
        cuts.push(group.initiate_checkpoint(&format!("cp-{i}")).await.unwrap());
    }

    for pair in cuts.windows(2) {
        assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
    }
    assert_eq!(group.checkpoints().await.unwrap().len(), 3);
    assert_eq!(group.latest_cut().await.unwrap(), cuts.last().cloned());

    group.shutdown().await;
    join_all(tasks).await;
}

// ============================================================================
// Aborted Rounds
// ============================================================================

#[tokio::test]
async fn test_checkpoint_rebalance_aborts_round() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(3));
    build_log(&log, &name, &[10, 10]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();

    // An idle reader owns both segments; the round cannot complete.
    let idle = group.create_reader(ReaderId::new(0)).await.unwrap();
    let mut first = group.start_round().await.unwrap();
    assert_eq!(first.status(), RoundStatus::Active);

    // Adding a reader moves one pending segment.
    let second_reader = group.create_reader(ReaderId::new(1)).await.unwrap();
    let err = first.wait(Duration::from_secs(2)).await.unwrap_err();
    let GroupError::RoundAborted { round_id, reason } = err else {
        panic!("expected RoundAborted, got {err:?}");
    };
    assert_eq!(round_id, first.round_id());
    assert!(matches!(reason, AbortReason::Rebalance { .. }));
    assert!(matches!(first.status(), RoundStatus::Aborted(_)));

    // Once readers run, a fresh round completes.
    let tasks = vec![spawn_reader(idle), spawn_reader(second_reader)];
    let mut retry = group.start_round().await.unwrap();
    assert!(retry.round_id() > first.round_id());
    let cut = retry.wait(Duration::from_secs(2)).await.unwrap();
    assert_eq!(cut.len(), 2);

    group.shutdown().await;
    for run in join_all(tasks).await {
        // The stale marker of the aborted round may still be delivered, but
        // only the retry's report counted.
        assert_marker_order(&run);
    }
}

#[tokio::test]
async fn test_checkpoint_timeout_exhausts_attempts() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(5));
    build_log(&log, &name, &[4]).await.unwrap();
    let config = GroupConfig::for_testing()
        .with_round_timeout(Duration::from_millis(50))
        .with_max_round_attempts(2);
    let group = create_group(&log, &name, config).await.unwrap();
    let _idle = group.create_reader(ReaderId::new(0)).await.unwrap();

    let err = group.initiate_checkpoint("never").await.unwrap_err();
    assert!(matches!(
        err,
        GroupError::RoundAborted {
            reason: AbortReason::Timeout,
            ..
        }
    ));

    // Nothing recorded for a failed checkpoint.
    assert!(matches!(
        group.checkpoint("never").await,
        Err(GroupError::CutNotFound { .. })
    ));
    assert_eq!(group.latest_cut().await.unwrap(), None);

    group.shutdown().await;
}

#[tokio::test]
async fn test_checkpoint_one_round_at_a_time() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(11));
    build_log(&log, &name, &[4]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
    let _idle = group.create_reader(ReaderId::new(0)).await.unwrap();

    let mut round = group.start_round().await.unwrap();
    assert!(matches!(
        group.start_round().await,
        Err(GroupError::RoundInProgress { .. })
    ));

    let err = round.wait(Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(
        err,
        GroupError::RoundAborted {
            reason: AbortReason::Timeout,
            ..
        }
    ));

    // The slot is free again after the abort.
    let next = group.start_round().await.unwrap();
    assert!(next.round_id() > round.round_id());

    group.shutdown().await;
}

#[tokio::test]
async fn test_checkpoint_after_abandoned_round() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(13));
    build_log(&log, &name, &[4, 4]).await.unwrap();
    let config = GroupConfig::for_testing().with_round_timeout(Duration::from_millis(100));
    let group = create_group(&log, &name, config).await.unwrap();
    let reader = group.create_reader(ReaderId::new(0)).await.unwrap();

    // Nobody waits on this round and the reader is not running.
    let abandoned = group.start_round().await.unwrap();
    let round_id = abandoned.round_id();
    drop(abandoned);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        group.coordinator().round_status(&name, round_id).await.unwrap(),
        Some(RoundStatus::Aborted(AbortReason::Timeout))
    );

    let task = spawn_reader(reader);
    let cut = group.initiate_checkpoint("after-abandoned").await.unwrap();
    let offsets: Vec<u64> = cut.iter().map(|(_, offset)| offset.get()).collect();
    assert_eq!(offsets, vec![4, 4]);

    group.shutdown().await;
    let run = task.await.unwrap();
    assert_marker_order(&run);
}

#[tokio::test]
async fn test_checkpoint_rejects_empty_name() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(1));
    build_log(&log, &name, &[1]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();

    assert!(matches!(
        group.initiate_checkpoint("").await,
        Err(GroupError::InvalidCutName)
    ));
    group.shutdown().await;
}

// ============================================================================
// Membership Changes
// ============================================================================

#[tokio::test]
async fn test_checkpoint_covers_added_segments() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(21));
    build_log(&log, &name, &[6, 6]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
    let tasks = spawn_readers(&group, 2).await.unwrap();

    let before = group.initiate_checkpoint("before").await.unwrap();
    assert_eq!(before.len(), 2);

    let added = log.add_segments(&name, 1).await.unwrap();
    append_records(&log, &name, added[0], 9).await.unwrap();
    let rebalance = group.refresh_segments().await.unwrap();
    assert!(rebalance.changed.contains(&added[0]));

    let after = group.initiate_checkpoint("after").await.unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(after.get(added[0]), Some(Offset::new(9)));
    assert!(!before.is_comparable_with(&after));

    group.shutdown().await;
    join_all(tasks).await;
}

#[tokio::test]
async fn test_handoff_resumes_from_released_position() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(8));
    let segments = build_log(&log, &name, &[10]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();

    let mut first = group.create_reader(ReaderId::new(0)).await.unwrap();
    for expected in 0..6 {
        let ReadEvent::Record(record) = first.advance().await.unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(record.offset, Offset::new(expected));
    }
    assert_eq!(
        first.current_read_position().get(segments[0]),
        Some(Offset::new(6))
    );

    // The segment stays with the first reader until it leaves.
    let mut second = group.create_reader(ReaderId::new(1)).await.unwrap();
    assert_eq!(group.assignment().unwrap().owner(segments[0]), Some(ReaderId::new(0)));
    group.remove_reader(ReaderId::new(0)).await.unwrap();
    assert_eq!(group.assignment().unwrap().owner(segments[0]), Some(ReaderId::new(1)));

    let ReadEvent::Record(record) = second.advance().await.unwrap() else {
        panic!("expected a record");
    };
    assert_eq!(record.offset, Offset::new(6));
    assert!(matches!(
        first.advance().await,
        Err(GroupError::ReaderClosed { .. })
    ));

    group.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_readers() {
    let name = test_log_name();
    let log = Arc::new(SimulatedPartitionLog::new(13));
    build_log(&log, &name, &[2, 2, 2]).await.unwrap();
    let group = create_group(&log, &name, GroupConfig::for_testing()).await.unwrap();
    let tasks = spawn_readers(&group, 3).await.unwrap();

    group.initiate_checkpoint("last").await.unwrap();
    group.shutdown().await;

    for run in join_all(tasks).await {
        assert!(matches!(run.stopped_by, GroupError::ReaderClosed { .. }));
        assert_eq!(run.records().len(), 2);
    }
    assert!(log.segments(&name).await.is_ok());
}
