//! In-memory partition log for deterministic simulation testing.
//!
//! Clones share state via `Arc`, so a writer task, the reader group and
//! the test body can all hold handles to the same log.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use cutpoint_core::{Limits, LogName, Offset, Record, SegmentId};
use tracing::{debug, info};

use crate::error::{LogError, LogResult};
use crate::log::{LogAdmin, PartitionLog};

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated log.
#[derive(Debug, Clone, Default)]
pub struct LogFaultConfig {
    /// Probability of read operations failing (0.0 - 1.0).
    pub read_fail_rate: f64,
    /// Probability of truncate operations failing (0.0 - 1.0).
    pub truncate_fail_rate: f64,
    /// Force next read to fail (one-shot).
    pub force_read_fail: bool,
    /// Force next truncate to fail (one-shot).
    pub force_truncate_fail: bool,
    /// Force next append to fail (one-shot).
    pub force_append_fail: bool,
}

impl LogFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            read_fail_rate: 0.0,
            truncate_fail_rate: 0.0,
            force_read_fail: false,
            force_truncate_fail: false,
            force_append_fail: false,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            read_fail_rate: 0.02,
            truncate_fail_rate: 0.05,
            force_read_fail: false,
            force_truncate_fail: false,
            force_append_fail: false,
        }
    }

    /// Builder: set read fail rate.
    #[must_use]
    pub const fn with_read_fail_rate(mut self, rate: f64) -> Self {
        self.read_fail_rate = rate;
        self
    }

    /// Builder: set truncate fail rate.
    #[must_use]
    pub const fn with_truncate_fail_rate(mut self, rate: f64) -> Self {
        self.truncate_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// State
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct SegmentState {
    /// First readable offset (truncation point).
    base_offset: Offset,
    /// Records from `base_offset` up to the write offset.
    records: VecDeque<Bytes>,
}

impl SegmentState {
    const fn new() -> Self {
        Self {
            base_offset: Offset::earliest(),
            records: VecDeque::new(),
        }
    }

    fn write_offset(&self) -> Offset {
        Offset::new(self.base_offset.get() + self.records.len() as u64)
    }
}

#[derive(Debug)]
struct LogState {
    /// Segments keyed by id; ids are handed out in creation order.
    segments: BTreeMap<SegmentId, SegmentState>,
    next_segment_id: SegmentId,
    sealed: bool,
}

impl LogState {
    fn segment(&self, log: &LogName, segment_id: SegmentId) -> LogResult<&SegmentState> {
        self.segments
            .get(&segment_id)
            .ok_or_else(|| LogError::SegmentNotFound {
                log: log.clone(),
                segment_id,
            })
    }

    fn segment_mut(
        &mut self,
        log: &LogName,
        segment_id: SegmentId,
    ) -> LogResult<&mut SegmentState> {
        self.segments
            .get_mut(&segment_id)
            .ok_or_else(|| LogError::SegmentNotFound {
                log: log.clone(),
                segment_id,
            })
    }

    fn add_segments(&mut self, count: u32) -> Vec<SegmentId> {
        let mut added = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = self.next_segment_id;
            self.segments.insert(id, SegmentState::new());
            self.next_segment_id = id.next();
            added.push(id);
        }
        added
    }
}

// -----------------------------------------------------------------------------
// Simulated Partition Log
// -----------------------------------------------------------------------------

/// In-memory simulated partition log for DST.
///
/// Supports deterministic fault injection for testing error paths.
#[derive(Debug, Clone)]
pub struct SimulatedPartitionLog {
    logs: Arc<Mutex<BTreeMap<LogName, LogState>>>,
    limits: Limits,
    fault_config: Arc<Mutex<LogFaultConfig>>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedPartitionLog {
    /// Creates a new simulated log with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, LogFaultConfig::none())
    }

    /// Creates a simulated log with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: LogFaultConfig) -> Self {
        Self {
            logs: Arc::new(Mutex::new(BTreeMap::new())),
            limits: Limits::default(),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Builder: use explicit limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> MutexGuard<'_, LogFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Returns the number of records currently retained in a segment
    /// (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn retained_records(&self, log: &LogName, segment_id: SegmentId) -> Option<u64> {
        let logs = self.logs.lock().expect("logs lock poisoned");
        logs.get(log)
            .and_then(|state| state.segments.get(&segment_id))
            .map(|segment| segment.records.len() as u64)
    }

    fn lock_logs(&self) -> MutexGuard<'_, BTreeMap<LogName, LogState>> {
        self.logs.lock().expect("logs lock poisoned")
    }

    /// Deterministic RNG: `(seed + counter) * M` for reproducible faults.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    /// Checks one-shot and probabilistic faults for an operation.
    fn check_fault(&self, operation: &'static str) -> LogResult<()> {
        let rate = {
            let mut config = self.fault_config();
            let forced = match operation {
                "read_from" => std::mem::take(&mut config.force_read_fail),
                "truncate_below" => std::mem::take(&mut config.force_truncate_fail),
                "append" => std::mem::take(&mut config.force_append_fail),
                _ => false,
            };
            if forced {
                return Err(LogError::Io {
                    operation,
                    message: "simulated failure (forced)".into(),
                });
            }
            match operation {
                "read_from" => config.read_fail_rate,
                "truncate_below" => config.truncate_fail_rate,
                _ => 0.0,
            }
        };

        if self.should_inject_fault(rate) {
            return Err(LogError::Io {
                operation,
                message: "simulated failure (random)".into(),
            });
        }
        Ok(())
    }
}

fn log_not_found(log: &LogName) -> LogError {
    LogError::LogNotFound { log: log.clone() }
}

#[async_trait]
impl PartitionLog for SimulatedPartitionLog {
    async fn append(
        &self,
        log: &LogName,
        segment_id: SegmentId,
        payload: Bytes,
    ) -> LogResult<Offset> {
        self.check_fault("append")?;

        let max = u64::from(self.limits.max_record_bytes);
        if payload.len() as u64 > max {
            return Err(LogError::RecordTooLarge {
                size: payload.len() as u64,
                max,
            });
        }

        let mut logs = self.lock_logs();
        let state = logs.get_mut(log).ok_or_else(|| log_not_found(log))?;
        if state.sealed {
            return Err(LogError::Sealed { log: log.clone() });
        }
        let segment = state.segment_mut(log, segment_id)?;
        let offset = segment.write_offset();
        segment.records.push_back(payload);
        Ok(offset)
    }

    async fn read_from(
        &self,
        log: &LogName,
        segment_id: SegmentId,
        offset: Offset,
    ) -> LogResult<Option<Record>> {
        self.check_fault("read_from")?;

        let logs = self.lock_logs();
        let state = logs.get(log).ok_or_else(|| log_not_found(log))?;
        let segment = state.segment(log, segment_id)?;

        if offset < segment.base_offset {
            return Err(LogError::Truncated {
                segment_id,
                requested: offset,
                first_available: segment.base_offset,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = (offset.get() - segment.base_offset.get()) as usize;
        Ok(segment
            .records
            .get(index)
            .map(|payload| Record::new(segment_id, offset, payload.clone())))
    }

    async fn truncate_below(
        &self,
        log: &LogName,
        segment_id: SegmentId,
        offset: Offset,
    ) -> LogResult<()> {
        self.check_fault("truncate_below")?;

        let mut logs = self.lock_logs();
        let state = logs.get_mut(log).ok_or_else(|| log_not_found(log))?;
        let segment = state.segment_mut(log, segment_id)?;

        let write_offset = segment.write_offset();
        if offset > write_offset {
            return Err(LogError::OffsetBeyondEnd {
                segment_id,
                offset,
                write_offset,
            });
        }
        if offset <= segment.base_offset {
            return Ok(());
        }

        #[allow(clippy::cast_possible_truncation)]
        let drop_count = (offset.get() - segment.base_offset.get()) as usize;
        segment.records.drain(..drop_count);
        segment.base_offset = offset;

        // TigerStyle: Assert postcondition.
        assert_eq!(segment.write_offset(), write_offset, "truncation moved write offset");

        debug!(log = %log, segment_id = %segment_id, offset = offset.get(), "Truncated segment");
        Ok(())
    }

    async fn current_write_offset(
        &self,
        log: &LogName,
        segment_id: SegmentId,
    ) -> LogResult<Offset> {
        let logs = self.lock_logs();
        let state = logs.get(log).ok_or_else(|| log_not_found(log))?;
        Ok(state.segment(log, segment_id)?.write_offset())
    }

    async fn first_available_offset(
        &self,
        log: &LogName,
        segment_id: SegmentId,
    ) -> LogResult<Offset> {
        let logs = self.lock_logs();
        let state = logs.get(log).ok_or_else(|| log_not_found(log))?;
        Ok(state.segment(log, segment_id)?.base_offset)
    }

    async fn segments(&self, log: &LogName) -> LogResult<Vec<SegmentId>> {
        let logs = self.lock_logs();
        let state = logs.get(log).ok_or_else(|| log_not_found(log))?;
        Ok(state.segments.keys().copied().collect())
    }
}

#[async_trait]
impl LogAdmin for SimulatedPartitionLog {
    async fn create_log(&self, log: &LogName, segment_count: u32) -> LogResult<Vec<SegmentId>> {
        if segment_count == 0 || segment_count > self.limits.max_segments_per_log {
            return Err(LogError::TooManySegments {
                log: log.clone(),
                count: segment_count,
                max: self.limits.max_segments_per_log,
            });
        }

        let mut logs = self.lock_logs();
        if logs.contains_key(log) {
            return Err(LogError::LogExists { log: log.clone() });
        }

        let mut state = LogState {
            segments: BTreeMap::new(),
            next_segment_id: SegmentId::new(0),
            sealed: false,
        };
        let segments = state.add_segments(segment_count);
        logs.insert(log.clone(), state);

        info!(log = %log, segments = segment_count, "Created log");
        Ok(segments)
    }

    async fn add_segments(&self, log: &LogName, count: u32) -> LogResult<Vec<SegmentId>> {
        let mut logs = self.lock_logs();
        let state = logs.get_mut(log).ok_or_else(|| log_not_found(log))?;
        if state.sealed {
            return Err(LogError::Sealed { log: log.clone() });
        }

        #[allow(clippy::cast_possible_truncation)]
        let total = state.segments.len() as u32 + count;
        if total > self.limits.max_segments_per_log {
            return Err(LogError::TooManySegments {
                log: log.clone(),
                count: total,
                max: self.limits.max_segments_per_log,
            });
        }

        let added = state.add_segments(count);
        info!(log = %log, added = count, total, "Scaled up log");
        Ok(added)
    }

    async fn seal_log(&self, log: &LogName) -> LogResult<()> {
        let mut logs = self.lock_logs();
        let state = logs.get_mut(log).ok_or_else(|| log_not_found(log))?;
        if !state.sealed {
            state.sealed = true;
            info!(log = %log, "Sealed log");
        }
        Ok(())
    }

    async fn is_sealed(&self, log: &LogName) -> LogResult<bool> {
        let logs = self.lock_logs();
        let state = logs.get(log).ok_or_else(|| log_not_found(log))?;
        Ok(state.sealed)
    }

    async fn delete_log(&self, log: &LogName) -> LogResult<()> {
        let mut logs = self.lock_logs();
        let state = logs.get(log).ok_or_else(|| log_not_found(log))?;
        if !state.sealed {
            return Err(LogError::NotSealed { log: log.clone() });
        }
        logs.remove(log);
        info!(log = %log, "Deleted log");
        Ok(())
    }

    async fn list_logs(&self) -> LogResult<Vec<LogName>> {
        Ok(self.lock_logs().keys().cloned().collect())
    }
}
