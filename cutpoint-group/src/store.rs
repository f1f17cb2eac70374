//! Cut store: named cuts and per-segment truncation records.
//!
//! The store is the authority on how far each segment has been
//! truncated. Truncation records only move forward; a request that
//! would move any segment backwards is rejected as a whole.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cutpoint_core::{LogName, Offset, SegmentId};
use tracing::debug;

use crate::cut::StreamCut;
use crate::error::{GroupError, GroupResult};

// -----------------------------------------------------------------------------
// Truncation Record
// -----------------------------------------------------------------------------

/// Last offset each segment of a log was truncated to.
///
/// Segments with no entry have never been truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncationRecord {
    offsets: BTreeMap<SegmentId, Offset>,
}

impl TruncationRecord {
    /// Creates an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            offsets: BTreeMap::new(),
        }
    }

    /// Creates a record from `(segment, offset)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (SegmentId, Offset)>) -> Self {
        Self {
            offsets: pairs.into_iter().collect(),
        }
    }

    /// Returns the truncation point of a segment (earliest if never truncated).
    #[must_use]
    pub fn get(&self, segment_id: SegmentId) -> Offset {
        self.offsets
            .get(&segment_id)
            .copied()
            .unwrap_or_else(Offset::earliest)
    }

    /// Returns the recorded offsets.
    #[must_use]
    pub const fn offsets(&self) -> &BTreeMap<SegmentId, Offset> {
        &self.offsets
    }

    /// Computes the updates needed to bring this record up to `cut`.
    ///
    /// Returns only segments the cut moves forward; equal offsets need no
    /// work, so re-applying a cut plans nothing.
    ///
    /// # Errors
    ///
    /// Returns `StaleCut` for the first segment (in id order) whose cut
    /// offset lies below its truncation point.
    pub fn plan(&self, cut: &StreamCut) -> GroupResult<BTreeMap<SegmentId, Offset>> {
        let mut updates = BTreeMap::new();
        for (segment_id, requested) in cut.iter() {
            let current = self.get(segment_id);
            if requested < current {
                return Err(GroupError::StaleCut {
                    segment_id,
                    requested,
                    current,
                });
            }
            if requested > current {
                updates.insert(segment_id, requested);
            }
        }
        Ok(updates)
    }
}

// -----------------------------------------------------------------------------
// Cut Store Trait
// -----------------------------------------------------------------------------

/// Storage for named cuts and truncation records.
#[async_trait]
pub trait CutStore: Send + Sync {
    /// Records a cut under `name`, replacing any previous cut of that name.
    async fn record(&self, name: &str, cut: StreamCut) -> GroupResult<()>;

    /// Returns the cut recorded under `name`.
    async fn get(&self, name: &str) -> GroupResult<StreamCut>;

    /// Lists recorded cut names in sorted order.
    async fn list(&self) -> GroupResult<Vec<String>>;

    /// Returns the truncation record of a log.
    async fn truncation_record(&self, log: &LogName) -> GroupResult<TruncationRecord>;

    /// Moves truncation points forward.
    ///
    /// All-or-nothing: if any update would regress a segment, nothing is
    /// changed and `StaleCut` is returned. Returns the updated record.
    async fn advance_truncation(
        &self,
        log: &LogName,
        updates: &BTreeMap<SegmentId, Offset>,
    ) -> GroupResult<TruncationRecord>;

    /// Drops the truncation record and every named cut of a deleted log.
    ///
    /// A log later created under the same name starts untruncated.
    async fn forget_log(&self, log: &LogName) -> GroupResult<()>;
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the in-memory cut store.
#[derive(Debug, Clone, Default)]
pub struct CutStoreFaultConfig {
    /// Probability of `record` failing (0.0 - 1.0).
    pub record_fail_rate: f64,
    /// Force next `record` to fail (one-shot).
    pub force_record_fail: bool,
    /// Force next `advance_truncation` to fail (one-shot).
    pub force_advance_fail: bool,
}

impl CutStoreFaultConfig {
    /// No faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the `record` failure rate.
    #[must_use]
    pub const fn with_record_fail_rate(mut self, rate: f64) -> Self {
        self.record_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// In-Memory Cut Store
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    cuts: BTreeMap<String, StreamCut>,
    truncation: HashMap<LogName, TruncationRecord>,
}

/// In-memory cut store.
///
/// Clones share the same underlying data (via `Arc`).
/// Supports fault injection for DST.
#[derive(Debug, Clone)]
pub struct InMemoryCutStore {
    state: Arc<Mutex<StoreState>>,
    max_cuts: u32,
    fault_config: Arc<Mutex<CutStoreFaultConfig>>,
    seed: u64,
    counter: Arc<AtomicU64>,
}

impl InMemoryCutStore {
    /// Creates a store retaining at most `max_cuts` named cuts.
    #[must_use]
    pub fn new(max_cuts: u32) -> Self {
        Self::with_faults(max_cuts, 0, CutStoreFaultConfig::none())
    }

    /// Creates a store with fault injection enabled.
    #[must_use]
    pub fn with_faults(max_cuts: u32, seed: u64, config: CutStoreFaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            max_cuts,
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the fault configuration for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> MutexGuard<'_, CutStoreFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Returns the number of named cuts.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn cut_count(&self) -> usize {
        self.lock_state().cuts.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("store lock poisoned")
    }

    /// Deterministic RNG based on seed and counter.
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
            .wrapping_mul(0x517c_c1b7_2722_0a95);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }
}

// Allow significant_drop_tightening since this is test-only simulation code.
#[allow(clippy::significant_drop_tightening)]
#[async_trait]
impl CutStore for InMemoryCutStore {
    async fn record(&self, name: &str, cut: StreamCut) -> GroupResult<()> {
        if name.is_empty() {
            return Err(GroupError::InvalidCutName);
        }

        let rate = {
            let mut config = self.fault_config();
            if std::mem::take(&mut config.force_record_fail) {
                return Err(GroupError::Io {
                    operation: "cut_record",
                    message: "simulated failure (forced)".into(),
                });
            }
            config.record_fail_rate
        };
        if self.should_inject_fault(rate) {
            return Err(GroupError::Io {
                operation: "cut_record",
                message: "simulated failure (random)".into(),
            });
        }

        let mut state = self.lock_state();
        if !state.cuts.contains_key(name) {
            #[allow(clippy::cast_possible_truncation)]
            let count = state.cuts.len() as u32;
            if count >= self.max_cuts {
                return Err(GroupError::TooManyCuts {
                    count,
                    max: self.max_cuts,
                });
            }
        }

        debug!(name, cut = %cut, "Recorded cut");
        state.cuts.insert(name.to_string(), cut);
        Ok(())
    }

    async fn get(&self, name: &str) -> GroupResult<StreamCut> {
        self.lock_state()
            .cuts
            .get(name)
            .cloned()
            .ok_or_else(|| GroupError::CutNotFound {
                name: name.to_string(),
            })
    }

    async fn list(&self) -> GroupResult<Vec<String>> {
        Ok(self.lock_state().cuts.keys().cloned().collect())
    }

    async fn truncation_record(&self, log: &LogName) -> GroupResult<TruncationRecord> {
        Ok(self
            .lock_state()
            .truncation
            .get(log)
            .cloned()
            .unwrap_or_default())
    }

    async fn advance_truncation(
        &self,
        log: &LogName,
        updates: &BTreeMap<SegmentId, Offset>,
    ) -> GroupResult<TruncationRecord> {
        if std::mem::take(&mut self.fault_config().force_advance_fail) {
            return Err(GroupError::Io {
                operation: "advance_truncation",
                message: "simulated failure (forced)".into(),
            });
        }

        let mut state = self.lock_state();
        let record = state.truncation.entry(log.clone()).or_default();

        // Validate everything before mutating anything.
        for (&segment_id, &requested) in updates {
            let current = record.get(segment_id);
            if requested < current {
                return Err(GroupError::StaleCut {
                    segment_id,
                    requested,
                    current,
                });
            }
        }
        for (&segment_id, &offset) in updates {
            record.offsets.insert(segment_id, offset);
        }

        Ok(record.clone())
    }

    async fn forget_log(&self, log: &LogName) -> GroupResult<()> {
        let mut state = self.lock_state();
        state.truncation.remove(log);
        let before = state.cuts.len();
        state.cuts.retain(|_, cut| cut.log() != log);
        debug!(log = %log, cuts = before - state.cuts.len(), "Forgot log");
        Ok(())
    }
}
