//! Reader groups, checkpoint barriers and safe truncation for cutpoint.
//!
//! A group of readers consumes a partitioned log. This crate lets the
//! group agree on a consistent stream cut (one offset per segment)
//! without pausing writers, and then discard everything below that cut.
//!
//! # Overview
//!
//! - **Assignment table**: which reader owns which segment. Every change
//!   is a whole-table replacement.
//! - **Readers**: consume owned segments round-robin and report when they
//!   reach a checkpoint marker.
//! - **Coordinator**: an actor driving checkpoint rounds. A round places a
//!   marker at the current write offset of every assigned segment and
//!   completes once every segment has reported. A rebalance touching a
//!   pending segment aborts it.
//! - **Cut store**: named cuts plus per-segment truncation records that
//!   never move backwards.
//! - **Truncation service**: validates a cut against the truncation record
//!   and the log, then truncates.
//!
//! # Example
//!
//! ```ignore
//! use cutpoint_group::{GroupConfig, InMemoryCutStore, Reader, ReaderGroup};
//!
//! let group = ReaderGroup::create(group_id, name, log, store, GroupConfig::default()).await?;
//! let mut reader = group.create_reader(ReaderId::new(1)).await?;
//! tokio::spawn(async move {
//!     while let Ok(event) = reader.advance().await {
//!         // Process records; checkpoint events need no handling.
//!     }
//! });
//!
//! let cut = group.initiate_checkpoint("before-migration").await?;
//! group.truncate_to_checkpoint("before-migration").await?;
//! ```
//!
//! # Testing
//!
//! [`InMemoryCutStore`] and `cutpoint_log::SimulatedPartitionLog` provide
//! deterministic fault injection for DST testing.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Allow these for cleaner code in this crate.
#![allow(clippy::module_name_repetitions)]

mod assignment;
mod config;
mod coordinator;
mod cut;
mod error;
mod group;
mod reader;
mod round;
mod store;
mod truncation;

// Re-export public API.
pub use assignment::{Assignment, AssignmentSnapshot, AssignmentTable, Rebalance};
pub use config::GroupConfig;
pub use coordinator::{spawn_coordinator, CoordinatorHandle, Marker, Report, RoundHandle};
pub use cut::StreamCut;
pub use error::{GroupError, GroupResult};
pub use group::ReaderGroup;
pub use reader::{GroupReader, PositionBoard, ReadEvent, ReadPosition, Reader};
pub use round::{AbortReason, IgnoreReason, RoundEvent, RoundState, RoundStatus, Transition};
pub use store::{CutStore, CutStoreFaultConfig, InMemoryCutStore, TruncationRecord};
pub use truncation::{TruncationOutcome, TruncationService};
