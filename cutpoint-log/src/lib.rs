//! Cutpoint Log - the partition log collaborator.
//!
//! Cutpoint does not store log data. It consumes a partitioned,
//! append-only log through two narrow traits:
//!
//! - [`PartitionLog`]: per-segment reads, truncation and write offsets.
//! - [`LogAdmin`]: create/scale/seal/delete, used by administrative tooling.
//!
//! [`SimulatedPartitionLog`] implements both in memory with deterministic
//! fault injection, so the reader group machinery can be exercised and
//! tested without a storage service.
//!
//! # Example
//!
//! ```ignore
//! use cutpoint_core::{LogName, Offset};
//! use cutpoint_log::{LogAdmin, PartitionLog, SimulatedPartitionLog};
//!
//! let log = SimulatedPartitionLog::new(42);
//! let name = LogName::parse("examples/orders")?;
//! let segments = log.create_log(&name, 2).await?;
//!
//! log.append(&name, segments[0], "hello".into()).await?;
//! let record = log.read_from(&name, segments[0], Offset::new(0)).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod log;
mod simulated;

pub use error::{LogError, LogResult};
pub use log::{LogAdmin, PartitionLog};
pub use simulated::{LogFaultConfig, SimulatedPartitionLog};
