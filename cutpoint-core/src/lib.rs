//! Cutpoint Core - Strongly-typed identifiers and configuration for cutpoint.
//!
//! This crate provides the vocabulary shared by every other cutpoint crate:
//! log names, segment/reader/round identifiers, offsets, records and the
//! resource limits that bound the reader group machinery.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `SegmentId` with `ReaderId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod record;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{Offset, Record};
pub use types::{LogName, ReaderGroupId, ReaderId, RoundId, SegmentId};
