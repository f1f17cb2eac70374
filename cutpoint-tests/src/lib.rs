//! Cutpoint Tests - integration and deterministic simulation tests.
//!
//! Tests that span crates live here; unit tests stay inline in each crate
//! under `#[cfg(test)]`.
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `checkpoint_tests`: reader groups driving checkpoint rounds end to end
//! - `truncation_tests`: truncation against the simulated log, with faults
//! - `property_tests`: seeded randomized invariant checks
//!
//! **Support Modules**:
//! - `scenarios`: regression seeds and shared fixtures
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Property tests: `test_property_<invariant>`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod scenarios;

#[cfg(test)]
mod checkpoint_tests;
