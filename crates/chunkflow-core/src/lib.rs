#![forbid(unsafe_code)]
//! chunkflow-core: shared kernel for the chunkflow streaming processor.
//!
//! This crate contains only *pure* types, small helpers, and interfaces
//! that other crates build on. There is **no I/O** and **no async** here.
//!
//! Crates that use this:
//! - chunkflow-mem: memory governor and spill manager (writes `SpillManifest`s).
//! - chunkflow-io: batch sources producing `RowBatch` sequences.
//! - chunkflow-operators: streaming filter/aggregate/statistics over `RowBatch`.
//! - chunkflow-exec: drives one operator over one source and wraps telemetry.

pub mod cancel;
pub mod config;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod schema;
pub mod types;

#[cfg(feature = "arrow")]
pub mod arrow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
