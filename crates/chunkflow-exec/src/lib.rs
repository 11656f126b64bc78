#![forbid(unsafe_code)]
//! chunkflow-exec: the `Processor` front door and the telemetry contract.
//!
//! A processor owns one batch source, validated configuration, the spill
//! backend, and optional telemetry/cancellation. Each public operation drives
//! exactly one operator over the lazy batch sequence.

pub mod runtime;
pub mod telemetry;

pub use runtime::Processor;
pub use telemetry::{OperationSummary, TelemetrySink, WallClockTelemetry};
