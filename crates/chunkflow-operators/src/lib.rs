#![forbid(unsafe_code)]
//! chunkflow-operators: streaming filter, projection, aggregation, statistics.
//!
//! Design intent:
//! - Operators are synchronous `BatchConsumer`s fed one batch at a time.
//! - Filter and projection output goes through a `SpillingCollector`, so it
//!   is bounded by the `MemoryGovernor` ceiling rather than by input size.
//! - Aggregation and statistics keep O(groups) / O(reservoir) state.

pub mod aggregate;
pub mod collector;
pub mod filter;
pub mod project;
pub mod stats;
pub mod traits;

pub use aggregate::{AggFunc, AggSpec, AggregateOutput, StreamingAggregator};
pub use collector::{CollectOutput, OutputMode, SpillTarget, SpilledResult, SpillingCollector};
pub use filter::{PassOutput, PassStats, StreamingFilter};
pub use project::ColumnProjection;
pub use stats::{StatsOptions, StatsSummary, StreamingStatistics};
pub use traits::{drive, BatchConsumer};
