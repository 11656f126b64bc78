#![forbid(unsafe_code)]
//! chunkflow: streaming, memory-bounded batch processing.
//!
//! The layer crates are re-exported whole; the most common entry points are
//! also available at the top level and through [`prelude`].
//!
//! ```no_run
//! use chunkflow::prelude::*;
//!
//! # fn main() -> chunkflow::Result<()> {
//! let processor = Processor::local(ProcessorConfig::default(), "./data")?;
//! let totals = processor.aggregate_rows(
//!     "lineitem.parquet",
//!     &["l_returnflag".to_string()],
//!     vec![AggSpec::parse("sum(l_quantity)")?, AggSpec::parse("mean(l_extendedprice)")?],
//! )?;
//! println!("{} groups", totals.num_groups());
//! # Ok(())
//! # }
//! ```

pub use chunkflow_core;
pub use chunkflow_exec;
pub use chunkflow_io;
pub use chunkflow_mem;
pub use chunkflow_operators;

pub use chunkflow_core::error::{Error, Result};
pub use chunkflow_exec::{OperationSummary, Processor, TelemetrySink, WallClockTelemetry};

pub mod prelude {
    pub use chunkflow_core::prelude::*;
    pub use chunkflow_exec::{OperationSummary, Processor, TelemetrySink, WallClockTelemetry};
    pub use chunkflow_io::{
        BatchSource, BatchStream, InMemoryObjectClient, LocalBatchSource, OpenOptions,
        RemoteBatchClient, RemoteBatchSource,
    };
    pub use chunkflow_mem::MemoryGovernor;
    pub use chunkflow_operators::{
        AggFunc, AggSpec, AggregateOutput, CollectOutput, OutputMode, PassOutput, StatsSummary,
        SpilledResult,
    };
}
