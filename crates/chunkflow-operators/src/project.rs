//! Column projection pass-through.

use chunkflow_core::error::{Error, Result};
use chunkflow_core::types::RowBatch;

use crate::collector::SpillingCollector;
use crate::filter::{PassOutput, PassStats};
use crate::traits::BatchConsumer;

/// Keeps only the requested columns, in the requested order, under the same
/// spill policy as the filter.
pub struct ColumnProjection {
    columns: Vec<String>,
    collector: SpillingCollector,
    stats: PassStats,
}

impl ColumnProjection {
    pub fn new(columns: Vec<String>, collector: SpillingCollector) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Config("projection needs at least one column".into()));
        }
        let collector = collector.with_columns(columns.clone());
        Ok(Self {
            columns,
            collector,
            stats: PassStats::default(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl BatchConsumer for ColumnProjection {
    type Output = PassOutput;

    fn name(&self) -> &'static str {
        "project"
    }

    fn consume(&mut self, batch: RowBatch) -> Result<()> {
        let projected = batch.project(&self.columns)?;
        self.stats.batches += 1;
        self.stats.rows_read += batch.num_rows() as u64;
        self.stats.rows_out += projected.num_rows() as u64;
        self.collector.push(projected)
    }

    fn finish(self) -> Result<PassOutput> {
        let mut stats = self.stats;
        stats.spills = self.collector.spill_count() as u64;
        stats.peak_buffered_bytes = self.collector.peak_bytes();
        let result = self.collector.finish()?;
        tracing::info!(
            columns = ?self.columns,
            rows = stats.rows_out,
            spills = stats.spills,
            "projection complete"
        );
        Ok(PassOutput { result, stats })
    }
}
