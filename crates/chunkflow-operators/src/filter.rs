//! Streaming row filter.
//!
//! Applies a predicate per batch and hands the matches to a
//! `SpillingCollector`, so the result can exceed memory.

use serde::{Deserialize, Serialize};

use chunkflow_core::error::Result;
use chunkflow_core::expr::Predicate;
use chunkflow_core::types::RowBatch;

use crate::collector::{CollectOutput, SpillingCollector};
use crate::traits::BatchConsumer;

/// Counters reported alongside a filter or projection result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub rows_read: u64,
    pub rows_out: u64,
    pub batches: u64,
    pub spills: u64,
    pub peak_buffered_bytes: u64,
}

#[derive(Debug)]
pub struct PassOutput {
    pub result: CollectOutput,
    pub stats: PassStats,
}

pub struct StreamingFilter {
    predicate: Predicate,
    collector: SpillingCollector,
    stats: PassStats,
}

impl StreamingFilter {
    pub fn new(predicate: Predicate, collector: SpillingCollector) -> Self {
        Self {
            predicate,
            collector,
            stats: PassStats::default(),
        }
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }
}

impl BatchConsumer for StreamingFilter {
    type Output = PassOutput;

    fn name(&self) -> &'static str {
        "filter"
    }

    fn consume(&mut self, batch: RowBatch) -> Result<()> {
        let mask = self.predicate.evaluate(&batch)?;
        let matched = batch.filter(&mask)?;

        self.stats.batches += 1;
        self.stats.rows_read += batch.num_rows() as u64;
        self.stats.rows_out += matched.num_rows() as u64;

        self.collector.push(matched)
    }

    fn finish(self) -> Result<PassOutput> {
        let mut stats = self.stats;
        stats.spills = self.collector.spill_count() as u64;
        stats.peak_buffered_bytes = self.collector.peak_bytes();
        let result = self.collector.finish()?;
        tracing::info!(
            predicate = ?self.predicate,
            rows_read = stats.rows_read,
            rows_matched = stats.rows_out,
            spills = stats.spills,
            "filter complete"
        );
        Ok(PassOutput { result, stats })
    }
}
