//! Streaming summary statistics for one numeric column.
//!
//! Moments are accumulated exactly (`count`, `sum`, `sum_sq`, `min`, `max`).
//! Quantiles come from a capped sample: each batch contributes at most
//! `sample_per_batch` randomly chosen values until the reservoir holds
//! `reservoir_capacity`, after which nothing more is added. The sample is
//! therefore biased toward early batches and the quantiles are approximate.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::types::RowBatch;

use crate::traits::BatchConsumer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsOptions {
    pub reservoir_capacity: usize,
    pub sample_per_batch: usize,
    /// Extra quantiles as fractions in `[0, 1]`.
    pub percentiles: Vec<f64>,
    pub seed: Option<u64>,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            reservoir_capacity: 10_000,
            sample_per_batch: 1_000,
            percentiles: Vec::new(),
            seed: None,
        }
    }
}

impl StatsOptions {
    pub fn validate(&self) -> Result<()> {
        if self.reservoir_capacity == 0 {
            return Err(Error::Config("reservoir_capacity must be > 0".into()));
        }
        if self.sample_per_batch == 0 {
            return Err(Error::Config("sample_per_batch must be > 0".into()));
        }
        if let Some(p) = self.percentiles.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(Error::Config(format!("percentile {p} outside [0, 1]")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub column: String,
    pub count: u64,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    /// `(fraction, value)` for each requested percentile.
    pub percentiles: Vec<(f64, Option<f64>)>,
    /// Rows inspected, including those without a numeric value.
    pub rows_seen: u64,
    pub missing: u64,
    pub sample_size: usize,
}

impl StatsSummary {
    /// Flat view keyed `count, mean, stddev, min, max, median, p{N}`.
    pub fn to_map(&self) -> BTreeMap<String, Option<f64>> {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Some(self.count as f64));
        map.insert("mean".to_string(), self.mean);
        map.insert("stddev".to_string(), self.stddev);
        map.insert("min".to_string(), self.min);
        map.insert("max".to_string(), self.max);
        map.insert("median".to_string(), self.median);
        for (p, v) in &self.percentiles {
            map.insert(format!("p{}", (p * 100.0).round() as u32), *v);
        }
        map
    }
}

pub struct StreamingStatistics {
    column: String,
    options: StatsOptions,
    rng: StdRng,
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    reservoir: Vec<f64>,
    rows_seen: u64,
}

impl StreamingStatistics {
    pub fn new(column: impl Into<String>, options: StatsOptions) -> Result<Self> {
        options.validate()?;
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            column: column.into(),
            rng,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            reservoir: Vec::with_capacity(options.reservoir_capacity.min(1 << 16)),
            rows_seen: 0,
            options,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    fn sample(&mut self, values: &[f64]) {
        let room = self
            .options
            .reservoir_capacity
            .saturating_sub(self.reservoir.len());
        let take = room.min(self.options.sample_per_batch).min(values.len());
        if take == 0 {
            return;
        }
        if take == values.len() {
            self.reservoir.extend_from_slice(values);
        } else {
            let picked = rand::seq::index::sample(&mut self.rng, values.len(), take);
            self.reservoir.extend(picked.into_iter().map(|i| values[i]));
        }
    }
}

impl BatchConsumer for StreamingStatistics {
    type Output = StatsSummary;

    fn name(&self) -> &'static str {
        "statistics"
    }

    fn consume(&mut self, batch: RowBatch) -> Result<()> {
        let col = batch
            .column(&self.column)
            .ok_or_else(|| Error::NotFound(format!("column '{}'", self.column)))?;
        let values: Vec<f64> = col.values.iter().filter_map(|v| v.as_f64()).collect();

        self.rows_seen += col.len() as u64;
        self.count += values.len() as u64;
        for &x in &values {
            self.sum += x;
            self.sum_sq += x * x;
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.sample(&values);
        Ok(())
    }

    fn finish(mut self) -> Result<StatsSummary> {
        self.reservoir.sort_by(f64::total_cmp);
        let (mean, stddev, min, max) = if self.count == 0 {
            (None, None, None, None)
        } else {
            let n = self.count as f64;
            let mean = self.sum / n;
            let variance = (self.sum_sq / n - mean * mean).max(0.0);
            (Some(mean), Some(variance.sqrt()), Some(self.min), Some(self.max))
        };
        let percentiles = self
            .options
            .percentiles
            .iter()
            .map(|&p| (p, quantile(&self.reservoir, p)))
            .collect();

        let summary = StatsSummary {
            median: quantile(&self.reservoir, 0.5),
            column: self.column,
            count: self.count,
            mean,
            stddev,
            min,
            max,
            percentiles,
            rows_seen: self.rows_seen,
            missing: self.rows_seen - self.count,
            sample_size: self.reservoir.len(),
        };
        tracing::info!(
            column = %summary.column,
            count = summary.count,
            missing = summary.missing,
            sample_size = summary.sample_size,
            "statistics complete"
        );
        Ok(summary)
    }
}

/// Linear interpolation between closest ranks of a sorted sample.
pub fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
        }
    }
}
