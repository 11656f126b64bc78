//! Grouped streaming aggregation.
//!
//! Each batch is first grouped locally into one partial accumulator set per
//! group; the partials are then merged into the running state with the
//! function-specific rule (see `Accumulator::merge`). Memory is
//! O(distinct groups), independent of the row count.

pub mod accumulator;

pub use accumulator::{Accumulator, AggFunc, SumState};

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::types::{Column, GroupKey, RowBatch};
use chunkflow_mem::MemoryGovernor;

use crate::traits::BatchConsumer;

/// One `func(column)` output of an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggSpec {
    pub column: String,
    pub func: AggFunc,
    pub alias: Option<String>,
}

impl AggSpec {
    pub fn new(column: impl Into<String>, func: AggFunc) -> Self {
        Self {
            column: column.into(),
            func,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Parse `func(column)`, e.g. `mean(l_quantity)`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || Error::Config(format!("malformed aggregate '{s}' (expected func(column))"));
        let (func, rest) = s.split_once('(').ok_or_else(bad)?;
        let column = rest.strip_suffix(')').ok_or_else(bad)?.trim();
        if column.is_empty() {
            return Err(bad());
        }
        Ok(Self::new(column, func.parse()?))
    }

    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}({})", self.func, self.column))
    }
}

impl fmt::Display for AggSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.func, self.column)
    }
}

/// Final grouped result: group columns first, then one column per spec.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutput {
    pub group_by: Vec<String>,
    pub batch: RowBatch,
}

impl AggregateOutput {
    pub fn num_groups(&self) -> usize {
        self.batch.num_rows()
    }

    /// Rows ordered by group key, for deterministic comparison.
    pub fn sorted(mut self) -> Result<RowBatch> {
        self.batch.sort_by_columns(&self.group_by)?;
        Ok(self.batch)
    }

    pub fn into_batch(self) -> RowBatch {
        self.batch
    }
}

pub struct StreamingAggregator {
    group_by: Vec<String>,
    specs: Vec<AggSpec>,
    /// Group key -> position in `keys`/`states`, which keep first-seen order.
    index: HashMap<GroupKey, usize>,
    keys: Vec<GroupKey>,
    states: Vec<Vec<Accumulator>>,
    governor: Option<MemoryGovernor>,
    warned: bool,
    rows: u64,
    skipped: u64,
}

impl StreamingAggregator {
    /// Validates the request eagerly; nothing is read yet.
    pub fn new(group_by: Vec<String>, specs: Vec<AggSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::Config("aggregation needs at least one function".into()));
        }
        let mut names: Vec<String> = group_by.clone();
        for spec in &specs {
            let name = spec.output_name();
            if names.contains(&name) {
                return Err(Error::Config(format!("duplicate output column '{name}'")));
            }
            names.push(name);
        }
        Ok(Self {
            group_by,
            specs,
            index: HashMap::new(),
            keys: Vec::new(),
            states: Vec::new(),
            governor: None,
            warned: false,
            rows: 0,
            skipped: 0,
        })
    }

    /// Warn once if the group state outgrows this governor's ceiling.
    /// Aggregation state is never spilled.
    pub fn with_governor(mut self, governor: MemoryGovernor) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Columns the aggregation reads, for source projection.
    pub fn required_columns(&self) -> Vec<String> {
        let mut cols = self.group_by.clone();
        for spec in &self.specs {
            if !cols.contains(&spec.column) {
                cols.push(spec.column.clone());
            }
        }
        cols
    }

    pub fn num_groups(&self) -> usize {
        self.keys.len()
    }

    fn fresh_states(&self) -> Vec<Accumulator> {
        self.specs.iter().map(|s| Accumulator::new(s.func)).collect()
    }

    fn column_indices(batch: &RowBatch, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                batch
                    .column_index(n)
                    .ok_or_else(|| Error::NotFound(format!("column '{n}'")))
            })
            .collect()
    }

    /// Local group-by over one batch.
    fn partial(&mut self, batch: &RowBatch) -> Result<Vec<(GroupKey, Vec<Accumulator>)>> {
        let key_idx = Self::column_indices(batch, &self.group_by)?;
        let spec_cols: Vec<String> = self.specs.iter().map(|s| s.column.clone()).collect();
        let val_idx = Self::column_indices(batch, &spec_cols)?;

        let mut local: HashMap<GroupKey, usize> = HashMap::new();
        let mut out: Vec<(GroupKey, Vec<Accumulator>)> = Vec::new();
        for row in 0..batch.num_rows() {
            let key = GroupKey(
                key_idx
                    .iter()
                    .map(|&c| batch.columns[c].values[row].clone())
                    .collect(),
            );
            let slot = match local.get(&key) {
                Some(&slot) => slot,
                None => {
                    local.insert(key.clone(), out.len());
                    out.push((key, self.fresh_states()));
                    out.len() - 1
                }
            };
            for (acc, &c) in out[slot].1.iter_mut().zip(&val_idx) {
                let v = &batch.columns[c].values[row];
                if !acc.update(v) && !v.is_missing() {
                    self.skipped += 1;
                }
            }
        }
        Ok(out)
    }

    fn state_bytes(&self) -> u64 {
        self.keys
            .iter()
            .zip(&self.states)
            .map(|(k, s)| {
                48 + k.values().iter().map(|v| v.estimated_bytes()).sum::<usize>()
                    + s.iter().map(Accumulator::estimated_bytes).sum::<usize>()
            })
            .sum::<usize>() as u64
    }
}

impl BatchConsumer for StreamingAggregator {
    type Output = AggregateOutput;

    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn consume(&mut self, batch: RowBatch) -> Result<()> {
        self.rows += batch.num_rows() as u64;
        for (key, partial) in self.partial(&batch)? {
            match self.index.get(&key) {
                Some(&slot) => {
                    for (running, incoming) in self.states[slot].iter_mut().zip(partial) {
                        running.merge(incoming)?;
                    }
                }
                None => {
                    self.index.insert(key.clone(), self.keys.len());
                    self.keys.push(key);
                    self.states.push(partial);
                }
            }
        }

        if let Some(gov) = &self.governor {
            let bytes = self.state_bytes();
            if gov.observe(bytes) && !self.warned {
                self.warned = true;
                tracing::warn!(
                    groups = self.keys.len(),
                    state_bytes = bytes,
                    ceiling_bytes = gov.ceiling_bytes(),
                    "aggregation state exceeds memory ceiling"
                );
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<AggregateOutput> {
        if self.group_by.is_empty() && self.keys.is_empty() {
            let fresh = self.fresh_states();
            self.keys.push(GroupKey(Vec::new()));
            self.states.push(fresh);
        }
        if self.skipped > 0 {
            tracing::debug!(skipped = self.skipped, "non-numeric values skipped");
        }

        let mut columns: Vec<Column> = self
            .group_by
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(self.keys.len())))
            .collect();
        columns.extend(
            self.specs
                .iter()
                .map(|s| Column::new(s.output_name(), Vec::with_capacity(self.keys.len()))),
        );

        let width = self.group_by.len();
        for (key, states) in self.keys.into_iter().zip(self.states) {
            for (col, v) in columns.iter_mut().zip(key.0) {
                col.values.push(v);
            }
            for (col, acc) in columns[width..].iter_mut().zip(&states) {
                col.values.push(acc.finalize());
            }
        }

        let batch = RowBatch::try_new(columns)?;
        tracing::info!(
            groups = batch.num_rows(),
            rows = self.rows,
            aggregates = ?self.specs.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            "aggregation complete"
        );
        Ok(AggregateOutput {
            group_by: self.group_by,
            batch,
        })
    }
}
