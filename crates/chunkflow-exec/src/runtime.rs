//! Processor: drive exactly one streaming operator over one batch source.
//!
//! Behavior:
//! - Configuration is validated once, at construction.
//! - Operator requests (aggregate functions, percentiles, projections) are
//!   validated before the source is opened.
//! - The source stream is checked for cancellation once per batch.
//! - The telemetry sink wraps each whole operation.
//! - Any failure drops the operator and its partial state.

use std::path::PathBuf;
use std::sync::Arc;

use chunkflow_core::cancel::CancellationToken;
use chunkflow_core::config::ProcessorConfig;
use chunkflow_core::error::{Error, Result};
use chunkflow_core::expr::Predicate;
use chunkflow_core::types::RowBatch;
use chunkflow_mem::{MemoryGovernor, Storage};

use chunkflow_io::source::{BatchSource, LocalBatchSource, OpenOptions, RemoteBatchSource};
use chunkflow_io::storage::build_storage_from_config;
use chunkflow_io::RemoteBatchClient;

use chunkflow_operators::{
    drive, AggSpec, AggregateOutput, BatchConsumer, ColumnProjection, OutputMode, PassOutput,
    SpillTarget, SpillingCollector, StatsOptions, StatsSummary, StreamingAggregator,
    StreamingFilter, StreamingStatistics,
};

use crate::telemetry::TelemetrySink;

pub struct Processor {
    config: ProcessorConfig,
    source: Arc<dyn BatchSource>,
    spill_storage: Arc<dyn Storage>,
    spill_root: String,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    cancel: Option<CancellationToken>,
}

impl Processor {
    pub fn new(config: ProcessorConfig, source: Arc<dyn BatchSource>) -> Result<Self> {
        config.validate()?;
        let storage_cfg = config.storage_config();
        let spill_storage = build_storage_from_config(&storage_cfg)?;
        Ok(Self {
            config,
            source,
            spill_storage,
            spill_root: storage_cfg.root,
            telemetry: None,
            cancel: None,
        })
    }

    /// Processor over datasets in a local directory.
    pub fn local(config: ProcessorConfig, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let source = LocalBatchSource::new(data_dir, config.batch_size)?;
        Self::new(config, Arc::new(source))
    }

    /// Processor over an explicitly supplied remote client.
    pub fn remote(config: ProcessorConfig, client: Arc<dyn RemoteBatchClient>) -> Result<Self> {
        let source = RemoteBatchSource::new(client, config.batch_size)?;
        Self::new(config, Arc::new(source))
    }

    /// Processor over the S3-compatible store described by `config.remote`.
    #[cfg(feature = "remote")]
    pub fn remote_from_config(config: ProcessorConfig) -> Result<Self> {
        let client = chunkflow_io::ObjectStoreClient::from_config(&config.remote)?;
        Self::remote(config, Arc::new(client))
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override the spill backend selected from the configured URI.
    pub fn with_spill_storage(mut self, storage: Arc<dyn Storage>, root: impl Into<String>) -> Self {
        self.spill_storage = storage;
        self.spill_root = root.into();
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn BatchSource> {
        &self.source
    }

    pub fn spill_storage(&self) -> &Arc<dyn Storage> {
        &self.spill_storage
    }

    fn governor(&self) -> Result<MemoryGovernor> {
        MemoryGovernor::new(self.config.max_memory_mb)
    }

    fn collector(&self, dataset: &str, mode: OutputMode) -> Result<SpillingCollector> {
        let target = SpillTarget::new(
            Arc::clone(&self.spill_storage),
            self.config.spill_codec,
            self.spill_root.clone(),
        );
        Ok(SpillingCollector::new(self.governor()?, target, dataset, mode))
    }

    /// Filter `dataset` with `predicate`.
    ///
    /// `columns` limits what is read; the column a parsed predicate refers
    /// to is always read as well.
    pub fn filter_rows(
        &self,
        dataset: &str,
        predicate: Predicate,
        columns: Option<Vec<String>>,
        mode: OutputMode,
    ) -> Result<PassOutput> {
        let columns = columns.map(|mut cols| {
            if let Some(c) = predicate.referenced_column() {
                if !cols.iter().any(|x| x == c) {
                    cols.push(c.to_string());
                }
            }
            cols
        });
        let filter = StreamingFilter::new(predicate, self.collector(dataset, mode)?);
        let options = OpenOptions {
            columns,
            filter_hint: None,
        };
        self.instrumented("filter_rows", dataset, || {
            let out = self.run(filter, dataset, &options)?;
            let rows = out.stats.rows_read;
            Ok((out, rows))
        })
    }

    /// Keep only `columns`, under the same spill policy as `filter_rows`.
    pub fn select_columns(
        &self,
        dataset: &str,
        columns: &[String],
        mode: OutputMode,
    ) -> Result<PassOutput> {
        let projection = ColumnProjection::new(columns.to_vec(), self.collector(dataset, mode)?)?;
        let options = OpenOptions::all().with_columns(columns.iter().cloned());
        self.instrumented("select_columns", dataset, || {
            let out = self.run(projection, dataset, &options)?;
            let rows = out.stats.rows_read;
            Ok((out, rows))
        })
    }

    /// `GROUP BY group_by` with one output column per spec.
    pub fn aggregate_rows(
        &self,
        dataset: &str,
        group_by: &[String],
        specs: Vec<AggSpec>,
    ) -> Result<AggregateOutput> {
        let agg = StreamingAggregator::new(group_by.to_vec(), specs)?.with_governor(self.governor()?);
        let options = OpenOptions::all().with_columns(agg.required_columns());
        self.instrumented("aggregate_rows", dataset, || {
            let mut rows = 0u64;
            let out = self.run_counted(agg, dataset, &options, &mut rows)?;
            Ok((out, rows))
        })
    }

    /// Summary statistics for one column; only that column is read.
    pub fn compute_statistics(
        &self,
        dataset: &str,
        column: &str,
        percentiles: &[f64],
    ) -> Result<StatsSummary> {
        let options = StatsOptions {
            reservoir_capacity: self.config.reservoir_capacity,
            sample_per_batch: self.config.sample_per_batch,
            percentiles: percentiles.to_vec(),
            seed: self.config.seed,
        };
        let stats = StreamingStatistics::new(column, options)?;
        let open = OpenOptions::all().with_columns([column]);
        self.instrumented("compute_statistics", dataset, || {
            let out = self.run(stats, dataset, &open)?;
            let rows = out.rows_seen;
            Ok((out, rows))
        })
    }

    /// First `max_rows` rows. Reading stops, and the source handle is
    /// released, as soon as enough rows were seen.
    pub fn preview(
        &self,
        dataset: &str,
        columns: Option<Vec<String>>,
        max_rows: usize,
    ) -> Result<RowBatch> {
        let options = OpenOptions {
            columns,
            filter_hint: None,
        };
        self.instrumented("preview", dataset, || {
            let mut stream = self.source.open(dataset, &options)?;
            let mut taken: Vec<RowBatch> = Vec::new();
            let mut rows = 0usize;
            while rows < max_rows {
                self.check_cancelled(stream.batches_read())?;
                let Some(batch) = stream.next() else { break };
                let batch = batch?;
                let want = (max_rows - rows).min(batch.num_rows());
                rows += want;
                taken.push(batch.slice(0, want));
            }
            drop(stream);

            let out = if taken.is_empty() {
                RowBatch::empty(options.columns.as_deref().unwrap_or_default())
            } else {
                RowBatch::concat_rows(&taken)?
            };
            Ok((out, rows as u64))
        })
    }

    fn check_cancelled(&self, batches: usize) -> Result<()> {
        match &self.cancel {
            Some(t) if t.is_cancelled() => Err(Error::Cancelled { batches }),
            _ => Ok(()),
        }
    }

    fn run<C: BatchConsumer>(
        &self,
        consumer: C,
        dataset: &str,
        options: &OpenOptions,
    ) -> Result<C::Output> {
        let mut rows = 0;
        self.run_counted(consumer, dataset, options, &mut rows)
    }

    fn run_counted<C: BatchConsumer>(
        &self,
        consumer: C,
        dataset: &str,
        options: &OpenOptions,
        rows: &mut u64,
    ) -> Result<C::Output> {
        self.check_cancelled(0)?;
        let stream = self.source.open(dataset, options)?;
        let counted = stream.inspect(|b| {
            if let Ok(b) = b {
                *rows += b.num_rows() as u64;
            }
        });
        drive(consumer, counted, self.cancel.as_ref())
    }

    fn instrumented<T>(
        &self,
        operation: &str,
        dataset: &str,
        f: impl FnOnce() -> Result<(T, u64)>,
    ) -> Result<T> {
        let mode = self.source.name();
        if let Some(sink) = &self.telemetry {
            sink.start(operation, dataset, mode);
        }
        let result = f();
        let rows = result.as_ref().map_or(0, |(_, rows)| *rows);
        if let Some(sink) = &self.telemetry {
            sink.stop(rows);
        }
        match &result {
            Ok(_) => tracing::info!(operation, dataset, mode, rows, "operation complete"),
            Err(e) => tracing::warn!(operation, dataset, mode, error = %e, "operation failed"),
        }
        result.map(|(out, _)| out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::WallClockTelemetry;
    use chunkflow_core::types::Scalar;
    use std::path::Path;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("chunkflow-exec-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn write_orders(dir: &Path) {
        std::fs::write(
            dir.join("orders.csv"),
            "region,quantity,price\nn,10,1.5\ns,40,2.5\nn,25,3.0\ns,60,4.0\n",
        )
        .unwrap();
    }

    fn processor(dir: &Path, batch_size: usize) -> Processor {
        let cfg = ProcessorConfig {
            batch_size,
            spill_uri: Some("memory://spill".into()),
            seed: Some(1),
            ..Default::default()
        };
        Processor::local(cfg, dir).unwrap()
    }

    #[test]
    fn filter_and_aggregate_csv() {
        let tmp = TempDir::new();
        write_orders(&tmp.0);
        let p = processor(&tmp.0, 2);

        let out = p
            .filter_rows("orders.csv", Predicate::parse("quantity > 30").unwrap(), None, OutputMode::InMemory)
            .unwrap();
        let rows = out.result.into_batch().unwrap();
        assert_eq!(
            rows.column("quantity").unwrap().values,
            vec![Scalar::I64(40), Scalar::I64(60)]
        );

        let agg = p
            .aggregate_rows(
                "orders.csv",
                &[],
                vec![AggSpec::parse("sum(quantity)").unwrap(), AggSpec::parse("mean(quantity)").unwrap()],
            )
            .unwrap()
            .into_batch();
        assert_eq!(agg.columns[0].values, vec![Scalar::I64(135)]);
        assert_eq!(agg.columns[1].values, vec![Scalar::F64(33.75)]);
    }

    #[test]
    fn preview_stops_early_and_releases_handle() {
        let tmp = TempDir::new();
        write_orders(&tmp.0);
        let p = processor(&tmp.0, 1);
        let head = p.preview("orders.csv", Some(vec!["region".into()]), 2).unwrap();
        assert_eq!(head.num_rows(), 2);
        assert_eq!(head.column_names(), vec!["region"]);
        assert_eq!(p.source().open_handles(), 0);
    }

    #[test]
    fn bad_aggregate_fails_before_reading() {
        let tmp = TempDir::new();
        let p = processor(&tmp.0, 10);
        // dataset does not exist, but the config error wins
        let err = p
            .aggregate_rows("missing.csv", &[], vec![AggSpec::parse("sum(x)").unwrap(), AggSpec::parse("sum(x)").unwrap()])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(p
            .compute_statistics("missing.csv", "x", &[])
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn cancellation_and_telemetry() {
        let tmp = TempDir::new();
        write_orders(&tmp.0);
        let token = CancellationToken::new();
        let sink = Arc::new(WallClockTelemetry::new());
        let p = processor(&tmp.0, 1)
            .with_cancellation(token.clone())
            .with_telemetry(sink.clone());

        let s = p.compute_statistics("orders.csv", "price", &[0.5]).unwrap();
        assert_eq!(s.count, 4);

        token.cancel();
        let err = p.compute_statistics("orders.csv", "price", &[]).unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(p.source().open_handles(), 0);

        let summaries = sink.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].operation, "compute_statistics");
        assert_eq!(summaries[0].rows_processed, 4);
        assert_eq!(summaries[0].mode, "local");
    }
}
