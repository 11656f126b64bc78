//! Telemetry sink contract.
//!
//! A sink is started and stopped exactly once around a whole operation,
//! never per batch. OS-level sampling (CPU, RSS, disk counters) belongs to
//! external sinks; the built-in one measures wall-clock time only.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation: String,
    pub dataset: String,
    pub mode: String,
    pub duration: Duration,
    pub avg_cpu: Option<f64>,
    pub max_cpu: Option<f64>,
    pub avg_memory_mb: Option<f64>,
    pub max_memory_mb: Option<f64>,
    pub disk_read_mb: Option<f64>,
    pub disk_write_mb: Option<f64>,
    pub rows_processed: u64,
}

impl OperationSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub trait TelemetrySink: Send + Sync {
    fn start(&self, operation: &str, dataset: &str, mode: &str);

    fn stop(&self, rows_processed: u64) -> OperationSummary;
}

#[derive(Debug)]
struct Running {
    operation: String,
    dataset: String,
    mode: String,
    started: Instant,
}

/// Fills `duration` only, emits a `tracing` event per summary, and keeps a
/// history of the summaries it produced.
#[derive(Debug, Default)]
pub struct WallClockTelemetry {
    running: Mutex<Option<Running>>,
    history: Mutex<Vec<OperationSummary>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WallClockTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<OperationSummary> {
        lock(&self.history).clone()
    }
}

impl TelemetrySink for WallClockTelemetry {
    fn start(&self, operation: &str, dataset: &str, mode: &str) {
        *lock(&self.running) = Some(Running {
            operation: operation.to_string(),
            dataset: dataset.to_string(),
            mode: mode.to_string(),
            started: Instant::now(),
        });
    }

    fn stop(&self, rows_processed: u64) -> OperationSummary {
        let summary = match lock(&self.running).take() {
            Some(r) => OperationSummary {
                operation: r.operation,
                dataset: r.dataset,
                mode: r.mode,
                duration: r.started.elapsed(),
                rows_processed,
                ..Default::default()
            },
            None => {
                tracing::warn!("telemetry stopped without a matching start");
                OperationSummary {
                    rows_processed,
                    ..Default::default()
                }
            }
        };
        tracing::info!(
            operation = %summary.operation,
            dataset = %summary.dataset,
            mode = %summary.mode,
            duration_ms = summary.duration.as_millis() as u64,
            rows = summary.rows_processed,
            "operation telemetry"
        );
        lock(&self.history).push(summary.clone());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_records_summary() {
        let t = WallClockTelemetry::new();
        t.start("aggregate_rows", "lineitem", "local");
        let s = t.stop(42);
        assert_eq!(s.operation, "aggregate_rows");
        assert_eq!(s.rows_processed, 42);
        assert!(s.avg_cpu.is_none());
        assert_eq!(t.summaries(), vec![s.clone()]);
        assert!(s.to_json().unwrap().contains("\"dataset\":\"lineitem\""));
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let t = WallClockTelemetry::new();
        let s = t.stop(0);
        assert_eq!(s.duration, Duration::ZERO);
    }
}
