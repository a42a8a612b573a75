//! Pipeline metrics
//!
//! Metric names live in one enum so every recording site goes through the
//! same catalog. Recording is a no-op until `init` installs a recorder.

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

pub const METRICS_ADDR_ENV: &str = "COVID_PIPELINE_METRICS_ADDR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    IngestRowsRead,
    IngestRowsDropped,
    CleanRowsIn,
    CleanRowsKept,
    AggregateGroups,
    AggregateRowsWritten,
    StepDuration,
    StepRetries,
    StepFailures,
    RunsSucceeded,
    RunsFailed,
    OutputBytes,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::IngestRowsRead => "covid_pipeline_ingest_rows_read_total",
            MetricName::IngestRowsDropped => "covid_pipeline_ingest_rows_dropped_total",
            MetricName::CleanRowsIn => "covid_pipeline_clean_rows_in_total",
            MetricName::CleanRowsKept => "covid_pipeline_clean_rows_kept_total",
            MetricName::AggregateGroups => "covid_pipeline_aggregate_groups",
            MetricName::AggregateRowsWritten => "covid_pipeline_aggregate_rows_written_total",
            MetricName::StepDuration => "covid_pipeline_step_duration_seconds",
            MetricName::StepRetries => "covid_pipeline_step_retries_total",
            MetricName::StepFailures => "covid_pipeline_step_failures_total",
            MetricName::RunsSucceeded => "covid_pipeline_runs_succeeded_total",
            MetricName::RunsFailed => "covid_pipeline_runs_failed_total",
            MetricName::OutputBytes => "covid_pipeline_output_bytes",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            IngestRowsRead,
            IngestRowsDropped,
            CleanRowsIn,
            CleanRowsKept,
            AggregateGroups,
            AggregateRowsWritten,
            StepDuration,
            StepRetries,
            StepFailures,
            RunsSucceeded,
            RunsFailed,
            OutputBytes,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder. When `COVID_PIPELINE_METRICS_ADDR` is set
/// an HTTP exporter is started on that address; must then be called from
/// inside a tokio runtime.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    match std::env::var(METRICS_ADDR_ENV) {
        Ok(addr_str) if !addr_str.trim().is_empty() => {
            let addr: SocketAddr = addr_str.trim().parse()?;
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))?;
            info!("Prometheus exporter listening at http://{}/metrics", addr);
        }
        _ => {
            builder
                .install_recorder()
                .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
            info!("Metrics recorder installed (no HTTP exporter)");
        }
    }

    for name in MetricName::all_metrics() {
        tracing::trace!(metric = %name, "registered metric");
    }
    Ok(())
}

/// Like `init`, but logs instead of failing. Used by the binary.
pub fn init_or_warn() {
    if let Err(e) = init() {
        warn!("Metrics disabled: {}", e);
    }
}

pub mod ingest {
    use super::MetricName;

    pub fn rows_read(count: usize) {
        ::metrics::counter!(MetricName::IngestRowsRead.as_str()).increment(count as u64);
    }

    /// Rows the permissive reader discarded
    pub fn rows_dropped(count: usize) {
        ::metrics::counter!(MetricName::IngestRowsDropped.as_str()).increment(count as u64);
    }
}

pub mod clean {
    use super::MetricName;

    pub fn rows_filtered(rows_in: usize, rows_kept: usize) {
        ::metrics::counter!(MetricName::CleanRowsIn.as_str()).increment(rows_in as u64);
        ::metrics::counter!(MetricName::CleanRowsKept.as_str()).increment(rows_kept as u64);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn groups_computed(distinct_groups: usize, rows_written: usize) {
        ::metrics::gauge!(MetricName::AggregateGroups.as_str()).set(distinct_groups as f64);
        ::metrics::counter!(MetricName::AggregateRowsWritten.as_str())
            .increment(rows_written as u64);
    }
}

pub mod steps {
    use super::MetricName;

    pub fn duration(step: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::StepDuration.as_str(), "step" => step).record(secs);
    }

    pub fn retry(step: &'static str) {
        ::metrics::counter!(MetricName::StepRetries.as_str(), "step" => step).increment(1);
    }

    pub fn failure(step: &'static str) {
        ::metrics::counter!(MetricName::StepFailures.as_str(), "step" => step).increment(1);
    }

    pub fn output_bytes(step: &'static str, bytes: u64) {
        ::metrics::histogram!(MetricName::OutputBytes.as_str(), "step" => step)
            .record(bytes as f64);
    }
}

pub mod runs {
    use super::MetricName;

    pub fn succeeded() {
        ::metrics::counter!(MetricName::RunsSucceeded.as_str()).increment(1);
    }

    pub fn failed() {
        ::metrics::counter!(MetricName::RunsFailed.as_str()).increment(1);
    }
}
