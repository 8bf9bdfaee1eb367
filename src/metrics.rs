//! Metrics for the ingest drivers.
//!
//! Recording is always on; the Prometheus exporter is only installed when a
//! listen address is configured, otherwise the `metrics` macros are no-ops.

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Raw store
    RawStoreWritesSuccess,
    RawStoreWritesError,
    RawStoreBytesWritten,

    // Bus
    BusPublishSuccess,
    BusPublishError,

    // Validation
    ValidationRejected,
    ValidationViolations,

    // File driver
    FileProcessed,
    FileQuarantined,

    // HTTP driver
    HttpFetchSuccess,
    HttpFetchError,
    HttpFetchDuration,

    // Stream driver
    StreamCommitted,
    StreamPoisonPills,
    StreamRewinds,

    // Producer
    ProducerPostsSent,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RawStoreWritesSuccess => "ingest_raw_store_writes_success_total",
            MetricName::RawStoreWritesError => "ingest_raw_store_writes_error_total",
            MetricName::RawStoreBytesWritten => "ingest_raw_store_bytes_written",

            MetricName::BusPublishSuccess => "ingest_bus_publish_success_total",
            MetricName::BusPublishError => "ingest_bus_publish_error_total",

            MetricName::ValidationRejected => "ingest_validation_rejected_total",
            MetricName::ValidationViolations => "ingest_validation_violations_total",

            MetricName::FileProcessed => "ingest_file_processed_total",
            MetricName::FileQuarantined => "ingest_file_quarantined_total",

            MetricName::HttpFetchSuccess => "ingest_http_fetch_success_total",
            MetricName::HttpFetchError => "ingest_http_fetch_error_total",
            MetricName::HttpFetchDuration => "ingest_http_fetch_duration_seconds",

            MetricName::StreamCommitted => "ingest_stream_committed_total",
            MetricName::StreamPoisonPills => "ingest_stream_poison_pills_total",
            MetricName::StreamRewinds => "ingest_stream_rewinds_total",

            MetricName::ProducerPostsSent => "ingest_producer_posts_sent_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs the Prometheus exporter on `listen`. Failure to install is logged,
/// not fatal: ingestion does not depend on metrics being scraped.
pub fn init(listen: Option<SocketAddr>) {
    let Some(addr) = listen else {
        info!("Metrics exporter disabled (no METRICS_ADDR)");
        return;
    };
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(%addr, error = %e, "Prometheus exporter install failed"),
    }
}

pub mod raw_store {
    use super::MetricName;

    pub fn write_success(bytes: u64) {
        ::metrics::counter!(MetricName::RawStoreWritesSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::RawStoreBytesWritten.as_str()).record(bytes as f64);
    }

    pub fn write_error() {
        ::metrics::counter!(MetricName::RawStoreWritesError.as_str()).increment(1);
    }
}

pub mod bus {
    use super::MetricName;

    pub fn publish_success(event_type: &str) {
        ::metrics::counter!(MetricName::BusPublishSuccess.as_str(), "event_type" => event_type.to_string()).increment(1);
    }

    pub fn publish_error(event_type: &str) {
        ::metrics::counter!(MetricName::BusPublishError.as_str(), "event_type" => event_type.to_string()).increment(1);
    }
}

pub mod validation {
    use super::MetricName;

    /// An event was rejected with `violations` schema violations
    pub fn rejected(event_type: &str, violations: usize) {
        ::metrics::counter!(MetricName::ValidationRejected.as_str(), "event_type" => event_type.to_string()).increment(1);
        ::metrics::counter!(MetricName::ValidationViolations.as_str(), "event_type" => event_type.to_string())
            .increment(violations as u64);
    }
}

pub mod file {
    use super::MetricName;

    pub fn processed() {
        ::metrics::counter!(MetricName::FileProcessed.as_str()).increment(1);
    }

    pub fn quarantined(state: &str) {
        ::metrics::counter!(MetricName::FileQuarantined.as_str(), "state" => state.to_string()).increment(1);
    }
}

pub mod http {
    use super::MetricName;

    pub fn fetch_success(duration_ms: u64) {
        ::metrics::counter!(MetricName::HttpFetchSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::HttpFetchDuration.as_str()).record(duration_ms as f64 / 1000.0);
    }

    pub fn fetch_error() {
        ::metrics::counter!(MetricName::HttpFetchError.as_str()).increment(1);
    }
}

pub mod stream {
    use super::MetricName;

    pub fn committed() {
        ::metrics::counter!(MetricName::StreamCommitted.as_str()).increment(1);
    }

    pub fn poison_pill() {
        ::metrics::counter!(MetricName::StreamPoisonPills.as_str()).increment(1);
    }

    pub fn rewound() {
        ::metrics::counter!(MetricName::StreamRewinds.as_str()).increment(1);
    }
}

pub mod producer {
    use super::MetricName;

    pub fn post_sent() {
        ::metrics::counter!(MetricName::ProducerPostsSent.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_prometheus_conventions() {
        for name in [
            MetricName::RawStoreWritesSuccess,
            MetricName::BusPublishError,
            MetricName::ValidationRejected,
            MetricName::StreamCommitted,
        ] {
            assert!(name.as_str().starts_with("ingest_"));
            assert!(name.as_str().ends_with("_total"));
        }
        assert!(MetricName::HttpFetchDuration.as_str().ends_with("_seconds"));
    }

    #[test]
    fn recording_without_an_exporter_is_a_no_op() {
        bus::publish_success("ingest.file");
        validation::rejected("ingest.http", 2);
        stream::rewound();
    }
}
