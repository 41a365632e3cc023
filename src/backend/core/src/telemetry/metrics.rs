//! Prometheus metrics for access decisions, cache traffic and faults.
//!
//! Recording goes through the `metrics` facade, so nothing here is required
//! for the engine to work; without an installed recorder the macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_core::telemetry::metrics::DecisionMetrics;
//! use std::time::Duration;
//!
//! DecisionMetrics::record("action", "success", Duration::from_micros(85));
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for decision durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
    ]
}

/// Handle to the installed Prometheus recorder.
pub struct MetricsHandle {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsHandle {
    /// A handle with no recorder behind it.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }
}

/// Install the Prometheus recorder and describe Warden's metrics.
///
/// The caller decides how to expose [`MetricsHandle::render`]; Warden never
/// opens a listener of its own.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsHandle> {
    if !config.enabled {
        return Ok(MetricsHandle::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!("Metrics recorder installed");

    Ok(MetricsHandle {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Decisions
    describe_counter!(
        "warden_access_decisions_total",
        "Access decisions by hierarchy level and reason"
    );
    describe_histogram!(
        "warden_access_decision_duration_seconds",
        "Time to reach an access decision"
    );

    // Cache
    describe_counter!("cache_hits_total", "Cache hits by backend");
    describe_counter!("cache_misses_total", "Cache misses by backend");
    describe_counter!("cache_sets_total", "Cache writes by backend");
    describe_counter!("cache_evictions_total", "Cache evictions by backend");
    describe_counter!(
        "warden_cache_invalidations_total",
        "Cache invalidations by kind"
    );

    // Faults
    describe_counter!("warden_errors_total", "Errors by code and category");
}

/// Counters and timings for the decision engine.
pub struct DecisionMetrics;

impl DecisionMetrics {
    /// Record one decision.
    pub fn record(level: &'static str, reason: &'static str, elapsed: Duration) {
        counter!(
            "warden_access_decisions_total",
            "level" => level,
            "reason" => reason,
        )
        .increment(1);

        histogram!(
            "warden_access_decision_duration_seconds",
            "level" => level,
        )
        .record(elapsed.as_secs_f64());
    }

    /// Start timing a decision at `level`.
    pub fn start(level: &'static str) -> DecisionTimer {
        DecisionTimer {
            start: Instant::now(),
            level,
        }
    }
}

/// Timer for one decision; consumed when the reason is known.
pub struct DecisionTimer {
    start: Instant,
    level: &'static str,
}

impl DecisionTimer {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish timing and record under `reason`.
    pub fn finish(self, reason: &'static str) -> Duration {
        let elapsed = self.start.elapsed();
        DecisionMetrics::record(self.level, reason, elapsed);
        elapsed
    }
}

/// Counter for cache invalidation events.
pub struct InvalidationCounter;

impl InvalidationCounter {
    pub fn increment(kind: &'static str) {
        counter!("warden_cache_invalidations_total", "kind" => kind).increment(1);
    }
}
