//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;
use std::time::Duration;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Conversation buffer metrics
    pub buffer_trims: Counter,
    pub buffer_discarded_turns: Histogram,
    pub summarizations: CounterVec,
    pub summary_depth: Histogram,

    // Retrieval metrics
    pub retrieval_requests: CounterVec,
    pub retrieval_duration: HistogramVec,
    pub passages_returned: Histogram,
    pub autocut_outcomes: CounterVec,
    pub contextualization_fallbacks: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Conversation buffer metrics
        let buffer_trims = register_counter_with_registry!(
            Opts::new("buffer_trims_total", "Total conversation buffer trims"),
            registry
        )?;

        let buffer_discarded_turns = register_histogram_with_registry!(
            HistogramOpts::new("buffer_discarded_turns", "Turns moved out of the buffer per trim")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
            registry
        )?;

        let summarizations = register_counter_vec_with_registry!(
            Opts::new("summarizations_total", "Total summarizations of discarded turns"),
            &["status"],
            registry
        )?;

        let summary_depth = register_histogram_with_registry!(
            HistogramOpts::new("summary_depth", "Nesting level of summarization calls")
                .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0]),
            registry
        )?;

        // Retrieval metrics
        let retrieval_requests = register_counter_vec_with_registry!(
            Opts::new("retrieval_requests_total", "Total retrieval requests"),
            &["status"],
            registry
        )?;

        let retrieval_duration = register_histogram_vec_with_registry!(
            "retrieval_duration_seconds",
            "Retrieval duration in seconds",
            &["status"],
            registry
        )?;

        let passages_returned = register_histogram_with_registry!(
            HistogramOpts::new("retrieval_passages_returned", "Passages returned per retrieval")
                .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 10.0, 20.0]),
            registry
        )?;

        let autocut_outcomes = register_counter_vec_with_registry!(
            Opts::new("autocut_outcomes_total", "Knee detection outcomes"),
            &["outcome"],
            registry
        )?;

        let contextualization_fallbacks = register_counter_with_registry!(
            Opts::new(
                "contextualization_fallbacks_total",
                "Queries used as-is after contextualization failed"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            buffer_trims,
            buffer_discarded_turns,
            summarizations,
            summary_depth,
            retrieval_requests,
            retrieval_duration,
            passages_returned,
            autocut_outcomes,
            contextualization_fallbacks,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a buffer trim that discarded `discarded` turns
    pub fn record_buffer_trim(&self, discarded: usize) {
        self.buffer_trims.inc();
        self.buffer_discarded_turns.observe(discarded as f64);
    }

    /// Record a summarization event
    pub fn record_summarization(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.summarizations.with_label_values(&[status]).inc();
    }

    pub fn record_summary_depth(&self, depth: usize) {
        self.summary_depth.observe(depth as f64);
    }

    /// Record a finished retrieval; `status` is `success`, `error` or `timeout`
    pub fn record_retrieval(&self, status: &str, duration: Duration, passages: usize) {
        self.retrieval_requests.with_label_values(&[status]).inc();
        self.retrieval_duration
            .with_label_values(&[status])
            .observe(duration.as_secs_f64());
        self.passages_returned.observe(passages as f64);
    }

    pub fn record_autocut(&self, outcome: &str) {
        self.autocut_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_contextualization_fallback(&self) {
        self.contextualization_fallbacks.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
