//! Prometheus metrics recorder for the anomaly detector.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Request metrics are recorded by `track_metrics` on every route; the
//! train/detect handlers add model-level counters.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    histogram_opts, opts, Counter, CounterVec, Encoder, HistogramVec, IntGauge, Registry,
    TextEncoder,
};

use crate::AppState;

/// Paths recorded under their own label; everything else is bucketed to "other".
const KNOWN_ENDPOINTS: &[&str] = &[
    "/health",
    "/metrics",
    "/status",
    "/train",
    "/detect",
    "/load-model",
];

/// Prometheus metrics recorder.
/// Metrics live in a registry owned by the recorder, not the global default.
pub struct PrometheusRecorder {
    registry: Registry,

    // Counters
    requests_total: CounterVec,
    anomalies_detected_total: Counter,
    logs_scored_total: Counter,
    training_runs_total: CounterVec,

    // Histograms
    request_duration_seconds: HistogramVec,

    // Gauges
    model_trained: IntGauge,
}

impl PrometheusRecorder {
    /// Create all metrics and register them in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            opts!("api_requests_total", "Total API requests"),
            &["method", "endpoint", "status_code"],
        )?;
        let anomalies_detected_total =
            Counter::with_opts(opts!("anomalies_detected_total", "Total anomalies detected"))?;
        let logs_scored_total =
            Counter::with_opts(opts!("logs_scored_total", "Total log records scored"))?;
        let training_runs_total = CounterVec::new(
            opts!("training_runs_total", "Training runs by outcome"),
            &["outcome"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "api_request_duration_seconds",
                "API request duration",
                // training on large batches runs for seconds
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["endpoint"],
        )?;
        let model_trained = IntGauge::with_opts(opts!(
            "model_trained",
            "1 when a trained model is loaded, 0 otherwise"
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(anomalies_detected_total.clone()))?;
        registry.register(Box::new(logs_scored_total.clone()))?;
        registry.register(Box::new(training_runs_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(model_trained.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            anomalies_detected_total,
            logs_scored_total,
            training_runs_total,
            request_duration_seconds,
            model_trained,
        })
    }

    /// Record one completed HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, elapsed_secs: f64) {
        let endpoint = endpoint_label(path);
        self.requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[endpoint])
            .observe(elapsed_secs);
    }

    pub fn record_detection(&self, scored: usize, anomalies: usize) {
        self.logs_scored_total.inc_by(scored as f64);
        self.anomalies_detected_total.inc_by(anomalies as f64);
    }

    pub fn record_training(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.training_runs_total.with_label_values(&[outcome]).inc();
        if success {
            self.model_trained.set(1);
        }
    }

    pub fn set_model_trained(&self, trained: bool) {
        self.model_trained.set(i64::from(trained));
    }

    /// Encode all registered metrics as Prometheus text format.
    /// Called by the `/metrics` HTTP handler.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn endpoint_label(path: &str) -> &'static str {
    KNOWN_ENDPOINTS
        .iter()
        .find(|p| **p == path)
        .copied()
        .unwrap_or("other")
}

/// Middleware: counts every request and observes its latency.
pub async fn track_metrics(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    state.metrics.record_request(
        &method,
        &path,
        resp.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    resp
}

// ── Tests ─────────────────────────────────────────────────────
