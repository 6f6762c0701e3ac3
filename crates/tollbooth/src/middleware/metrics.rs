//! Request counter and latency histogram, labeled by path/method/status and
//! exposed on the metrics listener.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use tracing::debug;

use crate::router::AppState;

const LATENCY_BUCKETS: &[f64] = &[0.0, 0.2, 0.63, 0.8, 1.0, 30.0, 60.0];

pub struct HttpMetrics {
    calls: IntCounterVec,
    latency: HistogramVec,
}

impl HttpMetrics {
    /// Build and register both vectors on the default registry. A duplicate
    /// registration (multiple states in one process, as in tests) keeps the
    /// local handle and logs.
    pub fn register(namespace: &str) -> Self {
        let calls = IntCounterVec::new(
            Opts::new("handler_call_total", "Total number of handler calls")
                .namespace(namespace.to_string()),
            &["path", "method", "status"],
        )
        .expect("handler_call_total definition");
        if let Err(e) = prometheus::register(Box::new(calls.clone())) {
            debug!(error = %e, "registering handler_call_total metric");
        }

        let latency = HistogramVec::new(
            HistogramOpts::new("http_latency_histogram", "Handler execution time")
                .namespace(namespace.to_string())
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["path", "method", "status"],
        )
        .expect("http_latency_histogram definition");
        if let Err(e) = prometheus::register(Box::new(latency.clone())) {
            debug!(error = %e, "registering http_latency_histogram metric");
        }

        Self { calls, latency }
    }

    pub fn observe(&self, path: &str, method: &str, status: &str, elapsed_secs: f64) {
        self.calls.with_label_values(&[path, method, status]).inc();
        self.latency
            .with_label_values(&[path, method, status])
            .observe(elapsed_secs);
    }
}

pub async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    state.metrics.observe(
        &path,
        &method,
        response.status().as_str(),
        start.elapsed().as_secs_f64(),
    );
    response
}
