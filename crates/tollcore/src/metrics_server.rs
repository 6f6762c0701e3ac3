//! Prometheus text exposition on a dedicated listener.

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ComponentError;
use crate::kernel::{Component, Ready};

/// Exposes `GET /metrics` rendering the default prometheus registry,
/// with the process collector registered.
pub struct MetricsServerComponent {
    addr: String,
}

impl MetricsServerComponent {
    pub fn new(addr: impl Into<String>) -> Self {
        #[cfg(target_os = "linux")]
        {
            let collector = prometheus::process_collector::ProcessCollector::for_self();
            if let Err(e) = prometheus::register(Box::new(collector)) {
                // Already registered when multiple components are built in-process
                warn!(error = %e, "registering process collector");
            }
        }

        Self { addr: addr.into() }
    }
}

async fn render_metrics() -> impl IntoResponse {
    let metrics = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "encoding metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[async_trait]
impl Component for MetricsServerComponent {
    fn name(&self) -> &'static str {
        "metrics-server"
    }

    async fn run(&self, ready: Ready, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let router = Router::new().route("/metrics", get(render_metrics));

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ComponentError::Bind {
                addr: self.addr.clone(),
                source,
            })?;

        info!(addr = %self.addr, "metrics server listening");
        ready.notify();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(ComponentError::Serve)?;

        Ok(())
    }
}
