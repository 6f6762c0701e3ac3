//! HTTP listener as a kernel component.

use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ComponentError;
use crate::kernel::{Component, Ready};

/// Serves an axum router, signalling ready once the listener is bound and
/// shutting down gracefully when the kernel cancels.
pub struct HttpServerComponent {
    name: &'static str,
    addr: String,
    // run() consumes the router exactly once
    router: Mutex<Option<Router>>,
}

impl HttpServerComponent {
    pub fn new(name: &'static str, addr: impl Into<String>, router: Router) -> Self {
        Self {
            name,
            addr: addr.into(),
            router: Mutex::new(Some(router)),
        }
    }
}

#[async_trait]
impl Component for HttpServerComponent {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, ready: Ready, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let router = self
            .router
            .lock()
            .expect("router mutex poisoned")
            .take()
            .ok_or(ComponentError::AlreadyRan)?;

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ComponentError::Bind {
                addr: self.addr.clone(),
                source,
            })?;

        info!(server = self.name, addr = %self.addr, "http server listening");
        ready.notify();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ComponentError::Serve)?;

        info!(server = self.name, "http server stopped");
        Ok(())
    }
}
