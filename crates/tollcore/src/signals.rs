//! Termination signal handling as a kernel component.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ComponentError;
use crate::kernel::{Component, Ready};

/// Turns SIGHUP/SIGINT/SIGTERM/SIGQUIT into a component error so the kernel
/// begins orderly shutdown.
pub struct SignalComponent;

#[async_trait]
impl Component for SignalComponent {
    fn name(&self) -> &'static str {
        "signals"
    }

    async fn run(&self, ready: Ready, shutdown: CancellationToken) -> Result<(), ComponentError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())
            .map_err(ComponentError::other)?;
        let mut interrupt = signal(SignalKind::interrupt())
            .map_err(ComponentError::other)?;
        let mut terminate = signal(SignalKind::terminate())
            .map_err(ComponentError::other)?;
        let mut quit = signal(SignalKind::quit())
            .map_err(ComponentError::other)?;

        ready.notify();
        debug!("signal handler ready");

        let name = tokio::select! {
            _ = hangup.recv() => "SIGHUP",
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
            _ = shutdown.cancelled() => {
                debug!("signal handler stopped");
                return Ok(());
            }
        };

        Err(ComponentError::SignalReceived(name))
    }
}
