//! Process lifecycle kernel.
//!
//! The kernel owns a set of long-running components, starts them
//! concurrently, surfaces the moment all of them are ready and the first
//! fatal error from any of them, and stops them all in parallel on shutdown.
//!
//! Startup never deadlocks on failure: a component that dies before
//! signalling ready drops its [`Ready`] handle, the watcher records the
//! error, and anyone waiting on [`Started`] is released with
//! [`KernelError::StartAborted`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ComponentError, KernelError};

/// Handed to a component's `run`; call [`Ready::notify`] once the component
/// is fully operational. Dropping it without notifying counts as never
/// having started.
pub struct Ready(Option<oneshot::Sender<()>>);

impl Ready {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Ready(Some(tx))
    }

    pub fn notify(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// A long-running unit of the process, supervised by the [`Kernel`].
#[async_trait]
pub trait Component: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled or the component fails.
    /// Must call `ready.notify()` once operational.
    async fn run(&self, ready: Ready, shutdown: CancellationToken) -> Result<(), ComponentError>;

    /// Extra cleanup beyond cancellation. Called concurrently with every
    /// other component's stop during [`Kernel::shutdown`].
    async fn stop(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// Resolves once every registered component has signalled ready.
#[derive(Debug)]
pub struct Started(oneshot::Receiver<()>);

impl Started {
    pub async fn wait(self) -> Result<(), KernelError> {
        self.0.await.map_err(|_| KernelError::StartAborted)
    }
}

/// Resolves with the first component error, or `None` when the external
/// token was cancelled before anything failed.
#[derive(Debug)]
pub struct Failed(oneshot::Receiver<Option<KernelError>>);

impl Failed {
    pub async fn wait(self) -> Option<KernelError> {
        self.0.await.unwrap_or(None)
    }
}

pub struct Kernel {
    components: Vec<Arc<dyn Component>>,
    cancel: CancellationToken,
    run_tasks: Vec<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            components: Vec::new(),
            cancel: CancellationToken::new(),
            run_tasks: Vec::new(),
            started: false,
            stopped: false,
        }
    }

    pub fn register(&mut self, component: impl Component) -> &mut Self {
        self.components.push(Arc::new(component));
        self
    }

    /// Start every registered component concurrently.
    ///
    /// `external` is the process-wide cancellation token: cancelling it stops
    /// all components and resolves [`Failed`] with `None`.
    ///
    /// Start order is unobservable and must not be relied on.
    pub fn start(
        &mut self,
        external: CancellationToken,
    ) -> Result<(Started, Failed), KernelError> {
        if self.components.is_empty() {
            return Err(KernelError::NoComponents);
        }
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        self.started = true;
        self.cancel = external.child_token();

        debug!(components = self.components.len(), "starting kernel");

        let (err_tx, mut err_rx) = mpsc::channel::<KernelError>(self.components.len());
        let mut ready_rxs = Vec::with_capacity(self.components.len());

        for component in &self.components {
            let (ready_tx, ready_rx) = oneshot::channel();
            ready_rxs.push(ready_rx);

            let component = component.clone();
            let token = self.cancel.clone();
            let err_tx = err_tx.clone();
            self.run_tasks.push(tokio::spawn(async move {
                let name = component.name();
                match component.run(Ready::new(ready_tx), token).await {
                    Ok(()) => debug!(component = name, "component finished"),
                    Err(source) => {
                        let _ = err_tx.send(KernelError::Component { name, source }).await;
                    }
                }
            }));
        }
        drop(err_tx);

        // Trips when the first error lands or the external token cancels, so
        // the started aggregation below can never strand a waiter.
        let abort = CancellationToken::new();

        let (failed_tx, failed_rx) = oneshot::channel();
        let watcher_abort = abort.clone();
        let watcher_external = external.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                maybe_err = err_rx.recv() => maybe_err,
                _ = watcher_external.cancelled() => None,
            };
            watcher_abort.cancel();
            let _ = failed_tx.send(outcome);

            // Later errors are logged, never surfaced as the first failure.
            while let Some(err) = err_rx.recv().await {
                warn!(error = %err, "component error after first failure");
            }
        });

        let (started_tx, started_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                results = futures::future::join_all(ready_rxs) => {
                    if results.iter().all(|r| r.is_ok()) {
                        debug!("all components started");
                        let _ = started_tx.send(());
                    }
                }
                _ = abort.cancelled() => {}
            }
        });

        Ok((Started(started_rx), Failed(failed_rx)))
    }

    /// Stop every component concurrently and wait (up to `grace`) for their
    /// run tasks to drain. Returns the first stop error; the rest are logged.
    /// Idempotent; a panicking stop handler is reported as a stop error.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<(), KernelError> {
        if !self.started || self.stopped {
            return Ok(());
        }
        self.stopped = true;

        debug!("stopping components");
        self.cancel.cancel();

        let mut stops = JoinSet::new();
        for component in &self.components {
            let component = component.clone();
            stops.spawn(async move {
                let name = component.name();
                match AssertUnwindSafe(component.stop()).catch_unwind().await {
                    Ok(result) => (name, result),
                    Err(payload) => (
                        name,
                        Err(ComponentError::StopPanicked(panic_message(payload))),
                    ),
                }
            });
        }

        let mut first: Option<KernelError> = None;
        while let Some(joined) = stops.join_next().await {
            // The closure catches panics itself, so join errors are
            // cancellations only and carry nothing to report.
            let Ok((name, result)) = joined else { continue };
            if let Err(source) = result {
                let err = KernelError::Component { name, source };
                if first.is_none() {
                    first = Some(err);
                } else {
                    warn!(error = %err, "additional stop error");
                }
            }
        }

        let drain = futures::future::join_all(self.run_tasks.drain(..));
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("components did not drain within the shutdown grace period");
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
