//! Per-backend health probing with adaptive backoff.
//!
//! One owning probe task per known service, supervised by a control loop
//! that refetches the service list at the base interval and reconciles the
//! running set. Every probe classification flows through a bounded results
//! channel into a single status-writer task, so a slow store naturally
//! slows probing instead of piling up writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ComponentError;
use crate::kernel::{Component, Ready};

pub type BeatError = Box<dyn std::error::Error + Send + Sync>;

/// A probeable backend: identity plus its origin URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: Uuid,
    pub host: String,
}

/// Source of probe targets and sink for their statuses. Implemented by the
/// gateway's store.
#[async_trait]
pub trait Beatable: Send + Sync + 'static {
    async fn fetch_services(&self) -> Result<Vec<Target>, BeatError>;
    async fn set_status(&self, service: Uuid, status: String) -> Result<(), BeatError>;
}

#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    /// Base probe interval and supervisor reconciliation interval.
    pub interval: Duration,
    /// Added once per accumulated retry after a failed probe.
    pub error_increment: Duration,
    /// Path appended to each target's host, e.g. "/hc".
    pub health_path: String,
    /// Hard bound on a single probe round-trip.
    pub client_timeout: Duration,
}

#[derive(Debug)]
struct ProbeResult {
    service: Uuid,
    status: String,
}

struct ProbeHandle {
    host: String,
    cancel: CancellationToken,
}

pub struct HeartbeatComponent {
    options: HeartbeatOptions,
    store: Arc<dyn Beatable>,
    client: reqwest::Client,
}

impl HeartbeatComponent {
    pub fn new(options: HeartbeatOptions, store: Arc<dyn Beatable>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(options.client_timeout)
            .build()
            .expect("building heartbeat http client");

        Self {
            options,
            store,
            client,
        }
    }

    fn reconcile(
        &self,
        probes: &mut HashMap<Uuid, ProbeHandle>,
        targets: Vec<Target>,
        results: &mpsc::Sender<ProbeResult>,
        shutdown: &CancellationToken,
    ) {
        let live: Vec<Uuid> = targets.iter().map(|t| t.id).collect();
        probes.retain(|id, handle| {
            if live.contains(id) {
                true
            } else {
                debug!(service = %id, "service removed, stopping probe");
                handle.cancel.cancel();
                false
            }
        });

        for target in targets {
            let respawn = match probes.get(&target.id) {
                Some(handle) if handle.host == target.host => false,
                Some(handle) => {
                    debug!(service = %target.id, host = %target.host, "host changed, restarting probe");
                    handle.cancel.cancel();
                    true
                }
                None => true,
            };

            if respawn {
                let cancel = shutdown.child_token();
                tokio::spawn(probe_loop(
                    target.clone(),
                    self.options.clone(),
                    self.client.clone(),
                    results.clone(),
                    cancel.clone(),
                ));
                probes.insert(
                    target.id,
                    ProbeHandle {
                        host: target.host,
                        cancel,
                    },
                );
            }
        }
    }
}

#[async_trait]
impl Component for HeartbeatComponent {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn run(&self, ready: Ready, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let (results_tx, mut results_rx) = mpsc::channel::<ProbeResult>(1);

        let store = self.store.clone();
        let writer = tokio::spawn(async move {
            while let Some(result) = results_rx.recv().await {
                if let Err(e) = store.set_status(result.service, result.status).await {
                    warn!(error = %e, "updating service status");
                }
            }
        });

        let mut probes: HashMap<Uuid, ProbeHandle> = HashMap::new();

        match self.store.fetch_services().await {
            Ok(targets) => self.reconcile(&mut probes, targets, &results_tx, &shutdown),
            Err(e) => warn!(error = %e, "initial service fetch"),
        }
        ready.notify();

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick; the initial load covered it

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.store.fetch_services().await {
                        Ok(targets) => self.reconcile(&mut probes, targets, &results_tx, &shutdown),
                        Err(e) => warn!(error = %e, "fetching services"),
                    }
                }
            }
        }

        debug!("heartbeat stopping");
        for handle in probes.values() {
            handle.cancel.cancel();
        }
        drop(results_tx);
        let _ = writer.await;

        Ok(())
    }
}

/// One probe loop per service. The timer is re-armed only after the
/// classification, so at most one probe is in flight per service.
async fn probe_loop(
    target: Target,
    options: HeartbeatOptions,
    client: reqwest::Client,
    results: mpsc::Sender<ProbeResult>,
    cancel: CancellationToken,
) {
    let url = format!(
        "{}{}",
        target.host.trim_end_matches('/'),
        options.health_path
    );
    let mut retries: u32 = 0;
    let mut delay = options.interval;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let status = match client.get(&url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                retries = 0;
                "OK".to_string()
            }
            Ok(resp) => {
                retries += 5;
                status_text(resp.status())
            }
            Err(e) => {
                retries += 5;
                e.to_string()
            }
        };
        delay = next_delay(options.interval, options.error_increment, retries);

        debug!(service = %target.id, status = %status, retries, "probe");

        // Blocks while the status writer is busy - intended backpressure.
        if results
            .send(ProbeResult {
                service: target.id,
                status,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

fn status_text(status: reqwest::StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

fn next_delay(interval: Duration, error_increment: Duration, retries: u32) -> Duration {
    interval + error_increment * retries
}
