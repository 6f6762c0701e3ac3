//! Heartbeat scheduler behavior against a live local upstream: status
//! classification, recovery, reconciliation of added/removed/moved services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tollcore::{Beatable, BeatError, HeartbeatComponent, HeartbeatOptions, Kernel, Target};

#[derive(Default)]
struct ScriptedStore {
    targets: Mutex<Vec<Target>>,
    statuses: Mutex<Vec<(Uuid, String)>>,
}

impl ScriptedStore {
    fn set_targets(&self, targets: Vec<Target>) {
        *self.targets.lock().unwrap() = targets;
    }

    fn last_status(&self, id: Uuid) -> Option<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(sid, _)| *sid == id)
            .map(|(_, status)| status.clone())
    }

    fn status_count(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }
}

#[async_trait]
impl Beatable for ScriptedStore {
    async fn fetch_services(&self) -> Result<Vec<Target>, BeatError> {
        Ok(self.targets.lock().unwrap().clone())
    }

    async fn set_status(&self, service: Uuid, status: String) -> Result<(), BeatError> {
        self.statuses.lock().unwrap().push((service, status));
        Ok(())
    }
}

async fn spawn_upstream(status: Arc<AtomicU16>) -> SocketAddr {
    let app = Router::new().route(
        "/hc",
        get(move || {
            let status = status.clone();
            async move {
                StatusCode::from_u16(status.load(Ordering::SeqCst))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn options() -> HeartbeatOptions {
    HeartbeatOptions {
        interval: Duration::from_millis(30),
        error_increment: Duration::from_millis(10),
        health_path: "/hc".to_string(),
        client_timeout: Duration::from_millis(500),
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within deadline"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn start_heartbeat(store: Arc<ScriptedStore>) -> Kernel {
    let mut kernel = Kernel::new();
    kernel.register(HeartbeatComponent::new(options(), store));
    let (started, _failed) = kernel.start(CancellationToken::new()).unwrap();
    started.wait().await.unwrap();
    kernel
}

#[tokio::test]
async fn healthy_service_reports_ok() {
    let upstream_status = Arc::new(AtomicU16::new(200));
    let addr = spawn_upstream(upstream_status).await;

    let id = Uuid::new_v4();
    let store = Arc::new(ScriptedStore::default());
    store.set_targets(vec![Target {
        id,
        host: format!("http://{addr}"),
    }]);

    let mut kernel = start_heartbeat(store.clone()).await;

    wait_for(|| store.last_status(id).as_deref() == Some("OK")).await;

    kernel.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn failure_and_recovery_round_trip() {
    let upstream_status = Arc::new(AtomicU16::new(500));
    let addr = spawn_upstream(upstream_status.clone()).await;

    let id = Uuid::new_v4();
    let store = Arc::new(ScriptedStore::default());
    store.set_targets(vec![Target {
        id,
        host: format!("http://{addr}"),
    }]);

    let mut kernel = start_heartbeat(store.clone()).await;

    wait_for(|| store.last_status(id).as_deref() == Some("Internal Server Error")).await;

    // A single success resets the status and the backoff
    upstream_status.store(200, Ordering::SeqCst);
    wait_for(|| store.last_status(id).as_deref() == Some("OK")).await;

    kernel.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn transport_error_is_recorded_as_status() {
    // Bind then drop a listener so the port is closed
    let dead_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let id = Uuid::new_v4();
    let store = Arc::new(ScriptedStore::default());
    store.set_targets(vec![Target {
        id,
        host: format!("http://{dead_addr}"),
    }]);

    let mut kernel = start_heartbeat(store.clone()).await;

    wait_for(|| {
        store
            .last_status(id)
            .is_some_and(|status| !status.is_empty() && status != "OK")
    })
    .await;

    kernel.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn removed_service_stops_probing() {
    let upstream_status = Arc::new(AtomicU16::new(200));
    let addr = spawn_upstream(upstream_status).await;

    let id = Uuid::new_v4();
    let store = Arc::new(ScriptedStore::default());
    store.set_targets(vec![Target {
        id,
        host: format!("http://{addr}"),
    }]);

    let mut kernel = start_heartbeat(store.clone()).await;
    wait_for(|| store.last_status(id).is_some()).await;

    store.set_targets(vec![]);
    // Let the supervisor notice the removal and the probe wind down
    tokio::time::sleep(Duration::from_millis(120)).await;

    let settled = store.status_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    // At most one in-flight classification may still land after removal
    assert!(store.status_count() <= settled + 1);

    kernel.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn host_change_redirects_probe() {
    let failing = Arc::new(AtomicU16::new(500));
    let failing_addr = spawn_upstream(failing).await;
    let healthy = Arc::new(AtomicU16::new(200));
    let healthy_addr = spawn_upstream(healthy).await;

    let id = Uuid::new_v4();
    let store = Arc::new(ScriptedStore::default());
    store.set_targets(vec![Target {
        id,
        host: format!("http://{failing_addr}"),
    }]);

    let mut kernel = start_heartbeat(store.clone()).await;
    wait_for(|| store.last_status(id).as_deref() == Some("Internal Server Error")).await;

    store.set_targets(vec![Target {
        id,
        host: format!("http://{healthy_addr}"),
    }]);
    wait_for(|| store.last_status(id).as_deref() == Some("OK")).await;

    kernel.shutdown(Duration::from_secs(5)).await.unwrap();
}
