//! Shared fixtures: a fully wired router over the in-memory store, seeded
//! accounts and services, and a recording upstream backend.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use tollbooth::auth::password;
use tollbooth::mail::NoopMailer;
use tollbooth::models::{GatewayRole, Role, Service, User};
use tollbooth::payment::signature;
use tollbooth::store::{MemStore, Store};
use tollbooth::{build_router, AppState};
use tollconf::TollConfig;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const JWT_SECRET: &str = "integration-test-key";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemStore>,
}

pub fn test_config() -> TollConfig {
    let mut config = TollConfig::default();
    config.auth.jwt_secret = JWT_SECRET.to_string();
    config.stripe.webhook_secret = WEBHOOK_SECRET.to_string();
    // Generous bucket so only the rate-limit suite trips it
    config.rate_limit.per_second = 10_000;
    config.rate_limit.burst = 10_000;
    config
}

pub fn build_app() -> TestApp {
    build_app_with(test_config())
}

pub fn build_app_with(config: TollConfig) -> TestApp {
    let store = Arc::new(MemStore::new());
    let state = AppState::new(&config, store.clone(), Arc::new(NoopMailer));
    TestApp {
        router: build_router(state),
        store,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router never errors")
    }

    pub async fn seed_user(&self, email: &str, plain_password: &str, role: GatewayRole) -> User {
        let user = User {
            id: Uuid::new_v4(),
            external_id: format!("cus_{}", &Uuid::new_v4().simple().to_string()[..8]),
            email: email.to_string(),
            firstname: String::new(),
            lastname: String::new(),
            avatar_url: String::new(),
            password_hash: password::hash_password(plain_password).unwrap(),
            role,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        self.store.create_user(user).await.unwrap()
    }

    pub async fn seed_service(
        &self,
        id: Uuid,
        name: &str,
        host: &str,
        required_roles: &[&str],
    ) -> Service {
        let service = Service {
            id,
            name: name.to_string(),
            prefix: format!("/{name}"),
            domain: None,
            host: host.to_string(),
            description: String::new(),
            image_url: None,
            required_roles: required_roles.iter().map(|r| Role::new(*r)).collect(),
            pricing_table_id: "prctbl_test".to_string(),
            pricing_table_publishable_key: "pk_test".to_string(),
            status: String::new(),
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        self.store.upsert_service(service).await.unwrap()
    }

    pub async fn login(&self, email: &str, plain_password: &str) -> String {
        let response = self
            .send(json_request(
                "POST",
                "/login",
                &serde_json::json!({ "email": email, "password": plain_password }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK, "login must succeed");
        let body = read_json(response).await;
        body["token"].as_str().expect("token in response").to_string()
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// A webhook delivery signed the way the provider signs it.
pub fn signed_webhook(payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    let signature = signature::sign(WEBHOOK_SECRET, body.as_bytes(), Utc::now().timestamp());
    Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header("stripe-signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

pub async fn read_body(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes()
        .to_vec()
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = read_body(response).await;
    serde_json::from_slice(&bytes).expect("body is json")
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
}

/// A live upstream that records everything it receives.
pub struct Upstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl Upstream {
    pub async fn spawn() -> Self {
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        let app = Router::new().fallback(move |req: Request<Body>| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(RecordedRequest {
                    method: req.method().to_string(),
                    path: req.uri().path().to_string(),
                    headers: req.headers().clone(),
                });
                "hello from upstream"
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Upstream { addr, requests }
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}
