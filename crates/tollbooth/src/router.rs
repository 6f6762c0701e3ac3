//! Shared application state and the full route table with its middleware
//! chain.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Redirect;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::Key;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::{json, Value};
use sha2::{Digest, Sha512};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tollconf::TollConfig;

use crate::auth::Jwt;
use crate::handlers::{auth as auth_handlers, services};
use crate::mail::Mailer;
use crate::middleware::{auth as auth_mw, client_ip, metrics, rate_limit, HttpMetrics};
use crate::payment;
use crate::proxy;
use crate::store::Store;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ProxySettings {
    /// Path fragment removed from every inbound request before routing.
    pub strip_prefix: String,
    pub not_found_redirect_url: String,
    pub no_role_redirect_url: String,
    pub frontend_dir: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jwt: Arc<Jwt>,
    pub mailer: Arc<dyn Mailer>,
    pub metrics: Arc<HttpMetrics>,
    pub limiter: Arc<DefaultDirectRateLimiter>,
    pub http_client: reqwest::Client,
    pub cookie_key: Key,
    pub cookie_name: String,
    pub cookie_max_age: u64,
    pub webhook_secret: String,
    pub proxy: ProxySettings,
}

// SignedCookieJar pulls its key straight from the router state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.cookie_key.clone()
    }
}

impl AppState {
    pub fn new(config: &TollConfig, store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Self {
        let jwt = Jwt::new(
            &config.auth.jwt_secret,
            &config.auth.jwt_issuer,
            &config.auth.jwt_audience,
            config.auth.token_ttl(),
        );

        let per_second = NonZeroU32::new(config.rate_limit.per_second.max(1))
            .expect("clamped to at least one");
        let burst =
            NonZeroU32::new(config.rate_limit.burst.max(1)).expect("clamped to at least one");
        let limiter = RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst));

        // Upstream redirects pass through to the client untouched
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("building proxy http client");

        AppState {
            store,
            jwt: Arc::new(jwt),
            mailer,
            metrics: Arc::new(HttpMetrics::register("gateway")),
            limiter: Arc::new(limiter),
            http_client,
            cookie_key: derive_cookie_key(&config.auth.cookie_secret),
            cookie_name: config.auth.cookie_name.clone(),
            cookie_max_age: config.auth.cookie_max_age,
            webhook_secret: config.stripe.webhook_secret.clone(),
            proxy: ProxySettings {
                strip_prefix: config.proxy.strip_prefix.clone(),
                not_found_redirect_url: config.proxy.not_found_redirect_url.clone(),
                no_role_redirect_url: config.proxy.no_role_redirect_url.clone(),
                frontend_dir: config.proxy.frontend_dir.clone(),
            },
        }
    }
}

/// Cookie signing wants at least 64 bytes of key material; stretch whatever
/// the operator configured.
fn derive_cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

/// The complete gateway router.
///
/// Chain, outermost first: client-ip resolution, request-id mint/propagate,
/// tracing, token bucket, request metrics, panic recovery, request timeout.
/// Gateway-owned paths match before the proxy fallback and are never
/// forwarded.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/services", get(services::list_admin).post(services::create))
        .route("/services/{service_id}", delete(services::delete))
        .route("/version", get(version))
        .layer(from_fn(auth_mw::require_admin));

    let authed = Router::new()
        .route("/user", get(auth_handlers::current_user))
        .route("/logout", get(auth_handlers::logout))
        .route("/refresh-token", get(auth_handlers::refresh_token))
        .route("/update-password", post(auth_handlers::update_password))
        .nest("/admin", admin)
        .layer(from_fn_with_state(state.clone(), auth_mw::require_auth));

    let optional = Router::new()
        .route("/services", get(services::list))
        .route("/pricing/{service_name}", get(services::pricing_page))
        .layer(from_fn_with_state(state.clone(), auth_mw::optional_auth));

    let router = Router::new()
        .route("/", get(|| async { Redirect::permanent("/home") }))
        .route("/login", post(auth_handlers::login))
        .route("/payment/webhook", post(payment::webhook))
        .merge(optional)
        .nest("/auth", authed)
        .nest_service("/home", ServeDir::new(&state.proxy.frontend_dir))
        .fallback(proxy::handler)
        .with_state(state.clone());

    router
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CatchPanicLayer::new())
        .layer(from_fn_with_state(state.clone(), metrics::track_requests))
        .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(from_fn(client_ip::resolve))
}

async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn request_span<B>(req: &axum::http::Request<B>) -> tracing::Span {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %request_id,
    )
}
