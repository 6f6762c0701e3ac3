//! Reverse proxy: resolve the inbound request to a backend service,
//! enforce its role gate, rewrite the path, and stream the exchange.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::SignedCookieJar;
use tracing::{error, warn};

use crate::middleware::auth::authenticate;
use crate::middleware::{ClientIp, Identity};
use crate::models::{RoleBinding, Service};
use crate::router::AppState;

/// Everything not matched by a gateway-owned route lands here.
pub async fn handler(State(state): State<AppState>, jar: SignedCookieJar, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let Some(service_key) = extract_service_key(&path, &state.proxy.strip_prefix) else {
        return Redirect::permanent(&state.proxy.not_found_redirect_url).into_response();
    };

    let service = match state
        .store
        .get_service_by_prefix_or_domain(&format!("/{service_key}"), &host)
        .await
    {
        Ok(Some(service)) => service,
        Ok(None) => {
            warn!(key = %service_key, host = %host, "backend not found");
            return Redirect::permanent(&state.proxy.not_found_redirect_url).into_response();
        }
        Err(e) => {
            error!(error = %e, "resolving backend");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let upstream_path = rewrite_path(&path, &state.proxy.strip_prefix, &service.prefix);

    // A domain-pinned service is only served on its own host
    if let Some(domain) = service.domain.as_deref() {
        if !domain.is_empty() && host != domain {
            return Redirect::permanent(&format!("https://{domain}{upstream_path}"))
                .into_response();
        }
    }

    let mut identity: Option<Identity> = None;
    let mut binding: Option<RoleBinding> = None;
    if let Some(role) = service.gate_role() {
        let caller = match authenticate(&state, &jar, req.headers()).await {
            Ok(caller) => caller,
            Err(err) => return err.into_response(),
        };

        match state
            .store
            .has_any_role(caller.id, std::slice::from_ref(role))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Redirect::temporary(&format!(
                    "{}/{}",
                    state.proxy.no_role_redirect_url, service.name
                ))
                .into_response();
            }
            Err(e) => {
                error!(error = %e, "determining caller roles");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }

        // Plan metadata rides along as a header; its absence is not fatal
        binding = match state.store.get_binding(caller.id, role).await {
            Ok(binding) => binding,
            Err(e) => {
                warn!(error = %e, "loading plan binding");
                None
            }
        };
        identity = Some(caller);
    }

    forward(&state, req, &service, &upstream_path, identity, binding).await
}

async fn forward(
    state: &AppState,
    req: Request,
    service: &Service,
    upstream_path: &str,
    identity: Option<Identity>,
    binding: Option<RoleBinding>,
) -> Response {
    let origin = match reqwest::Url::parse(&service.host) {
        Ok(origin) => origin,
        Err(e) => {
            error!(error = %e, host = %service.host, "malformed backend origin");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut url = match origin.join(upstream_path) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "joining upstream path");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    url.set_query(req.uri().query());

    let (parts, body) = req.into_parts();

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    // The upstream sees its own authority, not the gateway's
    headers.remove(header::HOST);

    if let Some(request_id) = parts.headers.get("x-request-id") {
        headers.insert("x-request-id", request_id.clone());
    }
    if let Some(ClientIp(ip)) = parts.extensions.get::<ClientIp>() {
        if let Ok(value) = HeaderValue::from_str(ip) {
            headers.insert("x-forwarded-for", value);
        }
    }
    if let Some(binding) = &binding {
        if !binding.metadata.is_empty() {
            if let Ok(json) = serde_json::to_string(&binding.metadata) {
                if let Ok(value) = HeaderValue::from_str(&json) {
                    headers.insert("x-plan-metadata", value);
                }
            }
        }
    }
    if let Some(identity) = &identity {
        if !identity.external_id.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&identity.external_id) {
                headers.insert("x-stripe-customer-id", value);
            }
        }
    }

    let upstream = state
        .http_client
        .request(parts.method.clone(), url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = %e, service = %service.name, "upstream request failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// First path segment after the configured strip-prefix; the routing key.
fn extract_service_key(path: &str, strip_prefix: &str) -> Option<String> {
    let path = path.strip_prefix(strip_prefix).unwrap_or(path);
    let segment = path.trim_start_matches('/').split('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

/// Outbound path: inbound minus the strip-prefix and the service's own
/// prefix segment. Stable for `/name`, `/name/`, and domain-routed paths
/// that never carried the prefix.
fn rewrite_path(path: &str, strip_prefix: &str, service_prefix: &str) -> String {
    let mut rest = path.strip_prefix(strip_prefix).unwrap_or(path);
    if let Some(after) = rest.strip_prefix(service_prefix) {
        if after.is_empty() || after.starts_with('/') {
            rest = after;
        }
    }
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    const HOP_BY_HOP: [HeaderName; 7] = [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ];

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(HeaderName::from_static("keep-alive"));
}
