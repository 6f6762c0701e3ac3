//! Client address resolution, outermost in the chain so everything
//! downstream (logs, proxy headers) sees the same value.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;

/// The resolved client address for this request.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Resolution order: first `X-Forwarded-For` entry, then `X-Real-Ip`, then
/// the socket peer address. Trust of forwarded headers is a deployment
/// concern; behind an untrusted edge, strip them upstream.
pub async fn resolve(mut req: Request, next: Next) -> Response {
    let from_headers = header_ip(&req, "x-forwarded-for").or_else(|| header_ip(&req, "x-real-ip"));

    let ip = from_headers
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

fn header_ip(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
