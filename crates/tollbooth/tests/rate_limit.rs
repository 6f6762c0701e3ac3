//! The shared token bucket gates everything, including the proxy fallback.

mod common;

use axum::http::StatusCode;
use uuid::Uuid;

use common::{build_app_with, get_request, test_config, Upstream};

#[tokio::test]
async fn exhausted_bucket_returns_429_without_reaching_upstream() {
    let upstream = Upstream::spawn().await;

    let mut config = test_config();
    config.rate_limit.per_second = 5;
    config.rate_limit.burst = 10;
    let app = build_app_with(config);
    app.seed_service(Uuid::new_v4(), "wiki", &upstream.origin(), &[])
        .await;

    let mut ok = 0;
    let mut limited = 0;
    for _ in 0..30 {
        let response = app.send(get_request("/wiki/page")).await;
        match response.status() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert!(limited >= 15, "expected at least 15 rejections, got {limited}");
    assert!(ok >= 1, "the burst allowance must admit some requests");
    // Rejected requests never reached the backend
    assert_eq!(upstream.request_count(), ok);
}

#[tokio::test]
async fn gateway_routes_are_limited_too() {
    let mut config = test_config();
    config.rate_limit.per_second = 1;
    config.rate_limit.burst = 2;
    let app = build_app_with(config);

    let mut limited = 0;
    for _ in 0..10 {
        let response = app.send(get_request("/services")).await;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    assert!(limited >= 5);
}
