//! Subscription lifecycle through the signed webhook: activation, update,
//! deletion, revival, idempotent re-delivery, and rejection policy.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use common::{build_app, read_json, signed_webhook, TestApp};
use tollbooth::models::Role;
use tollbooth::store::Store;

const SERVICE_ID: &str = "2ea74ace-7f70-4997-9eab-2e5c094543bd";

fn checkout_completed() -> serde_json::Value {
    json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "customer": "cus_abc123",
            "customer_details": { "email": "buyer@example.com", "name": "Buyer" },
            "client_reference_id": SERVICE_ID,
            "subscription": "sub_42"
        }}
    })
}

async fn seed_check_certs(app: &TestApp) {
    app.seed_service(
        Uuid::parse_str(SERVICE_ID).unwrap(),
        "check-certs",
        "http://127.0.0.1:50001",
        &["check-certs"],
    )
    .await;
}

#[tokio::test]
async fn checkout_completed_provisions_user_and_binding() {
    let app = build_app();
    seed_check_certs(&app).await;

    let response = app.send(signed_webhook(&checkout_completed())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let binding = read_json(response).await;
    assert_eq!(binding["role"], "check-certs");
    assert_eq!(binding["subscription_id"], "sub_42");
    assert!(binding["expires_at"].is_null());

    let user = app
        .store
        .get_user_by_external_id("cus_abc123")
        .await
        .unwrap()
        .expect("user provisioned from checkout");
    assert_eq!(user.email, "buyer@example.com");

    assert!(app
        .store
        .has_any_role(user.id, &[Role::new("check-certs")])
        .await
        .unwrap());
}

#[tokio::test]
async fn redelivered_checkout_is_idempotent() {
    let app = build_app();
    seed_check_certs(&app).await;

    let first = app.send(signed_webhook(&checkout_completed())).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.send(signed_webhook(&checkout_completed())).await;
    assert_eq!(second.status(), StatusCode::OK);

    let user = app
        .store
        .get_user_by_external_id("cus_abc123")
        .await
        .unwrap()
        .unwrap();
    let binding = app
        .store
        .get_binding(user.id, &Role::new("check-certs"))
        .await
        .unwrap()
        .expect("exactly one binding row");
    assert_eq!(binding.subscription_id, "sub_42");
    assert!(binding.deleted_at.is_none());
}

#[tokio::test]
async fn subscription_update_then_delete_walks_the_state_machine() {
    let app = build_app();
    seed_check_certs(&app).await;
    app.send(signed_webhook(&checkout_completed())).await;

    let user = app
        .store
        .get_user_by_external_id("cus_abc123")
        .await
        .unwrap()
        .unwrap();
    let role = Role::new("check-certs");

    // updated: expiration and plan metadata land on the binding
    let period_end: DateTime<Utc> = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
    let response = app
        .send(signed_webhook(&json!({
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_42",
                "current_period_end": period_end.timestamp(),
                "items": { "data": [
                    { "plan": { "metadata": { "max_domains": "20" } } }
                ]}
            }}
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let binding = app.store.get_binding(user.id, &role).await.unwrap().unwrap();
    assert_eq!(binding.expires_at, Some(period_end));
    assert_eq!(binding.metadata.get("max_domains"), Some(&"20".to_string()));
    assert!(app.store.has_any_role(user.id, &[role.clone()]).await.unwrap());

    // deleted: binding tombstoned, role gone
    let response = app
        .send(signed_webhook(&json!({
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_42" } }
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.store.has_any_role(user.id, &[role.clone()]).await.unwrap());

    // a fresh checkout revives the same row
    let response = app.send(signed_webhook(&checkout_completed())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.store.has_any_role(user.id, &[role]).await.unwrap());
}

#[tokio::test]
async fn schedule_canceled_tombstones_by_inner_subscription() {
    let app = build_app();
    seed_check_certs(&app).await;
    app.send(signed_webhook(&checkout_completed())).await;

    let response = app
        .send(signed_webhook(&json!({
            "type": "subscription_schedule.canceled",
            "data": { "object": { "subscription": "sub_42" } }
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let user = app
        .store
        .get_user_by_external_id("cus_abc123")
        .await
        .unwrap()
        .unwrap();
    assert!(!app
        .store
        .has_any_role(user.id, &[Role::new("check-certs")])
        .await
        .unwrap());
}

#[tokio::test]
async fn customer_created_provisions_a_user() {
    let app = build_app();

    let response = app
        .send(signed_webhook(&json!({
            "type": "customer.created",
            "data": { "object": {
                "id": "cus_new",
                "email": "fresh@example.com",
                "name": "Fresh"
            }}
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["email"], "fresh@example.com");

    let user = app
        .store
        .get_user_by_external_id("cus_new")
        .await
        .unwrap()
        .expect("user row exists");
    assert!(user.password_hash.starts_with("$argon2"));
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged() {
    let app = build_app();

    let response = app
        .send(signed_webhook(&json!({
            "type": "invoice.finalized",
            "data": { "object": {} }
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_any_state_change() {
    let app = build_app();
    seed_check_certs(&app).await;

    let body = checkout_completed().to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header("stripe-signature", "t=100,v1=deadbeef")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app
        .store
        .get_user_by_external_id("cus_abc123")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_signature_header_is_a_bad_request() {
    let app = build_app();

    let request = Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(checkout_completed().to_string()))
        .unwrap();

    assert_eq!(app.send(request).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_client_reference_is_a_bad_request() {
    let app = build_app();
    seed_check_certs(&app).await;

    let response = app
        .send(signed_webhook(&json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_abc123",
                "client_reference_id": "not-a-uuid",
                "subscription": "sub_42"
            }}
        })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_service_reference_forces_a_retry() {
    let app = build_app();
    // check-certs is NOT seeded: the lookup fails, the provider must retry
    let response = app.send(signed_webhook(&checkout_completed())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
