//! Subscription event processor: signed webhook deliveries from the
//! payment provider, translated into role-store mutations.
//!
//! Response policy: 400 on signature or parse failure, 500 on store failure
//! (the provider retries), 200 on success or deliberate no-op. Every
//! handler is idempotent; a mutation is never acknowledged half-applied.

pub mod events;
pub mod signature;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::password;
use crate::error::ApiError;
use crate::models::{GatewayRole, Role, User};
use crate::payment::events::{CheckoutSession, Customer, PaymentEvent, Subscription};
use crate::router::AppState;
use crate::serializer;
use crate::store::StoreError;

/// Accepted clock skew between the delivery timestamp and now.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
enum WebhookError {
    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("password hashing failed")]
    Hashing,
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Malformed(msg) => ApiError::BadRequest(msg),
            // The provider must retry store failures, lookup misses included
            WebhookError::Store(e) => ApiError::internal(e),
            WebhookError::Hashing => ApiError::internal("password hashing failed"),
        }
    }
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let header = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing signature header".to_string()))?;

    signature::verify(
        &state.webhook_secret,
        header,
        &body,
        SIGNATURE_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!(error = %e, "webhook signature rejected");
        ApiError::BadRequest("invalid signature".to_string())
    })?;

    let event = PaymentEvent::parse(&body).map_err(|e| {
        warn!(error = %e, "webhook payload rejected");
        ApiError::BadRequest(e.to_string())
    })?;

    let response = dispatch(&state, event).await.map_err(ApiError::from)?;
    Ok(Json(response))
}

async fn dispatch(state: &AppState, event: PaymentEvent) -> Result<Value, WebhookError> {
    match event {
        PaymentEvent::CustomerCreated(customer) => customer_created(state, customer).await,
        PaymentEvent::CheckoutCompleted(session) => checkout_completed(state, session).await,
        PaymentEvent::SubscriptionUpdated(sub) => subscription_updated(state, sub).await,
        PaymentEvent::SubscriptionDeleted(sub) => {
            subscription_ended(state, &sub.id).await
        }
        PaymentEvent::ScheduleCanceled(schedule) => {
            subscription_ended(state, schedule.subscription.id()).await
        }
        PaymentEvent::Unknown(kind) => {
            debug!(event_type = %kind, "ignoring unhandled event type");
            Ok(json!({ "received": true }))
        }
    }
}

async fn customer_created(state: &AppState, customer: Customer) -> Result<Value, WebhookError> {
    let user = register_user(state, &customer.id, &customer.email, &customer.name).await?;
    Ok(serde_json::to_value(serializer::user(&user)).unwrap_or_else(|_| json!({})))
}

async fn checkout_completed(
    state: &AppState,
    session: CheckoutSession,
) -> Result<Value, WebhookError> {
    let customer_id = session
        .customer
        .as_ref()
        .map(|c| c.id().to_string())
        .ok_or_else(|| WebhookError::Malformed("checkout session without customer".to_string()))?;

    let user = match state.store.get_user_by_external_id(&customer_id).await? {
        Some(user) => user,
        None => {
            register_user(
                state,
                &customer_id,
                &session.customer_details.email,
                &session.customer_details.name,
            )
            .await?
        }
    };

    let service_id = Uuid::parse_str(&session.client_reference_id).map_err(|_| {
        WebhookError::Malformed(format!(
            "client_reference_id is not a service id: {:?}",
            session.client_reference_id
        ))
    })?;
    let service = state.store.get_service_by_id(service_id).await?;

    let role = service
        .gate_role()
        .cloned()
        .unwrap_or_else(Role::none);
    let subscription_id = session
        .subscription
        .as_ref()
        .map(|s| s.id().to_string())
        .unwrap_or_default();

    let binding = state
        .store
        .upsert_binding(user.id, &subscription_id, role, None)
        .await?;

    Ok(serde_json::to_value(&binding).unwrap_or_else(|_| json!({})))
}

async fn subscription_updated(
    state: &AppState,
    sub: Subscription,
) -> Result<Value, WebhookError> {
    // Anything but exactly one item leaves the binding untouched
    if sub.items.data.len() != 1 {
        warn!(subscription = %sub.id, items = sub.items.data.len(), "unexpected item count");
        return Ok(json!({ "received": true }));
    }

    let metadata = sub.items.data[0].plan.metadata.clone();
    let expires_at = DateTime::<Utc>::from_timestamp(sub.current_period_end, 0)
        .ok_or_else(|| WebhookError::Malformed("current_period_end out of range".to_string()))?;

    let updated = state
        .store
        .update_by_subscription(&sub.id, metadata, Some(expires_at))
        .await?;
    if !updated {
        warn!(subscription = %sub.id, "update for unknown subscription");
    }

    Ok(json!({ "updated": updated }))
}

async fn subscription_ended(state: &AppState, subscription_id: &str) -> Result<Value, WebhookError> {
    let deleted = state.store.tombstone_by_subscription(subscription_id).await?;
    if !deleted {
        // Re-delivery after a completed tombstone still lands here; ack it
        warn!(subscription = %subscription_id, "tombstone for unknown subscription");
    }
    Ok(json!({ "deleted": deleted }))
}

/// Provision an account from provider data: random password, Argon2 hash,
/// idempotent insert, best-effort welcome mail.
async fn register_user(
    state: &AppState,
    external_id: &str,
    email: &str,
    name: &str,
) -> Result<User, WebhookError> {
    let plain_password = password::generate_password(16);
    let password_hash =
        password::hash_password(&plain_password).map_err(|_| WebhookError::Hashing)?;

    let user = User {
        id: Uuid::new_v4(),
        external_id: external_id.to_string(),
        email: email.to_string(),
        firstname: name.to_string(),
        lastname: String::new(),
        avatar_url: String::new(),
        password_hash,
        role: GatewayRole::User,
        created_at: Utc::now(),
        updated_at: None,
        deleted_at: None,
    };

    let user = state.store.create_user(user).await?;

    if !user.email.is_empty() {
        let mailer = state.mailer.clone();
        let recipient = user.email.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_password(&recipient, &plain_password).await {
                error!(error = %e, recipient, "sending generated password email");
            }
        });
    }

    Ok(user)
}
