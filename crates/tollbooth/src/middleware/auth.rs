//! Identity extraction. One typed record travels through request
//! extensions; handlers never touch raw claims.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::SignedCookieJar;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::error::ApiError;
use crate::models::{GatewayRole, User};
use crate::router::AppState;
use crate::store::StoreError;

/// The authenticated caller, attached to the request once the bearer is
/// verified and the account loaded.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub role: GatewayRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == GatewayRole::Admin
    }
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Identity {
            id: user.id,
            external_id: user.external_id,
            email: user.email,
            firstname: user.firstname,
            lastname: user.lastname,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Resolve the caller from `Authorization: Bearer` or the session cookie.
pub async fn authenticate(
    state: &AppState,
    jar: &SignedCookieJar,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    let token = bearer_token(headers)
        .or_else(|| {
            jar.get(&state.cookie_name)
                .map(|cookie| cookie.value().to_string())
        })
        .ok_or(AuthError::MissingCredentials)?;

    let user_id = state.jwt.subject(&token)?;

    let user = state
        .store
        .get_user_by_id(user_id)
        .await
        .map_err(|err| match err {
            StoreError::UserNotFound => ApiError::Auth(AuthError::UnknownSubject),
            other => other.into(),
        })?;

    Ok(Identity::from(user))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Authoritative: any failure is a 401 and downstream never runs.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&state, &jar, req.headers()).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) => {
            debug!(error = %err, "rejecting unauthenticated request");
            err.into_response()
        }
    }
}

/// Non-authoritative: on failure the request proceeds anonymously.
pub async fn optional_auth(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    if let Ok(identity) = authenticate(&state, &jar, req.headers()).await {
        req.extensions_mut().insert(identity);
    }
    next.run(req).await
}

/// Second gate after identity is populated: ADMIN or 403.
pub async fn require_admin(req: Request, next: Next) -> Response {
    match req.extensions().get::<Identity>() {
        Some(identity) if identity.is_admin() => next.run(req).await,
        _ => ApiError::Forbidden.into_response(),
    }
}
