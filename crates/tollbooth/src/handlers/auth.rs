//! Session endpoints: login, logout, refresh, password change, and the
//! current-user view.

use axum::extract::{Extension, State};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::{password, AuthError};
use crate::error::ApiError;
use crate::middleware::Identity;
use crate::router::AppState;
use crate::serializer::{self, PublicUser};
use crate::store::StoreError;

const REFRESH_TOKEN_LENGTH: usize = 32;
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// POST /login. Returns the bearer and sets the session cookie; both carry
/// the same signed token.
pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(SignedCookieJar, Json<TokenResponse>), ApiError> {
    let user = state
        .store
        .get_user_by_email(&body.email)
        .await
        .map_err(|err| match err {
            // Unknown email and wrong password are indistinguishable
            StoreError::UserNotFound => ApiError::Auth(AuthError::InvalidPassword),
            other => other.into(),
        })?;

    if !password::verify_password(&body.password, &user.password_hash) {
        debug!(email = %body.email, "login rejected");
        return Err(AuthError::InvalidPassword.into());
    }

    let token = state.jwt.sign(user.id)?;
    let refresh = password::generate_password(REFRESH_TOKEN_LENGTH);
    state.store.put_refresh_token(user.id, &refresh).await?;

    let jar = jar.add(session_cookie(&state, &token));
    Ok((jar, Json(TokenResponse { token })))
}

/// GET /auth/refresh-token. Rotates both the bearer and the server-side
/// refresh token.
pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Json<TokenResponse>), ApiError> {
    let token = state.jwt.sign(identity.id)?;
    let refresh = password::generate_password(REFRESH_TOKEN_LENGTH);
    state.store.put_refresh_token(identity.id, &refresh).await?;

    let jar = jar.add(session_cookie(&state, &token));
    Ok((jar, Json(TokenResponse { token })))
}

/// GET /auth/logout. Deletes the refresh token and clears the cookie.
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Json<Value>), ApiError> {
    state.store.delete_refresh_token(identity.id).await?;

    let expired = Cookie::build((state.cookie_name.clone(), "")).path("/").build();
    let jar = jar.remove(expired);
    Ok((jar, Json(json!({ "logged_out": true }))))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

/// POST /auth/update-password. Always operates on the authenticated
/// account.
pub async fn update_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<UpdatePasswordRequest>,
) -> Result<Json<PublicUser>, ApiError> {
    if body.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let hash = password::hash_password(&body.password)
        .map_err(|_| ApiError::internal("password hashing failed"))?;
    let user = state.store.update_password(&identity.email, &hash).await?;

    Ok(Json(serializer::user(&user)))
}

/// GET /auth/user.
pub async fn current_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state.store.get_user_by_id(identity.id).await?;
    Ok(Json(serializer::user(&user)))
}

fn session_cookie(state: &AppState, token: &str) -> Cookie<'static> {
    Cookie::build((state.cookie_name.clone(), token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(state.cookie_max_age as i64))
        .build()
}
