//! Persistent state behind one object-safe trait, so the router, webhook
//! processor, and heartbeat all run identically against Postgres or the
//! in-memory store.

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Role, RoleBinding, Service, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    UserNotFound,

    #[error("service not found")]
    ServiceNotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // Users

    /// Insert a user; an existing row with the same email wins and is
    /// returned unchanged (idempotent webhook re-delivery).
    async fn create_user(&self, user: User) -> Result<User, StoreError>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn get_user_by_external_id(&self, external_id: &str)
        -> Result<Option<User>, StoreError>;

    async fn update_password(&self, email: &str, password_hash: &str) -> Result<User, StoreError>;

    // Services

    /// Insert a service; an existing row with the same name is updated
    /// (routing, roles, and pricing fields) and keeps its id.
    async fn upsert_service(&self, service: Service) -> Result<Service, StoreError>;

    /// Soft-delete. Returns whether a live row was tombstoned.
    async fn delete_service(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_service_by_id(&self, id: Uuid) -> Result<Service, StoreError>;

    async fn get_service_by_name(&self, name: &str) -> Result<Service, StoreError>;

    /// Routing lookup. Prefix wins when both prefix and domain match
    /// different services.
    async fn get_service_by_prefix_or_domain(
        &self,
        prefix: &str,
        domain: &str,
    ) -> Result<Option<Service>, StoreError>;

    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;

    /// Services the user holds an active binding for.
    async fn list_user_services(&self, user_id: Uuid) -> Result<Vec<Service>, StoreError>;

    async fn set_service_status(&self, id: Uuid, status: &str) -> Result<(), StoreError>;

    // Role bindings

    /// True iff an active binding exists for any of `roles`. An empty slice
    /// never grants.
    async fn has_any_role(&self, user_id: Uuid, roles: &[Role]) -> Result<bool, StoreError>;

    async fn get_binding(
        &self,
        user_id: Uuid,
        role: &Role,
    ) -> Result<Option<RoleBinding>, StoreError>;

    /// Insert or, on (user_id, role) conflict, replace subscription_id and
    /// expires_at and clear the tombstone.
    async fn upsert_binding(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        role: Role,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleBinding, StoreError>;

    /// Apply metadata and expiration to the binding keyed by subscription,
    /// clearing the tombstone. Returns whether a row changed.
    async fn update_by_subscription(
        &self,
        subscription_id: &str,
        metadata: HashMap<String, String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Soft-delete the binding keyed by subscription. Reversible by a
    /// subsequent upsert. Returns whether a row changed.
    async fn tombstone_by_subscription(&self, subscription_id: &str) -> Result<bool, StoreError>;

    // Refresh tokens

    async fn get_refresh_token(&self, user_id: Uuid) -> Result<Option<String>, StoreError>;

    /// Replace the user's refresh token (one live token per user).
    async fn put_refresh_token(&self, user_id: Uuid, token: &str) -> Result<(), StoreError>;

    async fn delete_refresh_token(&self, user_id: Uuid) -> Result<(), StoreError>;
}

/// Adapter feeding the heartbeat scheduler from the service catalog.
pub struct HeartbeatStore(pub Arc<dyn Store>);

#[async_trait]
impl tollcore::Beatable for HeartbeatStore {
    async fn fetch_services(&self) -> Result<Vec<tollcore::Target>, tollcore::BeatError> {
        let services = self.0.list_services().await?;
        Ok(services
            .into_iter()
            .map(|s| tollcore::Target {
                id: s.id,
                host: s.host,
            })
            .collect())
    }

    async fn set_status(&self, service: Uuid, status: String) -> Result<(), tollcore::BeatError> {
        self.0.set_service_status(service, &status).await?;
        Ok(())
    }
}
