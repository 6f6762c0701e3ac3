//! Domain records persisted in the relational store.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway-level role of a user account, distinct from the per-service
/// capability roles granted by subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayRole {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "USER")]
    User,
}

impl GatewayRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayRole::Admin => "ADMIN",
            GatewayRole::User => "USER",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ADMIN" => GatewayRole::Admin,
            _ => GatewayRole::User,
        }
    }
}

impl fmt::Display for GatewayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability label. A user holds a role for a bounded time via a payment
/// subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Role(name.into())
    }

    /// Sentinel for bindings bought against a service with no required
    /// roles. Grants nothing; it only records the purchase.
    pub fn none() -> Self {
        Role(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role(s.to_string())
    }
}

/// A backend HTTP origin fronted by the gateway, identified by a path
/// prefix or virtual host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    /// URL path prefix including the leading slash, e.g. "/check-certs".
    pub prefix: String,
    /// Optional virtual host; requests for this Host resolve here too.
    #[serde(default)]
    pub domain: Option<String>,
    /// Upstream origin, scheme + authority.
    pub host: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Empty list means the service is public.
    #[serde(default)]
    pub required_roles: Vec<Role>,
    #[serde(default)]
    pub pricing_table_id: String,
    #[serde(default)]
    pub pricing_table_publishable_key: String,
    /// Last heartbeat classification. "OK" when healthy.
    #[serde(default)]
    pub status: String,
    /// Heartbeat failure counter; transient, never persisted.
    #[serde(skip)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Service {
    pub fn is_public(&self) -> bool {
        self.required_roles.is_empty()
    }

    /// The role that gates access: the first required role.
    pub fn gate_role(&self) -> Option<&Role> {
        self.required_roles.first()
    }
}

/// A gateway account. `external_id` ties it to the payment provider's
/// customer object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub avatar_url: String,
    /// Argon2id PHC string; never serialized.
    #[serde(skip)]
    pub password_hash: String,
    pub role: GatewayRole,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The persisted fact that a user holds a role because of a specific
/// subscription. Primary key: (user_id, role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub subscription_id: String,
    pub role: Role,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RoleBinding {
    /// A binding grants its role while it is not tombstoned and not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.expires_at.map_or(true, |t| t > now)
    }
}
