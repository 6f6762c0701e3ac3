//! Postgres-backed store. All mutations are independent single-row
//! statements; upserts carry the conflict handling, so no multi-row
//! transactions are needed. Migrations and the schema itself are owned by
//! the external migration tooling.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::models::{GatewayRole, Role, RoleBinding, Service, User};
use crate::store::{Store, StoreError};

const SERVICE_COLS: &str = "id, name, prefix, domain, host, description, image_url, \
     required_roles, pricing_table_id, pricing_table_publishable_key, status, \
     created_at, updated_at, deleted_at";

const USER_COLS: &str =
    "id, external_id, email, password, avatar, firstname, lastname, role, \
     created_at, updated_at, deleted_at";

const BINDING_COLS: &str =
    "user_id, subscription_id, role, metadata, expires_at, created_at, updated_at, deleted_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn service_from_row(row: &PgRow) -> Result<Service, sqlx::Error> {
    let roles: Vec<String> = row.try_get("required_roles")?;
    Ok(Service {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        prefix: row.try_get("prefix")?,
        domain: row.try_get("domain")?,
        host: row.try_get("host")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        required_roles: roles.into_iter().map(Role::new).collect(),
        pricing_table_id: row.try_get("pricing_table_id")?,
        pricing_table_publishable_key: row.try_get("pricing_table_publishable_key")?,
        status: row.try_get("status")?,
        retry_count: 0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password")?,
        avatar_url: row.try_get("avatar")?,
        firstname: row.try_get("firstname")?,
        lastname: row.try_get("lastname")?,
        role: GatewayRole::parse(&role),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn binding_from_row(row: &PgRow) -> Result<RoleBinding, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let metadata: Option<Json<HashMap<String, String>>> = row.try_get("metadata")?;
    Ok(RoleBinding {
        user_id: row.try_get("user_id")?,
        subscription_id: row.try_get("subscription_id")?,
        role: Role::new(role),
        metadata: metadata.map(|m| m.0).unwrap_or_default(),
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn role_names(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let query = format!(
            r#"INSERT INTO "user" (id, external_id, email, password, avatar, firstname, lastname, role, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT DO NOTHING
               RETURNING {USER_COLS}"#
        );

        let row = sqlx::query(&query)
            .bind(user.id)
            .bind(&user.external_id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.avatar_url)
            .bind(&user.firstname)
            .bind(&user.lastname)
            .bind(user.role.as_str())
            .bind(user.created_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(user_from_row(&row)?),
            // Conflict: the earlier row wins
            None => self.get_user_by_email(&user.email).await,
        }
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        let query =
            format!(r#"SELECT {USER_COLS} FROM "user" WHERE id = $1 AND deleted_at IS NULL"#);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(user_from_row(&row)?),
            None => Err(StoreError::UserNotFound),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let query =
            format!(r#"SELECT {USER_COLS} FROM "user" WHERE email = $1 AND deleted_at IS NULL"#);
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(user_from_row(&row)?),
            None => Err(StoreError::UserNotFound),
        }
    }

    async fn get_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let query = format!(
            r#"SELECT {USER_COLS} FROM "user" WHERE external_id = $1 AND deleted_at IS NULL"#
        );
        let row = sqlx::query(&query)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| user_from_row(&row)).transpose().map_err(Into::into)
    }

    async fn update_password(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let query = format!(
            r#"UPDATE "user" SET password = $2, updated_at = now()
               WHERE email = $1 AND deleted_at IS NULL
               RETURNING {USER_COLS}"#
        );
        let row = sqlx::query(&query)
            .bind(email)
            .bind(password_hash)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(user_from_row(&row)?),
            None => Err(StoreError::UserNotFound),
        }
    }

    async fn upsert_service(&self, service: Service) -> Result<Service, StoreError> {
        let query = format!(
            r#"INSERT INTO service (id, name, prefix, domain, host, description, image_url,
                   required_roles, pricing_table_id, pricing_table_publishable_key, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               ON CONFLICT (name) DO UPDATE
               SET prefix = excluded.prefix,
                   domain = excluded.domain,
                   host = excluded.host,
                   description = excluded.description,
                   image_url = excluded.image_url,
                   required_roles = excluded.required_roles,
                   pricing_table_id = excluded.pricing_table_id,
                   pricing_table_publishable_key = excluded.pricing_table_publishable_key,
                   updated_at = now()
               RETURNING {SERVICE_COLS}"#
        );

        let row = sqlx::query(&query)
            .bind(service.id)
            .bind(&service.name)
            .bind(&service.prefix)
            .bind(&service.domain)
            .bind(&service.host)
            .bind(&service.description)
            .bind(&service.image_url)
            .bind(role_names(&service.required_roles))
            .bind(&service.pricing_table_id)
            .bind(&service.pricing_table_publishable_key)
            .bind(service.created_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(service_from_row(&row)?)
    }

    async fn delete_service(&self, id: Uuid) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE service SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_service_by_id(&self, id: Uuid) -> Result<Service, StoreError> {
        let query =
            format!("SELECT {SERVICE_COLS} FROM service WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(service_from_row(&row)?),
            None => Err(StoreError::ServiceNotFound),
        }
    }

    async fn get_service_by_name(&self, name: &str) -> Result<Service, StoreError> {
        let query =
            format!("SELECT {SERVICE_COLS} FROM service WHERE name = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(service_from_row(&row)?),
            None => Err(StoreError::ServiceNotFound),
        }
    }

    async fn get_service_by_prefix_or_domain(
        &self,
        prefix: &str,
        domain: &str,
    ) -> Result<Option<Service>, StoreError> {
        // Prefix wins when both match different services
        let query = format!(
            "SELECT {SERVICE_COLS} FROM service
             WHERE deleted_at IS NULL AND (prefix = $1 OR domain = $2)
             ORDER BY (prefix = $1) DESC
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(prefix)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| service_from_row(&row))
            .transpose()
            .map_err(Into::into)
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let query =
            format!("SELECT {SERVICE_COLS} FROM service WHERE deleted_at IS NULL ORDER BY name");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| service_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn list_user_services(&self, user_id: Uuid) -> Result<Vec<Service>, StoreError> {
        let cols = SERVICE_COLS
            .split(", ")
            .map(|c| format!("s.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {cols} FROM service s
             INNER JOIN user_role ur
                 ON ur.user_id = $1 AND ur.role = ANY(s.required_roles)
             WHERE s.deleted_at IS NULL
               AND ur.deleted_at IS NULL
               AND (ur.expires_at IS NULL OR ur.expires_at > now())
             ORDER BY s.name"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| service_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn set_service_status(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE service SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn has_any_role(&self, user_id: Uuid, roles: &[Role]) -> Result<bool, StoreError> {
        if roles.is_empty() {
            return Ok(false);
        }

        let row = sqlx::query(
            "SELECT EXISTS (
                 SELECT 1 FROM user_role
                 WHERE user_id = $1
                   AND role = ANY($2)
                   AND (expires_at IS NULL OR expires_at > now())
                   AND deleted_at IS NULL
             ) AS held",
        )
        .bind(user_id)
        .bind(role_names(roles))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("held")?)
    }

    async fn get_binding(
        &self,
        user_id: Uuid,
        role: &Role,
    ) -> Result<Option<RoleBinding>, StoreError> {
        let query =
            format!("SELECT {BINDING_COLS} FROM user_role WHERE user_id = $1 AND role = $2");
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| binding_from_row(&row))
            .transpose()
            .map_err(Into::into)
    }

    async fn upsert_binding(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        role: Role,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleBinding, StoreError> {
        let query = format!(
            "INSERT INTO user_role (user_id, subscription_id, role, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, role) DO UPDATE
             SET subscription_id = excluded.subscription_id,
                 expires_at = excluded.expires_at,
                 deleted_at = NULL,
                 updated_at = now()
             RETURNING {BINDING_COLS}"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(subscription_id)
            .bind(role.as_str())
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(binding_from_row(&row)?)
    }

    async fn update_by_subscription(
        &self,
        subscription_id: &str,
        metadata: HashMap<String, String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE user_role
             SET metadata = $2, expires_at = $3, deleted_at = NULL, updated_at = now()
             WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(Json(metadata))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn tombstone_by_subscription(&self, subscription_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE user_role SET deleted_at = now(), updated_at = now()
             WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_refresh_token(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT refresh_token FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.try_get("refresh_token"))
            .transpose()
            .map_err(Into::into)
    }

    async fn put_refresh_token(&self, user_id: Uuid, token: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, refresh_token) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET refresh_token = excluded.refresh_token",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_refresh_token(&self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
