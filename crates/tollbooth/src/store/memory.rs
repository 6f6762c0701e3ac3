//! DashMap-backed store with the same last-writer-wins semantics as the
//! Postgres implementation. Used by the test suites and `--store memory`
//! for local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{Role, RoleBinding, Service, User};
use crate::store::{Store, StoreError};

#[derive(Default)]
pub struct MemStore {
    users: DashMap<Uuid, User>,
    services: DashMap<Uuid, Service>,
    bindings: DashMap<(Uuid, Role), RoleBinding>,
    refresh_tokens: DashMap<Uuid, String>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let existing = self.users.iter().find_map(|entry| {
            let u = entry.value();
            if u.deleted_at.is_none()
                && (u.email == user.email
                    || (!u.external_id.is_empty() && u.external_id == user.external_id))
            {
                Some(u.clone())
            } else {
                None
            }
        });
        if let Some(existing) = existing {
            return Ok(existing);
        }

        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        self.users
            .get(&id)
            .filter(|u| u.deleted_at.is_none())
            .map(|u| u.clone())
            .ok_or(StoreError::UserNotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.users
            .iter()
            .find(|entry| entry.value().email == email && entry.value().deleted_at.is_none())
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::UserNotFound)
    }

    async fn get_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|entry| {
                entry.value().external_id == external_id && entry.value().deleted_at.is_none()
            })
            .map(|entry| entry.value().clone()))
    }

    async fn update_password(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let id = self
            .users
            .iter()
            .find(|entry| entry.value().email == email && entry.value().deleted_at.is_none())
            .map(|entry| *entry.key())
            .ok_or(StoreError::UserNotFound)?;

        let mut user = self.users.get_mut(&id).ok_or(StoreError::UserNotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Some(Utc::now());
        Ok(user.clone())
    }

    async fn upsert_service(&self, service: Service) -> Result<Service, StoreError> {
        let existing_id = self
            .services
            .iter()
            .find(|entry| entry.value().name == service.name)
            .map(|entry| *entry.key());

        let stored = match existing_id {
            Some(id) => {
                let mut entry = self
                    .services
                    .get_mut(&id)
                    .ok_or(StoreError::ServiceNotFound)?;
                entry.prefix = service.prefix;
                entry.domain = service.domain;
                entry.host = service.host;
                entry.description = service.description;
                entry.image_url = service.image_url;
                entry.required_roles = service.required_roles;
                entry.pricing_table_id = service.pricing_table_id;
                entry.pricing_table_publishable_key = service.pricing_table_publishable_key;
                entry.updated_at = Some(Utc::now());
                entry.clone()
            }
            None => {
                self.services.insert(service.id, service.clone());
                service
            }
        };
        Ok(stored)
    }

    async fn delete_service(&self, id: Uuid) -> Result<bool, StoreError> {
        match self.services.get_mut(&id) {
            Some(mut service) if service.deleted_at.is_none() => {
                service.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_service_by_id(&self, id: Uuid) -> Result<Service, StoreError> {
        self.services
            .get(&id)
            .filter(|s| s.deleted_at.is_none())
            .map(|s| s.clone())
            .ok_or(StoreError::ServiceNotFound)
    }

    async fn get_service_by_name(&self, name: &str) -> Result<Service, StoreError> {
        self.services
            .iter()
            .find(|entry| entry.value().name == name && entry.value().deleted_at.is_none())
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::ServiceNotFound)
    }

    async fn get_service_by_prefix_or_domain(
        &self,
        prefix: &str,
        domain: &str,
    ) -> Result<Option<Service>, StoreError> {
        let by_prefix = self
            .services
            .iter()
            .find(|entry| entry.value().prefix == prefix && entry.value().deleted_at.is_none())
            .map(|entry| entry.value().clone());
        if by_prefix.is_some() {
            return Ok(by_prefix);
        }

        Ok(self
            .services
            .iter()
            .find(|entry| {
                entry.value().deleted_at.is_none()
                    && entry.value().domain.as_deref() == Some(domain)
            })
            .map(|entry| entry.value().clone()))
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|entry| entry.value().deleted_at.is_none())
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn list_user_services(&self, user_id: Uuid) -> Result<Vec<Service>, StoreError> {
        let now = Utc::now();
        let held: Vec<Role> = self
            .bindings
            .iter()
            .filter(|entry| entry.key().0 == user_id && entry.value().is_active(now))
            .map(|entry| entry.key().1.clone())
            .collect();

        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|entry| {
                entry.value().deleted_at.is_none()
                    && entry
                        .value()
                        .required_roles
                        .iter()
                        .any(|role| held.contains(role))
            })
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn set_service_status(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        if let Some(mut service) = self.services.get_mut(&id) {
            service.status = status.to_string();
            service.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn has_any_role(&self, user_id: Uuid, roles: &[Role]) -> Result<bool, StoreError> {
        if roles.is_empty() {
            return Ok(false);
        }
        let now = Utc::now();
        Ok(roles.iter().any(|role| {
            self.bindings
                .get(&(user_id, role.clone()))
                .is_some_and(|binding| binding.is_active(now))
        }))
    }

    async fn get_binding(
        &self,
        user_id: Uuid,
        role: &Role,
    ) -> Result<Option<RoleBinding>, StoreError> {
        Ok(self
            .bindings
            .get(&(user_id, role.clone()))
            .map(|binding| binding.clone()))
    }

    async fn upsert_binding(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        role: Role,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleBinding, StoreError> {
        let key = (user_id, role.clone());
        let binding = match self.bindings.get_mut(&key) {
            Some(mut existing) => {
                existing.subscription_id = subscription_id.to_string();
                existing.expires_at = expires_at;
                existing.deleted_at = None;
                existing.updated_at = Some(Utc::now());
                existing.clone()
            }
            None => {
                let binding = RoleBinding {
                    user_id,
                    subscription_id: subscription_id.to_string(),
                    role,
                    metadata: HashMap::new(),
                    expires_at,
                    created_at: Utc::now(),
                    updated_at: None,
                    deleted_at: None,
                };
                self.bindings.insert(key, binding.clone());
                binding
            }
        };
        Ok(binding)
    }

    async fn update_by_subscription(
        &self,
        subscription_id: &str,
        metadata: HashMap<String, String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut changed = false;
        for mut entry in self.bindings.iter_mut() {
            if entry.value().subscription_id == subscription_id {
                let binding = entry.value_mut();
                binding.metadata = metadata.clone();
                binding.expires_at = expires_at;
                binding.deleted_at = None;
                binding.updated_at = Some(Utc::now());
                changed = true;
            }
        }
        Ok(changed)
    }

    async fn tombstone_by_subscription(&self, subscription_id: &str) -> Result<bool, StoreError> {
        let mut changed = false;
        for mut entry in self.bindings.iter_mut() {
            if entry.value().subscription_id == subscription_id {
                entry.value_mut().deleted_at = Some(Utc::now());
                entry.value_mut().updated_at = Some(Utc::now());
                changed = true;
            }
        }
        Ok(changed)
    }

    async fn get_refresh_token(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.refresh_tokens.get(&user_id).map(|t| t.clone()))
    }

    async fn put_refresh_token(&self, user_id: Uuid, token: &str) -> Result<(), StoreError> {
        self.refresh_tokens.insert(user_id, token.to_string());
        Ok(())
    }

    async fn delete_refresh_token(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.refresh_tokens.remove(&user_id);
        Ok(())
    }
}
