//! Outward-facing views of the domain records. Routing internals (upstream
//! host, required roles) are admin-only; credentials never leave.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Role, Service, User};

#[derive(Debug, Serialize)]
pub struct PublicService {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_roles: Vec<Role>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pricing_table_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pricing_table_publishable_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub firstname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lastname: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn service(service: &Service, admin: bool) -> PublicService {
    PublicService {
        id: service.id,
        name: service.name.clone(),
        description: service.description.clone(),
        prefix: service.prefix.clone(),
        domain: service.domain.clone(),
        host: admin.then(|| service.host.clone()),
        image_url: service.image_url.clone(),
        required_roles: if admin {
            service.required_roles.clone()
        } else {
            Vec::new()
        },
        pricing_table_id: service.pricing_table_id.clone(),
        pricing_table_publishable_key: service.pricing_table_publishable_key.clone(),
        status: service.status.clone(),
        created_at: service.created_at,
        updated_at: service.updated_at,
        deleted_at: service.deleted_at,
    }
}

pub fn services(list: &[Service], admin: bool) -> Vec<PublicService> {
    list.iter().map(|s| service(s, admin)).collect()
}

pub fn user(user: &User) -> PublicUser {
    PublicUser {
        id: user.id,
        email: user.email.clone(),
        avatar: user.avatar_url.clone(),
        firstname: user.firstname.clone(),
        lastname: user.lastname.clone(),
        role: user.role.to_string(),
        created_at: user.created_at,
        updated_at: user.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewayRole;

    fn sample_service() -> Service {
        Service {
            id: Uuid::new_v4(),
            name: "check-certs".to_string(),
            prefix: "/check-certs".to_string(),
            domain: None,
            host: "http://checkcerts.internal:8080".to_string(),
            description: "Certificate expiry monitoring".to_string(),
            image_url: None,
            required_roles: vec![Role::new("check-certs")],
            pricing_table_id: "prctbl_1".to_string(),
            pricing_table_publishable_key: "pk_test_1".to_string(),
            status: "OK".to_string(),
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn anonymous_view_hides_routing_internals() {
        let view = service(&sample_service(), false);
        assert!(view.host.is_none());
        assert!(view.required_roles.is_empty());

        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("host"));
        assert!(!json.contains("required_roles"));
        assert!(json.contains("pricing_table_id"));
    }

    #[test]
    fn admin_view_exposes_host_and_roles() {
        let view = service(&sample_service(), true);
        assert_eq!(view.host.as_deref(), Some("http://checkcerts.internal:8080"));
        assert_eq!(view.required_roles.len(), 1);
    }

    #[test]
    fn password_hash_never_serializes() {
        let user_record = User {
            id: Uuid::new_v4(),
            external_id: "cus_1".to_string(),
            email: "gateway@gateway.com".to_string(),
            firstname: String::new(),
            lastname: String::new(),
            avatar_url: String::new(),
            password_hash: "$argon2id$secret".to_string(),
            role: GatewayRole::User,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };

        let direct = serde_json::to_string(&user_record).unwrap();
        assert!(!direct.contains("argon2id"));

        let view = serde_json::to_string(&user(&user_record)).unwrap();
        assert!(!view.contains("argon2id"));
        assert!(view.contains("gateway@gateway.com"));
    }
}
