//! Service catalog endpoints: public listing, pricing page, and the admin
//! CRUD surface.

use axum::extract::{Extension, Path, State};
use axum::response::Html;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::Identity;
use crate::models::{Role, Service};
use crate::router::AppState;
use crate::serializer::{self, PublicService};

/// GET /services. Anonymous callers see the whole catalog; logged-in
/// callers see the services they hold an active binding for.
pub async fn list(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
) -> Result<Json<Vec<PublicService>>, ApiError> {
    let identity = identity.map(|Extension(identity)| identity);

    let services = match &identity {
        Some(caller) => state.store.list_user_services(caller.id).await?,
        None => state.store.list_services().await?,
    };

    let admin = identity.as_ref().is_some_and(Identity::is_admin);
    Ok(Json(serializer::services(&services, admin)))
}

/// GET /auth/admin/services.
pub async fn list_admin(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicService>>, ApiError> {
    let services = state.store.list_services().await?;
    Ok(Json(serializer::services(&services, true)))
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub domain: Option<String>,
    pub host: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub required_roles: Vec<Role>,
    #[serde(default)]
    pub pricing_table_id: String,
    #[serde(default)]
    pub pricing_table_publishable_key: String,
}

/// POST /auth/admin/services. Upserts by name.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<PublicService>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if body.host.is_empty() {
        return Err(ApiError::BadRequest("host is required".to_string()));
    }

    let prefix = if body.prefix.is_empty() {
        format!("/{}", body.name)
    } else {
        body.prefix
    };

    let service = Service {
        id: Uuid::new_v4(),
        name: body.name,
        prefix,
        domain: body.domain,
        host: body.host,
        description: body.description,
        image_url: body.image_url,
        required_roles: body.required_roles,
        pricing_table_id: body.pricing_table_id,
        pricing_table_publishable_key: body.pricing_table_publishable_key,
        status: String::new(),
        retry_count: 0,
        created_at: Utc::now(),
        updated_at: None,
        deleted_at: None,
    };

    let created = state.store.upsert_service(service).await?;
    Ok(Json(serializer::service(&created, true)))
}

/// DELETE /auth/admin/services/{service_id}.
pub async fn delete(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.delete_service(service_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /pricing/{service_name}. Renders the provider's embedded pricing
/// table; the service id rides along as the checkout reference.
pub async fn pricing_page(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    identity: Option<Extension<Identity>>,
) -> Result<Html<String>, ApiError> {
    let service = state.store.get_service_by_name(&service_name).await?;

    let customer_attrs = identity
        .map(|Extension(identity)| {
            format!(
                "customer-email=\"{}\"\n            client-customer-id=\"{}\"",
                identity.email, identity.id
            )
        })
        .unwrap_or_default();

    let page = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{name}</title>
</head>
<body>
    <script async src="https://js.stripe.com/v3/pricing-table.js"></script>
    <stripe-pricing-table pricing-table-id="{table_id}"
            publishable-key="{publishable_key}"
            client-reference-id="{service_id}"
            {customer_attrs}
            >
    </stripe-pricing-table>
</body>
</html>
"#,
        name = service.name,
        table_id = service.pricing_table_id,
        publishable_key = service.pricing_table_publishable_key,
        service_id = service.id,
        customer_attrs = customer_attrs,
    );

    Ok(Html(page))
}
