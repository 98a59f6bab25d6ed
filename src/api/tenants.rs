//! Admin handlers for the tenant directory. Only mounted on the admin
//! router, which is bound to a trusted address.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use http::StatusCode;
use tracing::{error, info};

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::assets::ValidationError;
use crate::db::TENANT_CHANGESET;
use crate::tenant::{NewTenant, Tenant, TenantLookup};
use crate::types::TenantKey;

pub async fn list_tenants(State(state): State<AppState>) -> Result<Json<Vec<Tenant>>, ApiError> {
    Ok(Json(state.directory.list_all().await?))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    match state.directory.lookup_by_key(&TenantKey::new(key.as_str())).await? {
        TenantLookup::Found(tenant) => Ok(Json(tenant)),
        TenantLookup::NotFound => Err(ApiError::NotFound(format!(
            "No Tenant entity found with key {}",
            key
        ))),
    }
}

/// Register a tenant and bring its partition up to date.
///
/// A tenant whose partition fails to migrate stays registered but is marked
/// unavailable, the same as after a failed startup migration.
pub async fn create_tenant(
    State(state): State<AppState>,
    body: Result<Json<NewTenant>, JsonRejection>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let Json(new_tenant) = body.map_err(|rejection| {
        ApiError::InvalidBody(vec![ValidationError::new(
            "requestBody",
            rejection.body_text(),
        )])
    })?;

    let tenant = state.directory.create_tenant(&new_tenant).await?;

    match state
        .migrator
        .migrate_partition(&tenant.partition_name, &TENANT_CHANGESET)
        .await
    {
        Ok(_) => state.health.mark_tenant_available(&tenant.key).await,
        Err(e) => {
            error!(
                "Partition {} of new tenant {} failed to migrate: {}",
                tenant.partition_name, tenant.key, e
            );
            state.health.mark_tenant_unavailable(tenant.key.clone()).await;
        }
    }

    // Verifiers are cached per issuer; the next credential starts fresh.
    state
        .validator
        .resolver()
        .invalidate(&tenant.issuer)
        .await;

    info!("Registered tenant {} ({})", tenant.key, tenant.display_name);
    Ok((StatusCode::CREATED, Json(tenant)))
}
