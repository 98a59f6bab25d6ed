//! HTTP routers: the public tenant API and the trusted admin API.

mod assets;
mod error;
mod tenants;

pub use error::{
    ApiError, ErrorResponse, INVALID_BODY_MESSAGE, INVALID_PARAMETERS_MESSAGE,
    ValidationErrorResponse,
};

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::assets::{AssetStore, AssetStoreError};
use crate::auth::{AuthState, CredentialValidator, record_failure, require_tenant};
use crate::db::SchemaMigrator;
use crate::health::{HealthReport, HealthState, HealthStatus};
use crate::tenant::TenantDirectory;

/// State shared by both routers.
#[derive(Clone)]
pub struct AppState {
    pub directory: TenantDirectory,
    pub assets: AssetStore,
    pub migrator: SchemaMigrator,
    pub validator: Arc<CredentialValidator>,
    pub health: HealthState,
}

impl AppState {
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            validator: self.validator.clone(),
            health: self.health.clone(),
        }
    }

    /// Map a storage failure raised while handling `action`. Routing faults
    /// come back as authentication errors and count against health like
    /// those raised by `require_tenant`.
    pub(crate) async fn store_failure(&self, action: &str, err: AssetStoreError) -> ApiError {
        let err = ApiError::from_store(action, err);
        if let ApiError::Auth(auth) = &err {
            record_failure(&self.health, auth).await;
        }
        err
    }
}

/// Tenant-facing API. Everything except `/health` requires a credential.
pub fn create_public_router(state: AppState) -> Router {
    let tenant_routes = Router::new()
        .route(
            "/asset",
            get(assets::read_asset_page).post(assets::create_asset),
        )
        .route(
            "/asset/{id}",
            get(assets::read_asset)
                .put(assets::update_asset)
                .delete(assets::delete_asset),
        )
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_tenant,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(tenant_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Admin API. Must only be bound to a trusted address.
pub fn create_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/tenants",
            get(tenants::list_tenants).post(tenants::create_tenant),
        )
        .route("/tenants/{key}", get(tenants::get_tenant))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.report().await;
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
