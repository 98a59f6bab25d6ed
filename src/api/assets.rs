//! Asset CRUD handlers. Every handler runs behind `require_tenant`, so the
//! tenant context and identity are always present.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use http::StatusCode;
use tracing::debug;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::assets::{
    Asset, AssetFields, AssetRequest, Page, PageParams, PageRequest, ValidationError,
    parse_asset_id,
};
use crate::auth::{READ_ASSET, ValidatedIdentity, WRITE_ASSET};
use crate::tenant::TenantContext;

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("No Asset entity found with ID {}", id))
}

fn path_id(raw: &str) -> Result<Uuid, ApiError> {
    parse_asset_id(raw).map_err(|e| ApiError::InvalidParameters(vec![e]))
}

fn body_fields(body: Result<Json<AssetRequest>, JsonRejection>) -> Result<AssetFields, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        ApiError::InvalidBody(vec![ValidationError::new(
            "requestBody",
            rejection.body_text(),
        )])
    })?;
    request.validate().map_err(ApiError::InvalidBody)
}

pub async fn create_asset(
    State(state): State<AppState>,
    ctx: TenantContext,
    Extension(identity): Extension<ValidatedIdentity>,
    body: Result<Json<AssetRequest>, JsonRejection>,
) -> Result<Json<Asset>, ApiError> {
    identity.require_role(WRITE_ASSET)?;
    let fields = body_fields(body)?;

    match state.assets.create(&ctx, fields).await {
        Ok(asset) => Ok(Json(asset)),
        Err(e) => Err(state.store_failure("creating", e).await),
    }
}

pub async fn read_asset(
    State(state): State<AppState>,
    ctx: TenantContext,
    Extension(identity): Extension<ValidatedIdentity>,
    Path(raw_id): Path<String>,
) -> Result<Json<Asset>, ApiError> {
    identity.require_role(READ_ASSET)?;
    let id = path_id(&raw_id)?;

    match state.assets.read(&ctx, id).await {
        Ok(found) => found.map(Json).ok_or_else(|| not_found(id)),
        Err(e) => Err(state.store_failure("reading", e).await),
    }
}

pub async fn read_asset_page(
    State(state): State<AppState>,
    ctx: TenantContext,
    Extension(identity): Extension<ValidatedIdentity>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Page<Asset>>, ApiError> {
    identity.require_role(READ_ASSET)?;
    let Query(params) = params.map_err(|rejection| {
        ApiError::InvalidParameters(vec![ValidationError::new("query", rejection.body_text())])
    })?;
    let request = PageRequest::from_params(&params).map_err(ApiError::InvalidParameters)?;
    debug!("Page request from {}: {:?}", identity.subject, request);

    match state.assets.read_page(&ctx, &request).await {
        Ok(page) => Ok(Json(page)),
        Err(e) => Err(state.store_failure("reading", e).await),
    }
}

pub async fn update_asset(
    State(state): State<AppState>,
    ctx: TenantContext,
    Extension(identity): Extension<ValidatedIdentity>,
    Path(raw_id): Path<String>,
    body: Result<Json<AssetRequest>, JsonRejection>,
) -> Result<Json<Asset>, ApiError> {
    identity.require_role(WRITE_ASSET)?;
    let id = path_id(&raw_id)?;
    let fields = body_fields(body)?;

    match state.assets.update(&ctx, id, fields).await {
        Ok(updated) => updated.map(Json).ok_or_else(|| not_found(id)),
        Err(e) => Err(state.store_failure("updating", e).await),
    }
}

pub async fn delete_asset(
    State(state): State<AppState>,
    ctx: TenantContext,
    Extension(identity): Extension<ValidatedIdentity>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    identity.require_role(WRITE_ASSET)?;
    let id = path_id(&raw_id)?;

    match state.assets.delete(&ctx, id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(id)),
        Err(e) => Err(state.store_failure("deleting", e).await),
    }
}
