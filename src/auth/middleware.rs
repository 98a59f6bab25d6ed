//! Axum middleware that authenticates a request and binds its tenant.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header;
use tracing::{error, warn};

use crate::auth::error::AuthError;
use crate::auth::validator::CredentialValidator;
use crate::health::HealthState;
use crate::tenant::TenantContext;

/// State needed by [`require_tenant`].
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<CredentialValidator>,
    pub health: HealthState,
}

/// Extract the bearer credential from the `Authorization` header.
pub fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticate the request and run the rest of the stack with its tenant
/// context and identity installed as request extensions.
///
/// Requests never proceed without a bound context: any failure is answered
/// here with an empty-bodied error response.
pub async fn require_tenant(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(raw) = bearer_token(&request).map(str::to_string) else {
        return AuthError::MissingCredential.into_response();
    };

    // A context can only come from this layer; one that is already present
    // means the stack was assembled wrong.
    if request.extensions_mut().remove::<TenantContext>().is_some() {
        error!("Request reached authentication with a tenant context already set");
    }

    let health = state.health.clone();
    let outcome = state
        .validator
        .authenticate(&raw, |identity, ctx| async move {
            if health.is_tenant_unavailable(&identity.tenant_key).await {
                return AuthError::TenantUnavailable(identity.tenant_key).into_response();
            }
            request.extensions_mut().insert(ctx);
            request.extensions_mut().insert(identity);
            next.run(request).await
        })
        .await;

    match outcome {
        Ok(response) => response,
        Err(err) => {
            record_failure(&state.health, &err).await;
            err.into_response()
        }
    }
}

/// Log an authentication failure and feed the ones that affect service
/// health into `health`.
pub async fn record_failure(health: &HealthState, err: &AuthError) {
    match err {
        AuthError::UnknownIssuer(issuer) => {
            health.record_unknown_issuer();
            warn!("Rejected credential from unknown issuer {}", issuer);
        }
        AuthError::DirectoryUnavailable(msg) => {
            health.record_directory_fault().await;
            error!("Tenant directory unavailable during authentication: {}", msg);
        }
        AuthError::PartitionUnavailable(msg) => {
            error!("Tenant partition unavailable: {}", msg);
        }
        other => warn!("Authentication failed: {}", other),
    }
}
