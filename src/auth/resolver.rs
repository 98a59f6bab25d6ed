//! Issuer-to-tenant resolution.
//!
//! The issuer is read from the credential before its signature is checked,
//! only to pick the tenant whose keys will then verify it. Nothing read at
//! this stage is trusted beyond that choice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::error::AuthError;
use crate::auth::jwks::{JwksCache, JwksCacheError, JwksCacheOptions, KeySetSource};
use crate::tenant::{Tenant, TenantDirectory, TenantLookup};
use crate::types::Issuer;

/// Default lifetime of a cached verifier (5 minutes).
pub const DEFAULT_VERIFIER_TTL_SECONDS: u64 = 300;

/// Verifies credentials for exactly one tenant.
pub struct TenantVerifier {
    tenant: Tenant,
    keys: Arc<JwksCache>,
}

impl TenantVerifier {
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn issuer(&self) -> &Issuer {
        &self.tenant.issuer
    }

    /// Key for `kid` from this tenant's trust root, and nowhere else.
    pub async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksCacheError> {
        self.keys.get_key(kid).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    /// How long a resolved verifier is reused before the directory is
    /// consulted again.
    pub verifier_ttl: Duration,
    pub jwks: JwksCacheOptions,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            verifier_ttl: Duration::from_secs(DEFAULT_VERIFIER_TTL_SECONDS),
            jwks: JwksCacheOptions::default(),
        }
    }
}

struct CachedVerifier {
    verifier: Arc<TenantVerifier>,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct UnverifiedClaims {
    iss: Option<serde_json::Value>,
}

/// Read the `iss` claim without verifying anything.
pub fn unverified_issuer(raw: &str) -> Result<Issuer, AuthError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AuthError::MalformedCredential(
            "expected three dot-separated segments".to_string(),
        ));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| AuthError::MalformedCredential(format!("payload encoding: {}", e)))?;
    let claims: UnverifiedClaims = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::MalformedCredential(format!("payload json: {}", e)))?;

    match claims.iss {
        Some(serde_json::Value::String(iss)) if !iss.is_empty() => Ok(Issuer::new(iss)),
        Some(_) => Err(AuthError::MalformedCredential(
            "iss claim is not a string".to_string(),
        )),
        None => Err(AuthError::MalformedCredential(
            "missing iss claim".to_string(),
        )),
    }
}

/// Maps credentials to the verifier of the tenant that issued them.
pub struct IssuerResolver {
    directory: TenantDirectory,
    source: Arc<dyn KeySetSource>,
    options: ResolverOptions,
    cache: RwLock<HashMap<Issuer, CachedVerifier>>,
}

impl IssuerResolver {
    pub fn new(
        directory: TenantDirectory,
        source: Arc<dyn KeySetSource>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            directory,
            source,
            options,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Pick the verifier for a raw credential.
    pub async fn resolve(&self, raw: &str) -> Result<Arc<TenantVerifier>, AuthError> {
        let issuer = unverified_issuer(raw)?;
        self.resolve_issuer(&issuer).await
    }

    /// Pick the verifier for a known issuer string.
    pub async fn resolve_issuer(&self, issuer: &Issuer) -> Result<Arc<TenantVerifier>, AuthError> {
        let previous_keys = {
            let cache = self.cache.read().await;
            match cache.get(issuer) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(entry.verifier.clone());
                }
                Some(entry) => Some(entry.verifier.keys.clone()),
                None => None,
            }
        };

        let lookup = self
            .directory
            .lookup_by_issuer(issuer)
            .await
            .map_err(|e| AuthError::DirectoryUnavailable(e.to_string()))?;

        let tenant = match lookup {
            TenantLookup::Found(tenant) => tenant,
            TenantLookup::NotFound => {
                self.cache.write().await.remove(issuer);
                return Err(AuthError::UnknownIssuer(issuer.clone()));
            }
        };

        // Keep already fetched keys when the tenant's trust root is unchanged.
        let trust_root = tenant.trust_root_url();
        let keys = match previous_keys {
            Some(keys) if keys.jwks_url() == trust_root => keys,
            _ => Arc::new(JwksCache::new(
                trust_root,
                self.options.jwks,
                self.source.clone(),
            )),
        };

        debug!("Resolved issuer {} to tenant {}", issuer, tenant.key);
        let verifier = Arc::new(TenantVerifier { tenant, keys });
        self.cache.write().await.insert(
            issuer.clone(),
            CachedVerifier {
                verifier: verifier.clone(),
                expires_at: Instant::now() + self.options.verifier_ttl,
            },
        );
        Ok(verifier)
    }

    /// Forget the cached verifier for `issuer`.
    pub async fn invalidate(&self, issuer: &Issuer) {
        if self.cache.write().await.remove(issuer).is_some() {
            debug!("Invalidated verifier for issuer {}", issuer);
        }
    }

    /// Forget every cached verifier.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        if !cache.is_empty() {
            warn!("Dropping {} cached tenant verifiers", cache.len());
        }
        cache.clear();
    }

    pub async fn cached_verifiers(&self) -> usize {
        self.cache.read().await.len()
    }
}
