//! Credential validation and tenant binding.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::error::AuthError;
use crate::auth::jwks::JwksCacheError;
use crate::auth::resolver::IssuerResolver;
use crate::tenant::TenantContext;
use crate::types::{Role, Subject, TenantKey};

/// Default clock skew tolerance for `exp`, in seconds.
pub const DEFAULT_LEEWAY_SECONDS: u64 = 30;

/// Signature algorithms accepted from tenant identity providers.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

#[derive(Debug, Clone, Deserialize)]
struct RealmAccess {
    roles: Vec<String>,
}

/// Claims a tenant credential must carry beyond `exp` and `iss`. A missing
/// or ill-typed field fails decoding and is reported as malformed.
#[derive(Debug, Deserialize)]
struct CredentialClaims {
    sub: String,
    realm_access: RealmAccess,
}

/// Who the caller is, once their credential checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedIdentity {
    pub subject: Subject,
    pub roles: BTreeSet<Role>,
    pub tenant_key: TenantKey,
}

impl ValidatedIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }

    /// Fail with `InsufficientRole` unless `role` was granted.
    pub fn require_role(&self, role: &str) -> Result<(), AuthError> {
        if self.has_role(role) {
            Ok(())
        } else {
            debug!(
                "Subject {} of tenant {} lacks role {}",
                self.subject, self.tenant_key, role
            );
            Err(AuthError::InsufficientRole(Role::new(role)))
        }
    }
}

/// Validation settings applied to every tenant.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Expected `aud`; audience is not checked when unset.
    pub audience: Option<String>,
    pub leeway_seconds: u64,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            audience: None,
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
        }
    }
}

/// Checks credentials against the verifier of the tenant that issued them.
pub struct CredentialValidator {
    resolver: Arc<IssuerResolver>,
    options: ValidatorOptions,
}

impl CredentialValidator {
    pub fn new(resolver: Arc<IssuerResolver>, options: ValidatorOptions) -> Self {
        Self { resolver, options }
    }

    pub fn resolver(&self) -> &Arc<IssuerResolver> {
        &self.resolver
    }

    /// Verify a raw bearer credential.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedIdentity, AuthError> {
        let verifier = self.resolver.resolve(raw).await?;

        let header = decode_header(raw)
            .map_err(|e| AuthError::MalformedCredential(format!("header: {}", e)))?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::InvalidCredential(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }

        let key = verifier
            .decoding_key(header.kid.as_deref())
            .await
            .map_err(|e| match e {
                JwksCacheError::KeyNotFound(_)
                | JwksCacheError::NoKeysAvailable
                | JwksCacheError::KidRequired => {
                    AuthError::InvalidCredential(e.to_string())
                }
                _ => {
                    warn!(
                        "Key set for tenant {} unavailable: {}",
                        verifier.tenant().key,
                        e
                    );
                    AuthError::InvalidCredential(e.to_string())
                }
            })?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.options.leeway_seconds;
        validation.set_issuer(&[verifier.issuer().as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match &self.options.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<CredentialClaims>(raw, &key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_)
                | ErrorKind::MissingRequiredClaim(_) => {
                    AuthError::MalformedCredential(e.to_string())
                }
                _ => AuthError::InvalidCredential(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::MalformedCredential("empty sub claim".to_string()));
        }

        let tenant_key = verifier.tenant().key.clone();
        debug!("Credential verified for {} of tenant {}", claims.sub, tenant_key);

        Ok(ValidatedIdentity {
            subject: Subject::new(claims.sub),
            roles: claims
                .realm_access
                .roles
                .into_iter()
                .map(Role::new)
                .collect(),
            tenant_key,
        })
    }

    /// Verify `raw` and run `work` with the tenant context bound.
    ///
    /// On failure `work` never runs, so nothing downstream observes a
    /// context for an unverified caller.
    pub async fn authenticate<F, Fut, T>(&self, raw: &str, work: F) -> Result<T, AuthError>
    where
        F: FnOnce(ValidatedIdentity, TenantContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let identity = self.validate(raw).await?;
        let key = identity.tenant_key.clone();
        Ok(TenantContext::with_tenant(key, move |ctx| work(identity, ctx)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testutil::{
        ARQUEBUS_ISSUER, ARQUEBUS_KID, ARQUEBUS_PRIVATE_KEY, BALAM_ISSUER, BALAM_KID,
        BALAM_PRIVATE_KEY, Fixture, UNKNOWN_ISSUER, arquebus_token, balam_token, claims, sign,
    };
    use serde_json::json;

    async fn setup_validator() -> (Fixture, CredentialValidator) {
        let fixture = Fixture::new().await;
        let validator = CredentialValidator::new(fixture.resolver(), ValidatorOptions::default());
        (fixture, validator)
    }

    #[tokio::test]
    async fn test_valid_credentials_for_each_tenant() {
        let (_fixture, validator) = setup_validator().await;

        let identity = validator
            .validate(&arquebus_token(&["read:asset", "write:asset"]))
            .await
            .unwrap();
        assert_eq!(identity.tenant_key.as_str(), "arquebus");
        assert_eq!(identity.subject.as_str(), "arquebus-user");
        assert!(identity.has_role("read:asset"));
        assert!(identity.require_role("write:asset").is_ok());

        let identity = validator.validate(&balam_token(&["read:asset"])).await.unwrap();
        assert_eq!(identity.tenant_key.as_str(), "balam");
        assert!(matches!(
            identity.require_role("write:asset"),
            Err(AuthError::InsufficientRole(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_by_other_tenant_key_is_rejected() {
        let (_fixture, validator) = setup_validator().await;
        let payload = claims(ARQUEBUS_ISSUER, "intruder", &["read:asset"]);

        // Balam's key id is not in arquebus' key set.
        let token = sign(BALAM_PRIVATE_KEY, Some(BALAM_KID), &payload);
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::InvalidCredential(_))
        ));

        // Balam's key presented under arquebus' key id.
        let token = sign(BALAM_PRIVATE_KEY, Some(ARQUEBUS_KID), &payload);
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::InvalidCredential(_))
        ));

        // No key id at all.
        let token = sign(BALAM_PRIVATE_KEY, None, &payload);
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_credential() {
        let (_fixture, validator) = setup_validator().await;
        let mut payload = claims(BALAM_ISSUER, "balam-user", &[]);
        payload["exp"] = json!(chrono::Utc::now().timestamp() - 3600);

        let token = sign(BALAM_PRIVATE_KEY, Some(BALAM_KID), &payload);
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_claims_are_malformed() {
        let (_fixture, validator) = setup_validator().await;

        let payload = json!({ "iss": ARQUEBUS_ISSUER, "sub": "no-exp" });
        let token = sign(ARQUEBUS_PRIVATE_KEY, Some(ARQUEBUS_KID), &payload);
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::MalformedCredential(_))
        ));

        let payload = json!({
            "iss": ARQUEBUS_ISSUER,
            "exp": chrono::Utc::now().timestamp() + 600,
        });
        let token = sign(ARQUEBUS_PRIVATE_KEY, Some(ARQUEBUS_KID), &payload);
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::MalformedCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_or_ill_typed_roles_are_malformed() {
        let (_fixture, validator) = setup_validator().await;
        let exp = chrono::Utc::now().timestamp() + 600;

        let payloads = [
            json!({ "iss": ARQUEBUS_ISSUER, "sub": "plain", "exp": exp }),
            json!({ "iss": ARQUEBUS_ISSUER, "sub": "plain", "exp": exp, "realm_access": {} }),
            json!({
                "iss": ARQUEBUS_ISSUER,
                "sub": "plain",
                "exp": exp,
                "realm_access": { "roles": "read:asset" },
            }),
        ];
        for payload in payloads {
            let token = sign(ARQUEBUS_PRIVATE_KEY, Some(ARQUEBUS_KID), &payload);
            assert!(
                matches!(
                    validator.validate(&token).await,
                    Err(AuthError::MalformedCredential(_))
                ),
                "{}",
                payload
            );
        }

        // An explicitly empty role list is well formed.
        let payload = json!({
            "iss": ARQUEBUS_ISSUER,
            "sub": "plain",
            "exp": exp,
            "realm_access": { "roles": [] },
        });
        let token = sign(ARQUEBUS_PRIVATE_KEY, Some(ARQUEBUS_KID), &payload);
        let identity = validator.validate(&token).await.unwrap();
        assert!(identity.roles.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_issuer_is_reported() {
        let (_fixture, validator) = setup_validator().await;
        let token = sign(
            ARQUEBUS_PRIVATE_KEY,
            Some(ARQUEBUS_KID),
            &claims(UNKNOWN_ISSUER, "x", &[]),
        );
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::UnknownIssuer(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_binds_context() {
        let (_fixture, validator) = setup_validator().await;

        let bound = validator
            .authenticate(&balam_token(&["read:asset"]), |identity, ctx| async move {
                assert_eq!(ctx.current(), Some(&identity.tenant_key));
                ctx.current().cloned()
            })
            .await
            .unwrap();
        assert_eq!(bound, Some(TenantKey::new("balam")));
    }

    #[tokio::test]
    async fn test_authenticate_skips_work_on_failure() {
        let (_fixture, validator) = setup_validator().await;
        let mut ran = false;

        let result = validator
            .authenticate("not-a-token", |_, _| {
                ran = true;
                async {}
            })
            .await;
        assert!(matches!(result, Err(AuthError::MalformedCredential(_))));
        assert!(!ran);
    }
}
