//! Authentication for tenant requests.
//!
//! Every request carries a bearer credential issued by one tenant's identity
//! provider. Verification happens in three steps:
//!
//! - **Resolve**: read the unverified `iss` claim and look up the tenant
//!   registered for that issuer ([`IssuerResolver`]).
//! - **Verify**: check signature, expiry and issuer against that tenant's
//!   key set only ([`CredentialValidator`]).
//! - **Bind**: run the rest of the request with a [`TenantContext`] for the
//!   tenant ([`require_tenant`]).
//!
//! ## Security Model
//!
//! - A credential signed by one tenant's key never validates for another.
//! - Unknown issuers are rejected before any key material is fetched.
//! - Client-visible failure descriptions are fixed strings, except the
//!   unknown-tenant case which names the issuer.
//!
//! [`TenantContext`]: crate::tenant::TenantContext

mod error;
pub mod jwks;
mod middleware;
mod resolver;
#[cfg(test)]
pub(crate) mod testutil;
mod validator;

pub use error::AuthError;
pub use jwks::{
    DEFAULT_CACHE_TTL_SECONDS, HttpKeySetSource, JwksCache, JwksCacheError, JwksCacheOptions,
    KeySetSource,
};
pub use middleware::{AuthState, bearer_token, record_failure, require_tenant};
pub use resolver::{
    DEFAULT_VERIFIER_TTL_SECONDS, IssuerResolver, ResolverOptions, TenantVerifier,
    unverified_issuer,
};
pub use validator::{
    CredentialValidator, DEFAULT_LEEWAY_SECONDS, ValidatedIdentity, ValidatorOptions,
};

/// Role required to read assets.
pub const READ_ASSET: &str = "read:asset";

/// Role required to create, update or delete assets.
pub const WRITE_ASSET: &str = "write:asset";
