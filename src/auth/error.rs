//! Authentication and authorization failures, and how they reach clients.

use std::fmt;

use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};

use crate::tenant::RoutingError;
use crate::types::{Issuer, Role, TenantKey};

/// Authentication errors.
///
/// The strings carried by `MalformedCredential` and `InvalidCredential` are
/// for logs only; clients receive a fixed description.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No bearer credential on the request.
    MissingCredential,
    /// The credential cannot be parsed or lacks required claims.
    MalformedCredential(String),
    /// No tenant is registered for the credential's issuer.
    UnknownIssuer(Issuer),
    /// Signature, expiry or issuer check failed.
    InvalidCredential(String),
    /// The tenant directory could not be consulted.
    DirectoryUnavailable(String),
    /// The tenant's partition failed to migrate at startup.
    TenantUnavailable(TenantKey),
    /// The tenant's partition could not be opened.
    PartitionUnavailable(String),
    /// The caller lacks a required role.
    InsufficientRole(Role),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "Authentication required"),
            Self::MalformedCredential(msg) => write!(f, "Malformed credential: {}", msg),
            Self::UnknownIssuer(issuer) => write!(f, "Unknown tenant: {}", issuer),
            Self::InvalidCredential(msg) => write!(f, "Invalid credential: {}", msg),
            Self::DirectoryUnavailable(msg) => write!(f, "Tenant directory unavailable: {}", msg),
            Self::TenantUnavailable(key) => write!(f, "Tenant unavailable: {}", key),
            Self::PartitionUnavailable(msg) => write!(f, "Partition unavailable: {}", msg),
            Self::InsufficientRole(role) => write!(f, "Missing role: {}", role),
        }
    }
}

impl std::error::Error for AuthError {}

/// A partition that cannot be resolved for an authenticated request is an
/// authentication failure, not a storage one.
impl From<RoutingError> for AuthError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::TenantNotFound(key) => {
                Self::InvalidCredential(format!("tenant {} is no longer registered", key))
            }
            RoutingError::Directory(e) => Self::DirectoryUnavailable(e.to_string()),
            RoutingError::Connection(msg) => Self::PartitionUnavailable(msg),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredential
            | Self::MalformedCredential(_)
            | Self::UnknownIssuer(_)
            | Self::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientRole(_) => StatusCode::FORBIDDEN,
            Self::DirectoryUnavailable(_)
            | Self::TenantUnavailable(_)
            | Self::PartitionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Value of the `WWW-Authenticate` header for 401 responses.
    pub fn challenge(&self) -> Option<String> {
        let description = match self {
            Self::MissingCredential => return Some("Bearer".to_string()),
            Self::MalformedCredential(_) => "Malformed credential".to_string(),
            Self::UnknownIssuer(issuer) => format!("Unknown tenant: {}", issuer),
            Self::InvalidCredential(_) => "Invalid credential".to_string(),
            _ => return None,
        };
        Some(format!(
            "Bearer error=\"invalid_token\", error_description=\"{}\"",
            quote_safe(&description)
        ))
    }
}

/// Make attacker-supplied text safe inside a quoted header parameter.
fn quote_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' | '\\' => '\'',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '?',
        })
        .collect()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        if let Some(challenge) = self.challenge()
            && let Ok(value) = HeaderValue::from_str(&challenge)
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AuthError::MissingCredential.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::UnknownIssuer(Issuer::new("https://x")).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InsufficientRole(Role::new("write:asset")).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::DirectoryUnavailable("down".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AuthError::TenantUnavailable(TenantKey::new("balam")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_unknown_issuer_challenge() {
        let err = AuthError::UnknownIssuer(Issuer::new("https://idp.example.org/unknown-tenant"));
        let challenge = err.challenge().unwrap();
        assert!(challenge.starts_with("Bearer error=\"invalid_token\""));
        assert!(challenge.contains("Unknown tenant: https://idp.example.org/unknown-tenant"));
    }

    #[test]
    fn test_details_are_not_disclosed() {
        let err = AuthError::InvalidCredential("InvalidSignature with kid abc".to_string());
        let challenge = err.challenge().unwrap();
        assert!(!challenge.contains("kid"));
        assert!(challenge.contains("Invalid credential"));

        assert!(AuthError::InsufficientRole(Role::new("read:asset"))
            .challenge()
            .is_none());
    }

    #[test]
    fn test_hostile_issuer_is_sanitized() {
        let err = AuthError::UnknownIssuer(Issuer::new("https://evil\"\r\nSet-Cookie: x=1"));
        let challenge = err.challenge().unwrap();
        assert!(HeaderValue::from_str(&challenge).is_ok());
        assert!(!challenge.contains('\r'));
        assert_eq!(challenge.matches('"').count(), 4);
    }

    #[test]
    fn test_routing_faults_map_to_auth_errors() {
        let gone = AuthError::from(RoutingError::TenantNotFound(TenantKey::new("arquebus")));
        assert_eq!(gone.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            gone.challenge().as_deref(),
            Some("Bearer error=\"invalid_token\", error_description=\"Invalid credential\"")
        );

        let down = AuthError::from(RoutingError::Directory(
            crate::tenant::DirectoryError::Unavailable("timeout".to_string()),
        ));
        assert!(matches!(down, AuthError::DirectoryUnavailable(_)));
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);

        let closed = AuthError::from(RoutingError::Connection("refused".to_string()));
        assert_eq!(closed.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(closed.challenge().is_none());
    }

    #[test]
    fn test_response_has_empty_body_and_header() {
        let response =
            AuthError::UnknownIssuer(Issuer::new("https://idp.example.org/x")).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
