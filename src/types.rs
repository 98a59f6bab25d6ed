//! NewType wrappers for strong typing throughout the service.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing an issuer URL where a partition name is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the partition that holds the tenant directory and migration
/// history for the service itself.
pub const DEFAULT_PARTITION: &str = "public";

/// Maximum length of a partition name accepted by the storage engine.
pub const MAX_PARTITION_NAME_LEN: usize = 63;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Stable identifier of a tenant (e.g., "arquebus").
    ///
    /// Immutable once the tenant is created. This is the value carried by
    /// a bound `TenantContext`.
    TenantKey
);

newtype_string!(
    /// Name of a storage partition (a SurrealDB database in the configured
    /// namespace).
    ///
    /// Every tenant owns exactly one partition; the default partition holds
    /// the tenant directory.
    PartitionName
);

newtype_string!(
    /// Base URL of a tenant's identity provider, as it appears in the `iss`
    /// claim of the credentials it signs.
    Issuer
);

newtype_string!(
    /// Subject of a validated credential (the `sub` claim).
    Subject
);

newtype_string!(
    /// A role granted by the identity provider (e.g., "read:asset").
    Role
);

impl PartitionName {
    /// The well-known default partition.
    pub fn default_partition() -> Self {
        Self::new(DEFAULT_PARTITION)
    }

    /// Whether this is the default partition.
    pub fn is_default(&self) -> bool {
        self.0.eq_ignore_ascii_case(DEFAULT_PARTITION)
    }

    /// Check that this name can be used as a tenant partition.
    ///
    /// Accepts 1..=63 characters: an ASCII letter followed by ASCII
    /// alphanumerics or underscores. The default partition name is rejected.
    pub fn validate_for_tenant(&self) -> Result<(), String> {
        let name = self.as_str();
        if name.is_empty() || name.len() > MAX_PARTITION_NAME_LEN {
            return Err(format!(
                "partition name must be between 1 and {} characters",
                MAX_PARTITION_NAME_LEN
            ));
        }

        let mut chars = name.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err("partition name must start with an ASCII letter".to_string());
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(
                "partition name may only contain ASCII letters, digits and underscores".to_string(),
            );
        }

        if self.is_default() {
            return Err(format!(
                "partition name must not collide with the default partition '{}'",
                DEFAULT_PARTITION
            ));
        }

        Ok(())
    }
}

impl Issuer {
    /// Well-known path of the key set published by an issuer.
    pub const KEY_SET_PATH: &'static str = "/protocol/openid-connect/certs";

    /// URL of the key set used to verify this issuer's credentials.
    pub fn trust_root_url(&self) -> String {
        format!("{}{}", self.0.trim_end_matches('/'), Self::KEY_SET_PATH)
    }
}
