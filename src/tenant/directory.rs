//! Tenant directory: the authoritative list of tenants, stored in the
//! default partition.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::schema::{TenantCreate, TenantRecord};
use crate::db::{Db, PartitionPool, is_unique_violation};
use crate::types::{Issuer, PartitionName, TenantKey};

/// Maximum length of a tenant key.
pub const MAX_TENANT_KEY_LEN: usize = 64;

/// Maximum length of a tenant display name.
pub const MAX_DISPLAY_NAME_LEN: usize = 100;

const TENANT_COLUMNS: &str = "id, key, display_name, partition_name, issuer";

/// A tenant as seen by the rest of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub key: TenantKey,
    pub display_name: String,
    pub partition_name: PartitionName,
    pub issuer: Issuer,
}

impl Tenant {
    /// URL of the key set that verifies this tenant's credentials.
    pub fn trust_root_url(&self) -> String {
        self.issuer.trust_root_url()
    }
}

impl From<TenantRecord> for Tenant {
    fn from(record: TenantRecord) -> Self {
        Self {
            key: TenantKey::new(record.key),
            display_name: record.display_name,
            partition_name: PartitionName::new(record.partition_name),
            issuer: Issuer::new(record.issuer),
        }
    }
}

/// Outcome of a directory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantLookup {
    Found(Tenant),
    NotFound,
}

impl TenantLookup {
    pub fn into_option(self) -> Option<Tenant> {
        match self {
            Self::Found(tenant) => Some(tenant),
            Self::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl From<Option<Tenant>> for TenantLookup {
    fn from(tenant: Option<Tenant>) -> Self {
        match tenant {
            Some(tenant) => Self::Found(tenant),
            None => Self::NotFound,
        }
    }
}

/// Errors raised by the tenant directory.
#[derive(Debug, Clone)]
pub enum DirectoryError {
    /// The default partition could not be reached or queried.
    Unavailable(String),
    /// A tenant with the same key, display name, partition or issuer exists.
    Conflict(String),
    /// The tenant definition is invalid.
    Invalid(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "Tenant directory unavailable: {}", msg),
            Self::Conflict(msg) => write!(f, "Tenant conflict: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid tenant: {}", msg),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl From<surrealdb::Error> for DirectoryError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Request to register a new tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTenant {
    pub key: String,
    pub display_name: String,
    pub partition_name: String,
    pub issuer: String,
}

impl NewTenant {
    /// Validate and normalize the definition into a storable record.
    ///
    /// The issuer keeps its exact spelling minus any trailing slash, because
    /// it is compared byte-for-byte against the `iss` claim.
    pub fn validate(&self) -> Result<TenantCreate, DirectoryError> {
        let key = self.key.trim();
        if key.is_empty() || key.len() > MAX_TENANT_KEY_LEN {
            return Err(DirectoryError::Invalid(format!(
                "key must be between 1 and {} characters",
                MAX_TENANT_KEY_LEN
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DirectoryError::Invalid(
                "key may only contain ASCII letters, digits, '-' and '_'".to_string(),
            ));
        }

        let display_name = self.display_name.trim();
        if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(DirectoryError::Invalid(format!(
                "display name must be between 1 and {} characters",
                MAX_DISPLAY_NAME_LEN
            )));
        }

        let partition = PartitionName::new(self.partition_name.trim());
        partition
            .validate_for_tenant()
            .map_err(DirectoryError::Invalid)?;

        let issuer = self.issuer.trim().trim_end_matches('/');
        let parsed = url::Url::parse(issuer)
            .map_err(|e| DirectoryError::Invalid(format!("issuer is not a valid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(DirectoryError::Invalid(
                "issuer must be an absolute http(s) URL".to_string(),
            ));
        }

        Ok(TenantCreate {
            key: key.to_string(),
            display_name: display_name.to_string(),
            partition_name: partition.into_inner(),
            issuer: issuer.to_string(),
        })
    }
}

/// Read/write access to the tenant directory.
///
/// Lookups are not cached here; the issuer resolver keeps its own
/// time-bounded cache of verifiers.
#[derive(Clone)]
pub struct TenantDirectory {
    pool: PartitionPool,
}

impl TenantDirectory {
    pub fn new(pool: PartitionPool) -> Self {
        Self { pool }
    }

    async fn db(&self) -> Result<Db, DirectoryError> {
        self.pool
            .default_partition()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))
    }

    /// Find a tenant by its key.
    pub async fn lookup_by_key(&self, key: &TenantKey) -> Result<TenantLookup, DirectoryError> {
        let db = self.db().await?;
        let mut res = db
            .query(format!(
                "SELECT {} FROM tenant WHERE key = $key LIMIT 1",
                TENANT_COLUMNS
            ))
            .bind(("key", key.as_str().to_string()))
            .await?;

        let records: Vec<TenantRecord> = res.take(0)?;
        Ok(records.into_iter().next().map(Tenant::from).into())
    }

    /// Find the tenant whose identity provider is `issuer`.
    ///
    /// Matching is exact; no normalization is applied to the input.
    pub async fn lookup_by_issuer(&self, issuer: &Issuer) -> Result<TenantLookup, DirectoryError> {
        let db = self.db().await?;
        let mut res = db
            .query(format!(
                "SELECT {} FROM tenant WHERE issuer = $issuer LIMIT 1",
                TENANT_COLUMNS
            ))
            .bind(("issuer", issuer.as_str().to_string()))
            .await?;

        let records: Vec<TenantRecord> = res.take(0)?;
        let lookup: TenantLookup = records.into_iter().next().map(Tenant::from).into();
        if !lookup.is_found() {
            debug!("No tenant registered for issuer {}", issuer);
        }
        Ok(lookup)
    }

    /// All registered tenants, ordered by key.
    pub async fn list_all(&self) -> Result<Vec<Tenant>, DirectoryError> {
        let db = self.db().await?;
        let mut res = db
            .query(format!(
                "SELECT {} FROM tenant ORDER BY key ASC",
                TENANT_COLUMNS
            ))
            .await?;

        let records: Vec<TenantRecord> = res.take(0)?;
        Ok(records.into_iter().map(Tenant::from).collect())
    }

    /// Register a new tenant.
    ///
    /// Does not touch the tenant's partition; callers migrate it afterwards.
    pub async fn create_tenant(&self, new_tenant: &NewTenant) -> Result<Tenant, DirectoryError> {
        let create = new_tenant.validate()?;
        let db = self.db().await?;

        let mut res = db
            .query(format!(
                r#"SELECT {} FROM tenant
                   WHERE key = $key
                      OR display_name = $display_name
                      OR partition_name = $partition_name
                      OR issuer = $issuer
                   LIMIT 1"#,
                TENANT_COLUMNS
            ))
            .bind(("key", create.key.clone()))
            .bind(("display_name", create.display_name.clone()))
            .bind(("partition_name", create.partition_name.clone()))
            .bind(("issuer", create.issuer.clone()))
            .await?;

        let existing: Vec<TenantRecord> = res.take(0)?;
        if let Some(existing) = existing.into_iter().next() {
            let field = if existing.key == create.key {
                "key"
            } else if existing.display_name == create.display_name {
                "display name"
            } else if existing.partition_name == create.partition_name {
                "partition name"
            } else {
                "issuer"
            };
            warn!(
                "Rejected tenant {}: {} already used by tenant {}",
                create.key, field, existing.key
            );
            return Err(DirectoryError::Conflict(format!(
                "{} already used by tenant '{}'",
                field, existing.key
            )));
        }

        let tenant = insert_tenant(&db, create).await?;

        info!(
            "Registered tenant {} (partition {}, issuer {})",
            tenant.key, tenant.partition_name, tenant.issuer
        );
        Ok(tenant)
    }
}

/// Insert a tenant row. The unique indexes on the tenant table still hold
/// when a concurrent insert slips past the duplicate check, and that
/// collision is reported as a conflict.
async fn insert_tenant(db: &Db, create: TenantCreate) -> Result<Tenant, DirectoryError> {
    let key = create.key.clone();
    let insert_failed = |err: surrealdb::Error| {
        if is_unique_violation(&err) {
            warn!("Concurrent registration collided with tenant {}: {}", key, err);
            DirectoryError::Conflict(format!(
                "tenant '{}' collides with an existing tenant",
                key
            ))
        } else {
            DirectoryError::from(err)
        }
    };

    let mut res = db
        .query(format!(
            "CREATE type::thing('tenant', $key) CONTENT $content RETURN {}",
            TENANT_COLUMNS
        ))
        .bind(("key", create.key.clone()))
        .bind(("content", create))
        .await
        .map_err(&insert_failed)?;

    let created: Option<TenantRecord> = res.take(0).map_err(&insert_failed)?;
    created.map(Tenant::from).ok_or_else(|| {
        DirectoryError::Unavailable("tenant insert returned no record".to_string())
    })
}
