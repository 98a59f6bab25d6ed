//! Maps the tenant context of a unit of work to the partition it may touch.

use std::fmt;

use tracing::{debug, warn};

use crate::db::{Db, PartitionPool};
use crate::tenant::context::TenantContext;
use crate::tenant::directory::{DirectoryError, TenantDirectory, TenantLookup};
use crate::types::{PartitionName, TenantKey};

/// Why a partition could not be chosen or opened.
#[derive(Debug, Clone)]
pub enum RoutingError {
    /// The bound tenant no longer exists in the directory.
    TenantNotFound(TenantKey),
    /// The directory could not be consulted.
    Directory(DirectoryError),
    /// The partition could not be opened.
    Connection(String),
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TenantNotFound(key) => write!(f, "Tenant not found: {}", key),
            Self::Directory(e) => write!(f, "{}", e),
            Self::Connection(msg) => write!(f, "Cannot open partition: {}", msg),
        }
    }
}

impl std::error::Error for RoutingError {}

impl From<DirectoryError> for RoutingError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

/// Chooses a partition per unit of work.
///
/// An empty context always maps to the default partition. A bound context
/// maps to its tenant's partition, or fails; it never falls back to the
/// default partition.
#[derive(Clone)]
pub struct PartitionRouter {
    directory: TenantDirectory,
    pool: PartitionPool,
}

impl PartitionRouter {
    pub fn new(directory: TenantDirectory, pool: PartitionPool) -> Self {
        Self { directory, pool }
    }

    /// Partition for the given context.
    pub async fn current_partition(
        &self,
        ctx: &TenantContext,
    ) -> Result<PartitionName, RoutingError> {
        let Some(key) = ctx.current() else {
            return Ok(PartitionName::default_partition());
        };

        match self.directory.lookup_by_key(key).await? {
            TenantLookup::Found(tenant) => Ok(tenant.partition_name),
            TenantLookup::NotFound => {
                warn!("Bound tenant {} is missing from the directory", key);
                Err(RoutingError::TenantNotFound(key.clone()))
            }
        }
    }

    /// Resolve the partition once and return a handle scoped to it.
    ///
    /// Storage operations call this at their start and use the handle for
    /// every statement they run.
    pub async fn partition_db(&self, ctx: &TenantContext) -> Result<Db, RoutingError> {
        let partition = self.current_partition(ctx).await?;
        debug!("Routing to partition {}", partition);
        self.pool
            .get(&partition)
            .await
            .map_err(|e| RoutingError::Connection(e.to_string()))
    }
}
