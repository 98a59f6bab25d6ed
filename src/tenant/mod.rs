//! Tenants: the directory, the per-request context and partition routing.

mod context;
mod directory;
mod router;

pub use context::TenantContext;
pub use directory::{
    DirectoryError, MAX_DISPLAY_NAME_LEN, MAX_TENANT_KEY_LEN, NewTenant, Tenant, TenantDirectory,
    TenantLookup,
};
pub use router::{PartitionRouter, RoutingError};
