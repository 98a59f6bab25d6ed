//! Persisted record types and the ordered schema changesets.
//!
//! There are two changesets: one applied to the default partition (tenant
//! directory), one applied to every tenant partition (tenant data). Versions
//! within a changeset are strictly increasing and never renumbered.

use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

/// A single, versioned schema change.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Monotonic version number within its changeset.
    pub version: u32,
    /// Short human-readable name recorded in the history table.
    pub name: &'static str,
    /// SurrealQL statements to execute.
    pub statements: &'static str,
}

/// An ordered list of migrations for one kind of partition.
#[derive(Debug, Clone, Copy)]
pub struct Changeset {
    /// Label used in logs ("default" or "tenant").
    pub label: &'static str,
    pub migrations: &'static [Migration],
}

/// Changeset applied once to the default partition.
pub const DEFAULT_CHANGESET: Changeset = Changeset {
    label: "default",
    migrations: &[Migration {
        version: 1,
        name: "create_tenant_directory",
        statements: "
            DEFINE TABLE tenant SCHEMAFULL;
            DEFINE FIELD key ON TABLE tenant TYPE string;
            DEFINE FIELD display_name ON TABLE tenant TYPE string;
            DEFINE FIELD partition_name ON TABLE tenant TYPE string;
            DEFINE FIELD issuer ON TABLE tenant TYPE string;
            DEFINE FIELD created_at ON TABLE tenant TYPE datetime DEFAULT time::now();
            DEFINE INDEX tenant_key ON TABLE tenant COLUMNS key UNIQUE;
            DEFINE INDEX tenant_display_name ON TABLE tenant COLUMNS display_name UNIQUE;
            DEFINE INDEX tenant_partition_name ON TABLE tenant COLUMNS partition_name UNIQUE;
            DEFINE INDEX tenant_issuer ON TABLE tenant COLUMNS issuer UNIQUE;",
    }],
};

/// Changeset applied once to every tenant partition.
pub const TENANT_CHANGESET: Changeset = Changeset {
    label: "tenant",
    migrations: &[
        Migration {
            version: 1,
            name: "create_asset",
            statements: "
                DEFINE TABLE asset SCHEMAFULL;
                DEFINE FIELD uuid ON TABLE asset TYPE string;
                DEFINE FIELD name ON TABLE asset TYPE string;
                DEFINE FIELD created_timestamp ON TABLE asset TYPE string;
                DEFINE FIELD server_url ON TABLE asset TYPE option<null | string>;
                DEFINE INDEX asset_uuid ON TABLE asset COLUMNS uuid UNIQUE;",
        },
        Migration {
            version: 2,
            name: "unique_asset_name",
            statements: "DEFINE INDEX asset_name ON TABLE asset COLUMNS name UNIQUE;",
        },
    ],
};

/// History table tracking applied migrations, one per partition.
pub const MIGRATION_HISTORY_DDL: &str = "
    DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
    DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
    DEFINE FIELD IF NOT EXISTS checksum ON TABLE _migration TYPE string;
    DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime DEFAULT time::now();
    DEFINE INDEX IF NOT EXISTS migration_version ON TABLE _migration COLUMNS version UNIQUE;";

/// Persisted representation of a tenant in the default partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Database identifier (table: `tenant`).
    pub id: RecordId,
    /// Stable tenant key.
    pub key: String,
    /// Unique human-readable name.
    pub display_name: String,
    /// Partition holding this tenant's data.
    pub partition_name: String,
    /// Identity-provider base URL.
    pub issuer: String,
}

/// Payload used when inserting a new tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCreate {
    pub key: String,
    pub display_name: String,
    pub partition_name: String,
    pub issuer: String,
}

/// Persisted representation of an asset inside a tenant partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Database identifier (table: `asset`).
    pub id: RecordId,
    /// Public UUID of the asset.
    pub uuid: String,
    pub name: String,
    /// RFC 3339 UTC timestamp with millisecond precision, so lexical order
    /// matches chronological order.
    pub created_timestamp: String,
    pub server_url: Option<String>,
}

/// Row of the `_migration` history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: u32,
    pub name: String,
    pub checksum: String,
}
