//! Versioned schema migrations for the default partition and every tenant
//! partition.
//!
//! Each partition keeps its own `_migration` history table. Applying a
//! changeset is idempotent: versions already recorded are skipped, and a
//! recorded version whose checksum no longer matches the changeset aborts
//! the run for that partition.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::db::schema::{Changeset, MIGRATION_HISTORY_DDL, Migration, MigrationRecord};
use crate::db::{Db, PartitionPool};
use crate::tenant::{DirectoryError, TenantDirectory};
use crate::types::{PartitionName, TenantKey};

const HISTORY_TABLE: &str = "_migration";

/// Behaviour switches for the migrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigratorOptions {
    /// Apply pending versions that are lower than the highest applied one
    /// instead of failing.
    pub out_of_order: bool,
    /// When a partition already holds tables but has no history, record the
    /// whole changeset as applied without executing it.
    pub baseline_on_migrate: bool,
}

/// Why a partition could not be migrated.
#[derive(Debug, Clone)]
pub enum MigrationError {
    /// The partition could not be opened.
    Connection(String),
    /// The history table could not be created or read.
    History(String),
    /// A recorded migration differs from the one in the changeset.
    ChecksumMismatch {
        version: u32,
        recorded: String,
        expected: String,
    },
    /// A pending version is older than the latest applied one.
    OutOfOrder { version: u32, latest: u32 },
    /// The partition has tables but no history, and baselining is off.
    NotBaselined,
    /// A migration's statements failed; nothing of that version was kept.
    Apply {
        version: u32,
        name: String,
        message: String,
    },
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "Cannot open partition: {}", msg),
            Self::History(msg) => write!(f, "Migration history unavailable: {}", msg),
            Self::ChecksumMismatch {
                version,
                recorded,
                expected,
            } => write!(
                f,
                "Checksum mismatch for version {}: recorded {}, expected {}",
                version, recorded, expected
            ),
            Self::OutOfOrder { version, latest } => write!(
                f,
                "Pending version {} is older than applied version {}",
                version, latest
            ),
            Self::NotBaselined => write!(
                f,
                "Partition has existing tables but no migration history"
            ),
            Self::Apply {
                version,
                name,
                message,
            } => write!(f, "Migration {} ({}) failed: {}", version, name, message),
        }
    }
}

impl std::error::Error for MigrationError {}

/// What happened to one partition during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMigration {
    /// Versions executed during this run, ascending.
    pub applied: Vec<u32>,
    /// Whether the changeset was recorded without being executed.
    pub baselined: bool,
}

impl PartitionMigration {
    /// True when the partition was already up to date.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && !self.baselined
    }
}

/// Outcome for a single tenant.
#[derive(Debug, Clone)]
pub struct TenantMigrationOutcome {
    pub tenant: TenantKey,
    pub partition: PartitionName,
    pub result: Result<PartitionMigration, MigrationError>,
}

/// Per-tenant results of migrating every tenant partition.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub outcomes: Vec<TenantMigrationOutcome>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Tenants whose partition failed to migrate.
    pub fn failed_tenants(&self) -> Vec<&TenantKey> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| &o.tenant)
            .collect()
    }

    /// Total number of versions executed across all tenants.
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|m| m.applied.len())
            .sum()
    }
}

/// SHA-256 of a migration's statements, hex encoded.
pub fn checksum(migration: &Migration) -> String {
    let digest = Sha256::digest(migration.statements.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Applies changesets to partitions.
#[derive(Clone)]
pub struct SchemaMigrator {
    pool: PartitionPool,
    options: MigratorOptions,
}

impl SchemaMigrator {
    pub fn new(pool: PartitionPool, options: MigratorOptions) -> Self {
        Self { pool, options }
    }

    pub fn options(&self) -> MigratorOptions {
        self.options
    }

    /// Migrate the default partition. Callers treat failure as fatal.
    pub async fn migrate_default(
        &self,
        changeset: &Changeset,
    ) -> Result<PartitionMigration, MigrationError> {
        self.migrate_partition(&PartitionName::default_partition(), changeset)
            .await
    }

    /// Migrate every tenant listed in the directory.
    ///
    /// Every tenant is attempted even when an earlier one fails. Only a
    /// failure to list the tenants aborts the run.
    pub async fn migrate_all_tenants(
        &self,
        directory: &TenantDirectory,
        changeset: &Changeset,
    ) -> Result<MigrationReport, DirectoryError> {
        let tenants = directory.list_all().await?;
        let mut report = MigrationReport::default();

        for tenant in tenants {
            let result = self
                .migrate_partition(&tenant.partition_name, changeset)
                .await;
            match &result {
                Ok(outcome) if outcome.is_noop() => {
                    debug!("Tenant {} is up to date", tenant.key)
                }
                Ok(outcome) => info!(
                    "Migrated tenant {} (partition {}): applied {:?}, baselined {}",
                    tenant.key, tenant.partition_name, outcome.applied, outcome.baselined
                ),
                Err(e) => error!(
                    "Migration failed for tenant {} (partition {}): {}",
                    tenant.key, tenant.partition_name, e
                ),
            }
            report.outcomes.push(TenantMigrationOutcome {
                tenant: tenant.key,
                partition: tenant.partition_name,
                result,
            });
        }

        Ok(report)
    }

    /// Bring one partition up to date with `changeset`.
    pub async fn migrate_partition(
        &self,
        partition: &PartitionName,
        changeset: &Changeset,
    ) -> Result<PartitionMigration, MigrationError> {
        let db = self
            .pool
            .get(partition)
            .await
            .map_err(|e| MigrationError::Connection(e.to_string()))?;

        ensure_history(&db).await?;
        let had_tables = has_user_tables(&db).await?;
        let history = load_history(&db).await?;

        for record in &history {
            if let Some(migration) = changeset
                .migrations
                .iter()
                .find(|m| m.version == record.version)
            {
                let expected = checksum(migration);
                if record.checksum != expected {
                    return Err(MigrationError::ChecksumMismatch {
                        version: record.version,
                        recorded: record.checksum.clone(),
                        expected,
                    });
                }
            }
        }

        if history.is_empty() && had_tables {
            if !self.options.baseline_on_migrate {
                return Err(MigrationError::NotBaselined);
            }
            for migration in changeset.migrations {
                record_migration(&db, migration).await?;
            }
            warn!(
                "Baselined {} changeset on partition {} at version {}",
                changeset.label,
                partition,
                changeset.migrations.last().map(|m| m.version).unwrap_or(0)
            );
            return Ok(PartitionMigration {
                applied: Vec::new(),
                baselined: true,
            });
        }

        let latest = history.iter().map(|r| r.version).max().unwrap_or(0);
        let pending: Vec<&Migration> = changeset
            .migrations
            .iter()
            .filter(|m| !history.iter().any(|r| r.version == m.version))
            .collect();

        if !self.options.out_of_order
            && let Some(stale) = pending.iter().find(|m| m.version < latest)
        {
            return Err(MigrationError::OutOfOrder {
                version: stale.version,
                latest,
            });
        }

        let mut outcome = PartitionMigration::default();
        for migration in pending {
            apply_migration(&db, migration).await?;
            debug!(
                "Applied {} migration {} ({}) to partition {}",
                changeset.label, migration.version, migration.name, partition
            );
            outcome.applied.push(migration.version);
        }

        Ok(outcome)
    }
}

async fn has_user_tables(db: &Db) -> Result<bool, MigrationError> {
    let mut res = db
        .query("INFO FOR DB")
        .await
        .map_err(|e| MigrationError::History(e.to_string()))?;
    let info: Option<serde_json::Value> = res
        .take(0)
        .map_err(|e| MigrationError::History(e.to_string()))?;

    Ok(info
        .as_ref()
        .and_then(|v| v.get("tables"))
        .and_then(|t| t.as_object())
        .is_some_and(|tables| tables.keys().any(|name| name != HISTORY_TABLE)))
}

async fn ensure_history(db: &Db) -> Result<(), MigrationError> {
    db.query(MIGRATION_HISTORY_DDL)
        .await
        .and_then(|res| res.check())
        .map_err(|e| MigrationError::History(e.to_string()))?;
    Ok(())
}

async fn load_history(db: &Db) -> Result<Vec<MigrationRecord>, MigrationError> {
    let mut res = db
        .query("SELECT version, name, checksum FROM _migration ORDER BY version ASC")
        .await
        .map_err(|e| MigrationError::History(e.to_string()))?;
    res.take(0)
        .map_err(|e| MigrationError::History(e.to_string()))
}

async fn record_migration(db: &Db, migration: &Migration) -> Result<(), MigrationError> {
    db.query("CREATE _migration CONTENT { version: $version, name: $name, checksum: $checksum }")
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .bind(("checksum", checksum(migration)))
        .await
        .and_then(|res| res.check())
        .map_err(|e| MigrationError::History(e.to_string()))?;
    Ok(())
}

/// Run a migration and its history row in one transaction.
async fn apply_migration(db: &Db, migration: &Migration) -> Result<(), MigrationError> {
    let script = format!(
        "BEGIN TRANSACTION;\n{}\nCREATE _migration CONTENT {{ version: $version, name: $name, checksum: $checksum }};\nCOMMIT TRANSACTION;",
        migration.statements
    );

    db.query(script)
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .bind(("checksum", checksum(migration)))
        .await
        .and_then(|res| res.check())
        .map_err(|e| MigrationError::Apply {
            version: migration.version,
            name: migration.name.to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}
