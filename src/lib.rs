// Core modules
pub mod api;
pub mod assets;
pub mod auth;
pub mod config;
pub mod db;
pub mod health;
pub mod tenant;
pub mod types;

// Re-export key types and functions
pub use config::ServiceConfig;
pub use db::{DatabaseConfig, PartitionPool, SchemaMigrator, create_connection};
pub use health::HealthState;
pub use tenant::{TenantContext, TenantDirectory};

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tracing::{info, warn};

use api::AppState;
use assets::AssetStore;
use auth::{CredentialValidator, HttpKeySetSource, IssuerResolver, KeySetSource};
use db::{DEFAULT_CHANGESET, MigrationReport, TENANT_CHANGESET};
use tenant::PartitionRouter;

/// A migrated, ready-to-serve service.
pub struct Application {
    pub state: AppState,
    /// Outcome of the startup tenant migration.
    pub report: MigrationReport,
}

impl Application {
    /// Migrate every partition and wire the request path.
    ///
    /// Failure to migrate the default partition is always fatal. A tenant
    /// partition failure is fatal unless `allow_degraded` is set, in which
    /// case that tenant is marked unavailable.
    pub async fn build(
        pool: PartitionPool,
        config: &ServiceConfig,
        key_source: Arc<dyn KeySetSource>,
    ) -> Result<Self> {
        let migrator = SchemaMigrator::new(pool.clone(), config.migration.migrator_options());
        migrator
            .migrate_default(&DEFAULT_CHANGESET)
            .await
            .map_err(|e| anyhow::anyhow!("Default partition migration failed: {}", e))?;

        let directory = TenantDirectory::new(pool.clone());
        let report = migrator
            .migrate_all_tenants(&directory, &TENANT_CHANGESET)
            .await?;

        if !report.is_success() {
            let failed = report
                .failed_tenants()
                .iter()
                .map(|key| key.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if !config.migration.allow_degraded {
                anyhow::bail!("Tenant partition migration failed for: {}", failed);
            }
            warn!("Starting degraded; unavailable tenants: {}", failed);
        }
        let health = HealthState::from_report(&report).await;

        let resolver = Arc::new(IssuerResolver::new(
            directory.clone(),
            key_source,
            config.auth.resolver_options(),
        ));
        let validator = Arc::new(CredentialValidator::new(
            resolver,
            config.auth.validator_options(),
        ));
        let assets = AssetStore::new(PartitionRouter::new(directory.clone(), pool));

        info!(
            "Service ready: {} tenants, {} migrations applied",
            report.outcomes.len(),
            report.applied_count()
        );

        Ok(Self {
            state: AppState {
                directory,
                assets,
                migrator,
                validator,
                health,
            },
            report,
        })
    }

    pub fn public_router(&self) -> Router {
        api::create_public_router(self.state.clone())
    }

    pub fn admin_router(&self) -> Router {
        api::create_admin_router(self.state.clone())
    }
}

/// Connect to the configured database and build the service, fetching
/// tenant key sets over HTTP.
pub async fn bootstrap(config: &ServiceConfig) -> Result<Application> {
    let pool = PartitionPool::connect(config.database.clone()).await?;
    let key_source = Arc::new(HttpKeySetSource::new()?);
    Application::build(pool, config, key_source).await
}
