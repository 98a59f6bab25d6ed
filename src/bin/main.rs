use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use multitenant_service::db::{DEFAULT_CHANGESET, TENANT_CHANGESET};
use multitenant_service::tenant::NewTenant;
use multitenant_service::{
    PartitionPool, SchemaMigrator, ServiceConfig, TenantDirectory, bootstrap,
};

#[derive(Parser)]
#[command(name = "multitenant-service")]
#[command(about = "Multi-tenant asset service with per-tenant partitions")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON config file (defaults to $MULTITENANT_CONFIG or ./multitenant.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database URL, overriding the config file
    #[arg(long, global = true, env = "SURREALDB_URL")]
    db_url: Option<String>,
    /// Apply pending migrations older than the newest applied one
    #[arg(long, global = true, env = "MULTITENANT_OUT_OF_ORDER")]
    out_of_order: bool,
    /// Record the changeset as applied on partitions that have tables but no history
    #[arg(long, global = true, env = "MULTITENANT_BASELINE_ON_MIGRATE")]
    baseline_on_migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate all partitions and serve the public and admin APIs
    Serve {
        /// Bind address for the tenant-facing API
        #[arg(long, env = "MULTITENANT_PUBLIC_BIND")]
        public_bind: Option<String>,
        /// Bind address for the admin API (internal / trusted only)
        #[arg(long, env = "MULTITENANT_ADMIN_BIND")]
        admin_bind: Option<String>,
        /// Start even if some tenant partitions fail to migrate
        #[arg(long, env = "MULTITENANT_ALLOW_DEGRADED")]
        allow_degraded: bool,
        /// Seconds a resolved issuer-to-tenant mapping is reused
        #[arg(long, env = "MULTITENANT_VERIFIER_TTL")]
        verifier_ttl: Option<u64>,
        /// Expected audience of tenant credentials
        #[arg(long, env = "MULTITENANT_AUDIENCE")]
        audience: Option<String>,
    },
    /// Migrate the default partition and every tenant partition, then exit
    Migrate,
    /// Register a tenant and migrate its partition
    CreateTenant {
        #[arg(long)]
        key: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        partition: String,
        /// Identity-provider base URL, exactly as it appears in the `iss` claim
        #[arg(long)]
        issuer: String,
    },
    /// List registered tenants
    ListTenants,
}

fn load_config(common: &CommonArgs) -> Result<ServiceConfig> {
    let mut config = match &common.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::load()?,
    };
    if let Some(url) = &common.db_url {
        config.database.url = url.clone();
    }
    config.migration.out_of_order |= common.out_of_order;
    config.migration.baseline_on_migrate |= common.baseline_on_migrate;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("multitenant_service=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.common)?;
    info!("Using database url: {}", config.database.url);

    match cli.command {
        Commands::Serve {
            public_bind,
            admin_bind,
            allow_degraded,
            verifier_ttl,
            audience,
        } => {
            if let Some(bind) = public_bind {
                config.public_bind = bind;
            }
            if let Some(bind) = admin_bind {
                config.admin_bind = bind;
            }
            if let Some(ttl) = verifier_ttl {
                config.auth.verifier_ttl_seconds = ttl;
            }
            if audience.is_some() {
                config.auth.audience = audience;
            }
            config.migration.allow_degraded |= allow_degraded;

            let app = bootstrap(&config).await?;

            let public_listener = tokio::net::TcpListener::bind(&config.public_bind).await?;
            let admin_listener = tokio::net::TcpListener::bind(&config.admin_bind).await?;

            info!("Public server listening on http://{}", config.public_bind);
            info!("Admin server listening on http://{}", config.admin_bind);

            tokio::try_join!(
                axum::serve(public_listener, app.public_router()),
                axum::serve(admin_listener, app.admin_router()),
            )?;
        }
        Commands::Migrate => {
            let pool = PartitionPool::connect(config.database.clone()).await?;
            let migrator = SchemaMigrator::new(pool.clone(), config.migration.migrator_options());

            let default = migrator.migrate_default(&DEFAULT_CHANGESET).await?;
            println!("default: applied {:?}", default.applied);

            let directory = TenantDirectory::new(pool);
            let report = migrator
                .migrate_all_tenants(&directory, &TENANT_CHANGESET)
                .await?;

            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(done) if done.baselined => {
                        println!("{} ({}): baselined", outcome.tenant, outcome.partition)
                    }
                    Ok(done) => println!(
                        "{} ({}): applied {:?}",
                        outcome.tenant, outcome.partition, done.applied
                    ),
                    Err(e) => println!("{} ({}): FAILED: {}", outcome.tenant, outcome.partition, e),
                }
            }

            if !report.is_success() {
                error!("{} tenant(s) failed to migrate", report.failed_tenants().len());
                anyhow::bail!("Migration incomplete");
            }
        }
        Commands::CreateTenant {
            key,
            display_name,
            partition,
            issuer,
        } => {
            let pool = PartitionPool::connect(config.database.clone()).await?;
            let migrator = SchemaMigrator::new(pool.clone(), config.migration.migrator_options());
            migrator.migrate_default(&DEFAULT_CHANGESET).await?;

            let directory = TenantDirectory::new(pool);
            let tenant = directory
                .create_tenant(&NewTenant {
                    key,
                    display_name,
                    partition_name: partition,
                    issuer,
                })
                .await?;
            migrator
                .migrate_partition(&tenant.partition_name, &TENANT_CHANGESET)
                .await?;

            println!("Tenant created successfully!");
            println!();
            println!("  Key:        {}", tenant.key);
            println!("  Name:       {}", tenant.display_name);
            println!("  Partition:  {}", tenant.partition_name);
            println!("  Issuer:     {}", tenant.issuer);
            println!("  Key set:    {}", tenant.trust_root_url());
        }
        Commands::ListTenants => {
            let pool = PartitionPool::connect(config.database.clone()).await?;
            let directory = TenantDirectory::new(pool);
            let tenants = directory.list_all().await?;

            if tenants.is_empty() {
                println!("No tenants found.");
                return Ok(());
            }

            println!(
                "{:<20} {:<30} {:<20} {:<40}",
                "KEY", "NAME", "PARTITION", "ISSUER"
            );
            println!("{}", "-".repeat(110));

            for tenant in tenants {
                println!(
                    "{:<20} {:<30} {:<20} {:<40}",
                    tenant.key.as_str(),
                    tenant.display_name,
                    tenant.partition_name.as_str(),
                    tenant.issuer.as_str()
                );
            }
        }
    }

    Ok(())
}
