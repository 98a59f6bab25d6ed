use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::PartitionName;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE")
                .unwrap_or_else(|_| "multitenant".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

impl DatabaseConfig {
    /// Config for an isolated in-memory engine.
    pub fn in_memory() -> Self {
        Self {
            url: "memory".to_string(),
            namespace: "multitenant".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Open a connection whose session is pinned to one partition.
pub async fn create_connection(config: &DatabaseConfig, partition: &PartitionName) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url.as_str()).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        db.signin(Root {
            username: username.as_str(),
            password: password.as_str(),
        })
        .await?;
    }

    db.use_ns(config.namespace.as_str())
        .use_db(partition.as_str())
        .await?;

    Ok(db)
}

/// Whether a write failed because it collided with a unique index or an
/// existing record id.
pub fn is_unique_violation(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already contains") || msg.contains("already exists")
}

/// One connection per partition, opened lazily and reused for the life of
/// the process.
///
/// A SurrealDB session carries a single selected database, so partitions
/// never share a handle. Every caller asking for partition `x` gets the
/// same handle.
///
/// With the `memory` URL each connection opens its own engine. Partitions
/// are then separate datastores as well as separate databases, and only a
/// networked URL shares one engine between them.
#[derive(Clone)]
pub struct PartitionPool {
    config: DatabaseConfig,
    connections: Arc<RwLock<HashMap<PartitionName, Db>>>,
}

impl PartitionPool {
    /// Create the pool and eagerly connect the default partition.
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let pool = Self {
            config,
            connections: Arc::new(RwLock::new(HashMap::new())),
        };
        pool.get(&PartitionName::default_partition()).await?;
        info!(
            "Connected default partition at {} (namespace {})",
            pool.config.url, pool.config.namespace
        );
        Ok(pool)
    }

    /// The database configuration this pool connects with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Handle for the default partition.
    pub async fn default_partition(&self) -> Result<Db> {
        self.get(&PartitionName::default_partition()).await
    }

    /// Handle for the given partition, connecting on first use.
    pub async fn get(&self, partition: &PartitionName) -> Result<Db> {
        if let Some(db) = self.connections.read().await.get(partition) {
            return Ok(db.clone());
        }

        // Connect outside the lock so other partitions stay readable.
        let db = create_connection(&self.config, partition).await?;

        let mut connections = self.connections.write().await;
        let db = connections
            .entry(partition.clone())
            .or_insert_with(|| {
                debug!("Opened connection for partition {}", partition);
                db
            })
            .clone();
        Ok(db)
    }

    /// Number of partitions with an open connection.
    pub async fn connected_partitions(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_reuses_partition_handle() {
        let pool = PartitionPool::connect(DatabaseConfig::in_memory()).await.unwrap();
        let partition = PartitionName::new("arquebus");

        let first = pool.get(&partition).await.unwrap();
        first
            .query("CREATE marker:one SET n = 1")
            .await
            .unwrap()
            .check()
            .unwrap();

        let second = pool.get(&partition).await.unwrap();
        let mut res = second.query("SELECT n FROM marker").await.unwrap();
        let values: Vec<serde_json::Value> = res.take(0).unwrap();
        assert_eq!(values.len(), 1);

        assert_eq!(pool.connected_partitions().await, 2);
    }

    #[tokio::test]
    async fn test_partitions_do_not_share_data() {
        let pool = PartitionPool::connect(DatabaseConfig::in_memory()).await.unwrap();

        let arquebus = pool.get(&PartitionName::new("arquebus")).await.unwrap();
        arquebus
            .query("CREATE marker:one SET n = 1")
            .await
            .unwrap()
            .check()
            .unwrap();

        let balam = pool.get(&PartitionName::new("balam")).await.unwrap();
        let mut res = balam.query("SELECT n FROM marker").await.unwrap();
        let values: Vec<serde_json::Value> = res.take(0).unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_unique_violations_are_recognized() {
        let pool = PartitionPool::connect(DatabaseConfig::in_memory()).await.unwrap();
        let db = pool.default_partition().await.unwrap();
        db.query("DEFINE INDEX marker_n ON TABLE marker COLUMNS n UNIQUE; CREATE marker:one SET n = 1;")
            .await
            .unwrap()
            .check()
            .unwrap();

        let by_index = db
            .query("CREATE marker:two SET n = 1")
            .await
            .unwrap()
            .check()
            .unwrap_err();
        assert!(is_unique_violation(&by_index), "{}", by_index);

        let by_id = db
            .query("CREATE marker:one SET n = 2")
            .await
            .unwrap()
            .check()
            .unwrap_err();
        assert!(is_unique_violation(&by_id), "{}", by_id);

        let other = match db.query("SELEC n FROM marker").await {
            Ok(res) => res.check().unwrap_err(),
            Err(e) => e,
        };
        assert!(!is_unique_violation(&other), "{}", other);
    }

    #[tokio::test]
    async fn test_handle_session_selects_its_partition() {
        let mut config = DatabaseConfig::in_memory();
        config.namespace = "deployment".to_string();
        let pool = PartitionPool::connect(config).await.unwrap();

        for name in ["public", "arquebus", "balam"] {
            let db = pool.get(&PartitionName::new(name)).await.unwrap();
            let mut res = db
                .query("RETURN session::ns(); RETURN session::db();")
                .await
                .unwrap();
            let ns: Option<String> = res.take(0).unwrap();
            let selected: Option<String> = res.take(1).unwrap();
            assert_eq!(ns.as_deref(), Some("deployment"));
            assert_eq!(selected.as_deref(), Some(name));
        }
    }

    #[tokio::test]
    async fn test_databases_are_isolated_on_one_engine() {
        let db = create_connection(&DatabaseConfig::in_memory(), &PartitionName::new("arquebus"))
            .await
            .unwrap();
        db.query("CREATE marker:one SET n = 1")
            .await
            .unwrap()
            .check()
            .unwrap();

        db.use_db("balam").await.unwrap();
        let mut res = db.query("SELECT n FROM marker").await.unwrap();
        let values: Vec<serde_json::Value> = res.take(0).unwrap();
        assert!(values.is_empty());

        db.use_db("arquebus").await.unwrap();
        let mut res = db.query("SELECT n FROM marker").await.unwrap();
        let values: Vec<serde_json::Value> = res.take(0).unwrap();
        assert_eq!(values.len(), 1);
    }
}
