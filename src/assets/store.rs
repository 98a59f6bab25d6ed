//! Partition-scoped asset storage.
//!
//! Every operation resolves its partition once, from the caller's tenant
//! context, and runs all of its statements on that partition's handle.

use std::fmt;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::assets::model::{Asset, AssetFields, Page, PageRequest, format_timestamp};
use crate::db::{Db, is_unique_violation};
use crate::db::schema::AssetRecord;
use crate::tenant::{PartitionRouter, RoutingError, TenantContext};

#[derive(Debug, Clone)]
pub enum AssetStoreError {
    /// No partition could be chosen for the caller.
    Routing(RoutingError),
    /// Another asset in the partition already uses this name.
    NameConflict(String),
    /// The storage engine failed or returned unreadable data.
    Storage(String),
}

impl fmt::Display for AssetStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing(e) => write!(f, "{}", e),
            Self::NameConflict(name) => write!(f, "An Asset named '{}' already exists", name),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for AssetStoreError {}

impl From<RoutingError> for AssetStoreError {
    fn from(err: RoutingError) -> Self {
        Self::Routing(err)
    }
}

impl From<surrealdb::Error> for AssetStoreError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Map a failed write of an asset named `name`. A collision on the name
/// index means a concurrent write took the name after `name_taken` ran.
fn write_error(name: &str, err: surrealdb::Error) -> AssetStoreError {
    if is_unique_violation(&err) {
        debug!("Asset name '{}' taken by a concurrent write: {}", name, err);
        AssetStoreError::NameConflict(name.to_string())
    } else {
        AssetStoreError::from(err)
    }
}

#[derive(Deserialize)]
struct CountRow {
    total: u64,
}

fn to_asset(record: AssetRecord) -> Result<Asset, AssetStoreError> {
    Asset::try_from(record).map_err(AssetStoreError::Storage)
}

fn first_asset(records: Vec<AssetRecord>) -> Result<Option<Asset>, AssetStoreError> {
    records.into_iter().next().map(to_asset).transpose()
}

#[derive(Clone)]
pub struct AssetStore {
    router: PartitionRouter,
}

impl AssetStore {
    pub fn new(router: PartitionRouter) -> Self {
        Self { router }
    }

    async fn name_taken(db: &Db, name: &str, except: Option<Uuid>) -> Result<bool, AssetStoreError> {
        let mut res = db
            .query("SELECT uuid FROM asset WHERE name = $name AND uuid != $except LIMIT 1")
            .bind(("name", name.to_string()))
            .bind(("except", except.map(|id| id.to_string()).unwrap_or_default()))
            .await?;
        let rows: Vec<serde_json::Value> = res.take(0)?;
        Ok(!rows.is_empty())
    }

    pub async fn create(&self, ctx: &TenantContext, fields: AssetFields) -> Result<Asset, AssetStoreError> {
        let db = self.router.partition_db(ctx).await?;
        if Self::name_taken(&db, &fields.name, None).await? {
            return Err(AssetStoreError::NameConflict(fields.name));
        }

        let id = Uuid::new_v4();
        let name = fields.name.clone();
        let mut res = db
            .query(
                r#"CREATE asset CONTENT {
                    uuid: $uuid,
                    name: $name,
                    created_timestamp: $created_timestamp,
                    server_url: $server_url
                }"#,
            )
            .bind(("uuid", id.to_string()))
            .bind(("name", fields.name))
            .bind(("created_timestamp", format_timestamp(&fields.created_timestamp)))
            .bind(("server_url", fields.server_url))
            .await
            .map_err(|e| write_error(&name, e))?;

        let created: Option<AssetRecord> = res.take(0).map_err(|e| write_error(&name, e))?;
        let asset = created
            .map(to_asset)
            .transpose()?
            .ok_or_else(|| AssetStoreError::Storage("insert returned no record".to_string()))?;
        info!("Created asset {}", asset.id);
        Ok(asset)
    }

    pub async fn read(&self, ctx: &TenantContext, id: Uuid) -> Result<Option<Asset>, AssetStoreError> {
        let db = self.router.partition_db(ctx).await?;
        let mut res = db
            .query("SELECT * FROM asset WHERE uuid = $uuid LIMIT 1")
            .bind(("uuid", id.to_string()))
            .await?;
        let records: Vec<AssetRecord> = res.take(0)?;
        first_asset(records)
    }

    /// Fetch several assets at once. Unknown ids are skipped.
    pub async fn read_multiple(&self, ctx: &TenantContext, ids: &[Uuid]) -> Result<Vec<Asset>, AssetStoreError> {
        let db = self.router.partition_db(ctx).await?;
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let mut res = db
            .query("SELECT * FROM asset WHERE uuid IN $uuids")
            .bind(("uuids", ids))
            .await?;
        let records: Vec<AssetRecord> = res.take(0)?;
        records.into_iter().map(to_asset).collect()
    }

    pub async fn read_page(&self, ctx: &TenantContext, request: &PageRequest) -> Result<Page<Asset>, AssetStoreError> {
        let db = self.router.partition_db(ctx).await?;

        let order = request
            .sort
            .map(|(field, direction)| format!(" ORDER BY {} {}", field.column(), direction.keyword()))
            .unwrap_or_default();
        let query = format!(
            "SELECT count() AS total FROM asset GROUP ALL; SELECT * FROM asset{} LIMIT $limit START $start;",
            order
        );
        debug!("Reading asset page {:?}", request);

        let mut res = db
            .query(query)
            .bind(("limit", request.page_size))
            .bind(("start", request.offset()))
            .await?;

        let counts: Vec<CountRow> = res.take(0)?;
        let total = counts.first().map(|c| c.total).unwrap_or(0);
        let records: Vec<AssetRecord> = res.take(1)?;
        let content = records
            .into_iter()
            .map(to_asset)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(content, request, total))
    }

    pub async fn update(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        fields: AssetFields,
    ) -> Result<Option<Asset>, AssetStoreError> {
        let db = self.router.partition_db(ctx).await?;
        if Self::name_taken(&db, &fields.name, Some(id)).await? {
            return Err(AssetStoreError::NameConflict(fields.name));
        }

        let name = fields.name.clone();
        let mut res = db
            .query(
                r#"UPDATE asset SET
                    name = $name,
                    created_timestamp = $created_timestamp,
                    server_url = $server_url
                WHERE uuid = $uuid"#,
            )
            .bind(("uuid", id.to_string()))
            .bind(("name", fields.name))
            .bind(("created_timestamp", format_timestamp(&fields.created_timestamp)))
            .bind(("server_url", fields.server_url))
            .await
            .map_err(|e| write_error(&name, e))?;
        let records: Vec<AssetRecord> = res.take(0).map_err(|e| write_error(&name, e))?;
        first_asset(records)
    }

    /// Returns whether an asset was deleted.
    pub async fn delete(&self, ctx: &TenantContext, id: Uuid) -> Result<bool, AssetStoreError> {
        let db = self.router.partition_db(ctx).await?;
        let mut res = db
            .query("DELETE asset WHERE uuid = $uuid RETURN BEFORE")
            .bind(("uuid", id.to_string()))
            .await?;
        let deleted: Vec<AssetRecord> = res.take(0)?;
        if !deleted.is_empty() {
            info!("Deleted asset {}", id);
        }
        Ok(!deleted.is_empty())
    }
}
