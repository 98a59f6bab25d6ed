//! Assets: the per-tenant data the service stores.

mod model;
mod store;

pub use model::{
    Asset, AssetFields, AssetRequest, DEFAULT_PAGE_SIZE, MAX_NAME_LEN, MAX_PAGE_SIZE,
    MAX_SERVER_URL_LEN, Page, PageParams, PageRequest, SortDirection, SortField, ValidationError,
    format_timestamp, parse_asset_id,
};
pub use store::{AssetStore, AssetStoreError};
