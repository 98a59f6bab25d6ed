//! Asset entity, request payload and paging parameters, with the field
//! validation applied before anything reaches storage.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::schema::AssetRecord;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_SERVER_URL_LEN: usize = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

const NAME_PATTERN_MESSAGE: &str =
    "must start with a letter and contain only letters, digits, whitespace, '-', '_' or '.'";

/// An asset as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "iso_millis")]
    pub created_timestamp: DateTime<Utc>,
    pub server_url: Option<String>,
}

impl TryFrom<AssetRecord> for Asset {
    type Error = String;

    fn try_from(record: AssetRecord) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&record.uuid)
            .map_err(|e| format!("stored asset id '{}': {}", record.uuid, e))?;
        let created_timestamp = DateTime::parse_from_rfc3339(&record.created_timestamp)
            .map_err(|e| format!("stored timestamp of asset {}: {}", id, e))?
            .with_timezone(&Utc);
        Ok(Self {
            id,
            name: record.name,
            created_timestamp,
            server_url: record.server_url,
        })
    }
}

/// RFC 3339 in UTC with millisecond precision, e.g. `1970-01-01T00:00:00.000Z`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Body of create and update requests. Fields stay as strings until they
/// pass validation so every problem can be reported at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetRequest {
    pub name: Option<String>,
    pub created_timestamp: Option<String>,
    pub server_url: Option<String>,
}

/// Validated asset fields, ready to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFields {
    pub name: String,
    pub created_timestamp: DateTime<Utc>,
    pub server_url: Option<String>,
}

fn body_field(name: &str) -> String {
    format!("requestBody.{}", name)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(char::is_alphabetic)
        && chars.all(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.'))
}

fn is_https_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| u.scheme() == "https" && u.host_str().is_some())
}

impl AssetRequest {
    pub fn validate(&self) -> Result<AssetFields, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let name = self.name.as_deref().unwrap_or_default();
        if name.is_empty() {
            errors.push(ValidationError::new(body_field("name"), "must not be empty"));
        }
        if self.name.is_some() {
            let len = name.chars().count();
            if len == 0 || len > MAX_NAME_LEN {
                errors.push(ValidationError::new(
                    body_field("name"),
                    format!("size must be between 1 and {}", MAX_NAME_LEN),
                ));
            }
            if !is_valid_name(name) {
                errors.push(ValidationError::new(body_field("name"), NAME_PATTERN_MESSAGE));
            }
        }

        let created_timestamp = match self.created_timestamp.as_deref() {
            None => {
                errors.push(ValidationError::new(
                    body_field("createdTimestamp"),
                    "must not be empty",
                ));
                None
            }
            Some(raw) => {
                if raw.is_empty() {
                    errors.push(ValidationError::new(
                        body_field("createdTimestamp"),
                        "must not be empty",
                    ));
                }
                match DateTime::parse_from_rfc3339(raw) {
                    Ok(dt) => Some(dt.with_timezone(&Utc)),
                    Err(_) => {
                        errors.push(ValidationError::new(
                            body_field("createdTimestamp"),
                            "must be a valid ISO-8601 date-time",
                        ));
                        None
                    }
                }
            }
        };

        if let Some(url) = self.server_url.as_deref() {
            if url.chars().count() > MAX_SERVER_URL_LEN {
                errors.push(ValidationError::new(
                    body_field("serverUrl"),
                    format!("size must be between 0 and {}", MAX_SERVER_URL_LEN),
                ));
            }
            if !is_https_url(url) {
                errors.push(ValidationError::new(
                    body_field("serverUrl"),
                    "must be a valid URL",
                ));
            }
        }

        match created_timestamp {
            Some(created_timestamp) if errors.is_empty() => Ok(AssetFields {
                name: name.to_string(),
                created_timestamp,
                server_url: self.server_url.clone(),
            }),
            _ => Err(errors),
        }
    }
}

/// Parse an asset id from a path segment. Only the hyphenated form is
/// accepted.
pub fn parse_asset_id(raw: &str) -> Result<Uuid, ValidationError> {
    if raw.len() == 36
        && let Ok(id) = Uuid::parse_str(raw)
    {
        return Ok(id);
    }
    Err(ValidationError::new("id", "must be a valid UUID"))
}

/// Fields assets may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Name,
    CreatedTimestamp,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "createdTimestamp" => Some(Self::CreatedTimestamp),
            _ => None,
        }
    }

    /// Storage column. Only these fixed names ever reach a query.
    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "uuid",
            Self::Name => "name",
            Self::CreatedTimestamp => "created_timestamp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Raw paging query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub page_number: Option<String>,
    pub page_size: Option<String>,
    pub sort_field: Option<String>,
    pub sort_direction: Option<String>,
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_number: u32,
    pub page_size: u32,
    pub sort: Option<(SortField, SortDirection)>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_number: 0,
            page_size: DEFAULT_PAGE_SIZE,
            sort: None,
        }
    }
}

fn parse_bounded(
    field: &str,
    raw: Option<&str>,
    default: u32,
    max: u32,
    errors: &mut Vec<ValidationError>,
) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if value < 0 => {
            errors.push(ValidationError::new(
                field,
                "must be greater than or equal to 0",
            ));
            default
        }
        Ok(value) if value > i64::from(max) => {
            errors.push(ValidationError::new(
                field,
                format!("must be less than or equal to {}", max),
            ));
            default
        }
        Ok(value) => value as u32,
        Err(_) => {
            errors.push(ValidationError::new(field, "must be an integer"));
            default
        }
    }
}

impl PageRequest {
    pub fn from_params(params: &PageParams) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let page_number = parse_bounded(
            "pageNumber",
            params.page_number.as_deref(),
            0,
            i32::MAX as u32,
            &mut errors,
        );
        let page_size = parse_bounded(
            "pageSize",
            params.page_size.as_deref(),
            DEFAULT_PAGE_SIZE,
            MAX_PAGE_SIZE,
            &mut errors,
        );

        let direction = match params.sort_direction.as_deref() {
            None => SortDirection::Asc,
            Some(raw) => SortDirection::parse(raw).unwrap_or_else(|| {
                errors.push(ValidationError::new(
                    "sortDirection",
                    "must be one of the enumerated sort directions",
                ));
                SortDirection::Asc
            }),
        };

        let sort = match params.sort_field.as_deref() {
            None => None,
            Some(raw) => match SortField::parse(raw) {
                Some(field) => Some((field, direction)),
                None => {
                    errors.push(ValidationError::new(
                        "sortField",
                        "must be one of the enumerated sort fields for an Asset",
                    ));
                    None
                }
            },
        };

        if errors.is_empty() {
            Ok(Self {
                page_number,
                page_size,
                sort,
            })
        } else {
            Err(errors)
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number) * u64::from(self.page_size)
    }
}

/// One page of results plus totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        let total_pages = if request.page_size == 0 {
            0
        } else {
            total_elements.div_ceil(u64::from(request.page_size))
        };
        Self {
            content,
            page_number: request.page_number,
            page_size: request.page_size,
            total_elements,
            total_pages,
        }
    }
}
