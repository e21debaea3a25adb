//! Represents a stored image and the keys used to address it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Longest file name most filesystems accept for one path component.
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Metadata row for a single uploaded image.
///
/// `(owner_id, created_at)` is the primary key, `image_id` is reachable
/// through the secondary index. The blob location fields are internal and
/// never leave the service; see [`ImageMetadata`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    /// Partition component of the primary key.
    pub owner_id: String,

    /// Sort component of the primary key, see [`format_timestamp`].
    pub created_at: String,

    /// Globally unique image identifier (UUID v4).
    pub image_id: String,

    /// Filename as supplied by the client, unsanitized.
    pub file_name: String,

    /// MIME type declared at upload.
    pub content_type: String,

    /// Byte length of the stored blob.
    pub size_bytes: i64,

    /// Ordered tags, persisted as a JSON array.
    #[sqlx(json)]
    pub tags: Vec<String>,

    pub description: String,

    /// Object-store container holding the payload.
    pub blob_bucket: String,

    /// Object-store path of the payload.
    pub blob_key: String,
}

impl ImageRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            owner_id: self.owner_id.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Primary key of an [`ImageRecord`]; doubles as the resume position of a
/// paginated scan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct RecordKey {
    pub owner_id: String,
    pub created_at: String,
}

/// Client-facing view of an image. Carries no object-store addressing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageMetadata {
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub created_at: String,
    pub image_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub tags: Vec<String>,
    pub description: String,
}

impl From<ImageRecord> for ImageMetadata {
    fn from(record: ImageRecord) -> Self {
        Self {
            owner_id: record.owner_id,
            created_at: record.created_at,
            image_id: record.image_id,
            file_name: record.file_name,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            tags: record.tags,
            description: record.description,
        }
    }
}

/// Tags as they arrive from clients: a JSON list or one comma-separated string.
///
/// List entries need not be strings; scalars are rendered as text.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<Value>),
    Csv(String),
}

impl TagsInput {
    /// Canonical tag sequence: entries trimmed, empties dropped, order kept.
    pub fn normalize(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            TagsInput::List(tags) => tags
                .into_iter()
                .filter_map(|tag| match tag {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .collect(),
            TagsInput::Csv(joined) => joined.split(',').map(str::to_string).collect(),
        };
        raw.iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Render a sort-key timestamp: RFC 3339, fixed microseconds, `Z` suffix.
///
/// Fixed width keeps lexicographic order equal to chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO-8601 bound and re-render it in sort-key form.
///
/// Accepts RFC 3339, a date-time without offset (taken as UTC) or a bare
/// date (midnight UTC).
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(format_timestamp(ts.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(format_timestamp(naive.and_utc()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| format_timestamp(midnight.and_utc()))
}

/// Object-store path for a payload: `{owner_id}/{image_id}/{file_name}` with
/// every path separator in the filename replaced by `_`. Names longer than
/// [`MAX_FILE_NAME_BYTES`] are shortened, keeping the extension.
pub fn blob_key(owner_id: &str, image_id: &str, file_name: &str) -> String {
    let safe_name = shorten_file_name(&file_name.replace(['/', '\\'], "_"));
    format!("{owner_id}/{image_id}/{safe_name}")
}

fn shorten_file_name(name: &str) -> String {
    if name.len() <= MAX_FILE_NAME_BYTES {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= 16 => name.split_at(dot),
        _ => (name, ""),
    };
    let mut cut = MAX_FILE_NAME_BYTES - ext.len();
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}
