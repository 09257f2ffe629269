//! Metadata row for an object held by the on-disk store.

use crate::services::object_store::ObjectSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single stored object within the configured bucket.
///
/// The payload bytes live on disk; this row carries everything a listing or
/// download needs without touching the payload.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket the object belongs to.
    pub bucket: String,

    /// Full object key, e.g. `u1/docs/<uuid>_report.pdf`.
    pub key: String,

    /// Content type (MIME type) supplied at upload.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: Option<String>,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}

impl From<ObjectRecord> for ObjectSummary {
    fn from(row: ObjectRecord) -> Self {
        Self {
            key: row.key,
            size: row.size_bytes.max(0) as u64,
            last_modified: row.last_modified,
        }
    }
}
