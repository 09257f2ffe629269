//! src/services/object_store.rs
//!
//! The object store capability the drive engine is written against: put, get,
//! single-page list (with optional delimiter grouping) and idempotent delete,
//! all scoped to one bucket. Backends live in `local_store` and `memory_store`.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{collections::BTreeSet, io, ops::Bound, pin::Pin};
use thiserror::Error;

/// Streamed object payload. Dropping it releases the underlying handle.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

pub const MAX_OBJECT_KEY_LEN: usize = 1024;
pub const DEFAULT_MAX_KEYS: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object `{key}` declared {declared} bytes but received {received}")]
    SizeMismatch {
        key: String,
        declared: u64,
        received: u64,
    },
    #[error("listing under `{prefix}` stopped advancing (token {token:?})")]
    PaginationStalled {
        prefix: String,
        token: Option<String>,
    },
    #[error("invalid continuation token")]
    InvalidToken,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters for a single list call.
#[derive(Clone, Debug)]
pub struct ListObjectsParams {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

impl ListObjectsParams {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
            continuation_token: None,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// A leaf object as reported by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
    pub truncated: bool,
}

/// An object opened for reading.
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub body: ByteStream,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Bucket-scoped object store capability.
///
/// Every call is a single round trip with no retries; failures surface as-is.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `size` bytes from `body` under `key`, replacing any existing object.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: Option<String>,
    ) -> StoreResult<()>;

    /// Open `key` for reading. Absent keys yield `StoreError::NotFound`.
    async fn get(&self, key: &str) -> StoreResult<StoredObject>;

    /// Return one page of objects under `params.prefix`.
    async fn list(&self, params: ListObjectsParams) -> StoreResult<ListPage>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Reject keys that cannot be stored safely on any backend.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key.chars().any(|c| c.is_control() || c == '\\');
    if invalid {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Where the next read of a listing resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cursor {
    /// Strictly after this key.
    After(String),
    /// At this key or later.
    From(String),
}

impl Cursor {
    /// Lower bound for a range scan over an ordered map.
    pub(crate) fn bound(&self) -> Bound<&str> {
        match self {
            Cursor::After(key) => Bound::Excluded(key.as_str()),
            Cursor::From(key) => Bound::Included(key.as_str()),
        }
    }

    pub(crate) fn key(&self) -> &str {
        match self {
            Cursor::After(key) | Cursor::From(key) => key,
        }
    }

    pub(crate) fn is_inclusive(&self) -> bool {
        matches!(self, Cursor::From(_))
    }
}

/// Smallest string that sorts after every key beginning with `prefix`.
///
/// UTF-8 byte order matches code point order, so bumping the last code point
/// that has a successor is enough. `None` when no such string exists.
pub(crate) fn skip_past(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last {
            '\u{D7FF}' => Some('\u{E000}'),
            c => char::from_u32(c as u32 + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

pub(crate) fn encode_token(cursor: &Cursor) -> String {
    let tagged = match cursor {
        Cursor::After(key) => format!("a{key}"),
        Cursor::From(key) => format!("f{key}"),
    };
    general_purpose::URL_SAFE_NO_PAD.encode(tagged)
}

pub(crate) fn decode_token(token: &str) -> StoreResult<Cursor> {
    let tagged = general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(StoreError::InvalidToken)?;
    match tagged.split_at_checked(1) {
        Some(("a", key)) => Ok(Cursor::After(key.to_string())),
        Some(("f", key)) => Ok(Cursor::From(key.to_string())),
        _ => Err(StoreError::InvalidToken),
    }
}

/// Compute a synthetic "common prefix" for delimiter listings.
///
/// Returns Some(prefix) if the key belongs to a grouped prefix, otherwise None.
pub(crate) fn compute_common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::with_capacity(prefix.len() + pos + delimiter.len());
    combined.push_str(prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

/// What a backend should do after feeding one object to a [`PageBuilder`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Keep reading keys after the one just pushed.
    Next,
    /// A common prefix was recorded; resume at this cursor.
    SkipTo(Cursor),
    /// The page already holds `max_keys` entries and more exist.
    Full,
    /// No key can follow the last common prefix.
    Done,
}

/// Accumulates key-ordered objects into one ListObjectsV2-style page.
///
/// Objects and common prefixes both count against `max_keys`. Backends feed
/// objects in ascending key order and obey the returned [`Step`].
pub(crate) struct PageBuilder {
    prefix: String,
    delimiter: Option<String>,
    max_keys: usize,
    objects: Vec<ObjectSummary>,
    common_prefixes: BTreeSet<String>,
    cursor: Option<Cursor>,
    truncated: bool,
}

impl PageBuilder {
    pub(crate) fn new(params: &ListObjectsParams) -> StoreResult<Self> {
        let cursor = params
            .continuation_token
            .as_deref()
            .map(decode_token)
            .transpose()?;
        Ok(Self {
            prefix: params.prefix.clone(),
            delimiter: params.delimiter.clone().filter(|d| !d.is_empty()),
            max_keys: params.max_keys.clamp(1, DEFAULT_MAX_KEYS),
            objects: Vec::new(),
            common_prefixes: BTreeSet::new(),
            cursor,
            truncated: false,
        })
    }

    /// Where the next read should start, if anything has been read.
    pub(crate) fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    fn len(&self) -> usize {
        self.objects.len() + self.common_prefixes.len()
    }

    pub(crate) fn push(&mut self, object: ObjectSummary) -> Step {
        if self.len() >= self.max_keys {
            self.truncated = true;
            return Step::Full;
        }

        if let Some(delim) = &self.delimiter {
            if let Some(common) = compute_common_prefix(&object.key, &self.prefix, delim) {
                let next = skip_past(&common);
                self.common_prefixes.insert(common);
                return match next {
                    Some(next) => {
                        let cursor = Cursor::From(next);
                        self.cursor = Some(cursor.clone());
                        Step::SkipTo(cursor)
                    }
                    None => Step::Done,
                };
            }
        }

        self.cursor = Some(Cursor::After(object.key.clone()));
        self.objects.push(object);
        Step::Next
    }

    pub(crate) fn finish(self) -> ListPage {
        let next_token = if self.truncated {
            self.cursor.as_ref().map(encode_token)
        } else {
            None
        };
        ListPage {
            objects: self.objects,
            common_prefixes: self.common_prefixes.into_iter().collect(),
            next_token,
            truncated: self.truncated,
        }
    }
}
