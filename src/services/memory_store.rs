//! In-process object store over an ordered map.
//!
//! Listing semantics match the on-disk store, so it doubles as the test
//! backend for the drive engine and as an ephemeral `--backend memory` mode.

use crate::services::object_store::{
    ByteStream, Cursor, ListObjectsParams, ListPage, ObjectStore, ObjectSummary, PageBuilder,
    Step, StoreError, StoreResult, StoredObject, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, RwLock},
};
use tracing::debug;

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, MemoryObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, markers included.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// First object under `prefix` at or after `cursor` (or from the prefix start).
    fn next_after(&self, prefix: &str, cursor: Option<&Cursor>) -> Option<ObjectSummary> {
        let map = self.read();
        let lower = match cursor {
            Some(c) if c.key() >= prefix => c.bound(),
            _ => Bound::Included(prefix),
        };
        map.range::<str, _>((lower, Bound::Unbounded))
            .next()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectSummary {
                key: key.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        size: u64,
        content_type: Option<String>,
    ) -> StoreResult<()> {
        ensure_key_safe(key)?;

        let mut buf = BytesMut::with_capacity(size.min(1 << 20) as usize);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let received = buf.len() as u64;
        if received != size {
            return Err(StoreError::SizeMismatch {
                key: key.to_string(),
                declared: size,
                received,
            });
        }

        self.write().insert(
            key.to_string(),
            MemoryObject {
                data: buf.freeze(),
                content_type,
                last_modified: Utc::now(),
            },
        );
        debug!(key, size, "stored object in memory");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<StoredObject> {
        ensure_key_safe(key)?;
        let obj = self
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        Ok(StoredObject {
            key: key.to_string(),
            size: obj.data.len() as u64,
            content_type: obj.content_type,
            last_modified: obj.last_modified,
            body: Box::pin(stream::once(async move { Ok(obj.data) })),
        })
    }

    async fn list(&self, params: ListObjectsParams) -> StoreResult<ListPage> {
        let mut builder = PageBuilder::new(&params)?;
        loop {
            let Some(object) = self.next_after(builder.prefix(), builder.cursor()) else {
                break;
            };
            match builder.push(object) {
                Step::Next | Step::SkipTo(_) => continue,
                Step::Full | Step::Done => break,
            }
        }
        Ok(builder.finish())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        if self.write().remove(key).is_some() {
            debug!(key, "removed object from memory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn body(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::once(async move { Ok(Bytes::from_static(data)) }))
    }

    async fn seed(store: &MemoryObjectStore, keys: &[&str]) {
        for key in keys {
            store.put(key, body(b"abc"), 3, None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn delimiter_listing_separates_children() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &["u1/a.txt", "u1/docs/b.txt", "u1/docs/deep/c.txt", "u1/pics/", "u2/x"],
        )
        .await;

        let page = store
            .list(ListObjectsParams::new("u1/").delimiter("/"))
            .await
            .unwrap();

        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["u1/a.txt"]);
        assert_eq!(page.common_prefixes, vec!["u1/docs/", "u1/pics/"]);
        assert!(!page.truncated);
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn pages_cover_every_key_once() {
        let store = MemoryObjectStore::new();
        let keys: Vec<String> = (0..7).map(|i| format!("u1/f{i}")).collect();
        for key in &keys {
            store.put(key, body(b"abc"), 3, None).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = store
                .list(
                    ListObjectsParams::new("u1/")
                        .max_keys(3)
                        .continuation_token(token.take()),
                )
                .await
                .unwrap();
            seen.extend(page.objects.into_iter().map(|o| o.key));
            if !page.truncated {
                break;
            }
            token = page.next_token;
        }
        assert_eq!(seen, keys);
    }

    #[tokio::test]
    async fn common_prefix_not_repeated_across_pages() {
        let store = MemoryObjectStore::new();
        seed(&store, &["u1/a/1", "u1/a/2", "u1/a/3", "u1/b/1", "u1/c"]).await;

        let first = store
            .list(ListObjectsParams::new("u1/").delimiter("/").max_keys(1))
            .await
            .unwrap();
        assert_eq!(first.common_prefixes, vec!["u1/a/"]);
        assert!(first.truncated);

        let second = store
            .list(
                ListObjectsParams::new("u1/")
                    .delimiter("/")
                    .max_keys(1)
                    .continuation_token(first.next_token),
            )
            .await
            .unwrap();
        assert_eq!(second.common_prefixes, vec!["u1/b/"]);
    }

    #[tokio::test]
    async fn max_code_point_segments_list_and_terminate() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &[
                "u1/docs/sub/\u{10FFFF}/x",
                "u1/docs/sub/\u{10FFFF}\u{10FFFF}",
                "u1/docs/z.txt",
                "u1/docs/\u{10FFFF}/y",
            ],
        )
        .await;

        let page = store
            .list(ListObjectsParams::new("u1/docs/").delimiter("/"))
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["u1/docs/z.txt"]);
        assert_eq!(
            page.common_prefixes,
            vec!["u1/docs/sub/", "u1/docs/\u{10FFFF}/"]
        );
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn get_round_trips_and_reports_missing() {
        let store = MemoryObjectStore::new();
        store
            .put("u1/x", body(b"hello"), 5, Some("text/plain".into()))
            .await
            .unwrap();

        let obj = store.get("u1/x").await.unwrap();
        assert_eq!(obj.content_type.as_deref(), Some("text/plain"));
        let chunks: Vec<Bytes> = obj.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello");

        assert!(matches!(
            store.get("u1/missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_rejects_short_body() {
        let store = MemoryObjectStore::new();
        let err = store.put("u1/x", body(b"abc"), 10, None).await.unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { received: 3, .. }));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryObjectStore::new();
        seed(&store, &["u1/x"]).await;
        store.delete("u1/x").await.unwrap();
        store.delete("u1/x").await.unwrap();
        assert!(store.keys().is_empty());
    }
}
