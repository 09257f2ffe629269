//! src/services/local_store.rs
//!
//! LocalObjectStore — the durable `ObjectStore` backend. Object metadata lives
//! in SQLite, payloads on local disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{md5(key)}`. Hashing the key for the
//! file name keeps folder markers (keys ending in `/`) and arbitrary key text
//! away from the filesystem namespace.

use crate::{
    models::object::ObjectRecord,
    services::object_store::{
        ByteStream, Cursor, ListObjectsParams, ListPage, ObjectStore, PageBuilder, Step, StoreError,
        StoreResult, StoredObject, ensure_key_safe,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "SELECT id, bucket, key, content_type, size_bytes, etag, last_modified FROM objects";

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Bucket every operation is scoped to.
    pub bucket: String,
}

impl LocalObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
        }
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Payload location for `key`. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", self.bucket, key));
        let mut path = self.bucket_root();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "{SELECT_COLUMNS} WHERE bucket = ? AND key = ?"
        ))
        .bind(&self.bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Rows under `prefix` from `cursor` onwards, in key order.
    async fn fetch_after(
        &self,
        prefix: &str,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<ObjectRecord>> {
        let (op, from) = match cursor {
            Some(c) if c.is_inclusive() => (">=", c.key()),
            Some(c) => (">", c.key()),
            None => (">=", prefix),
        };
        // instr() keeps the prefix literal; LIKE would treat `_` and `%` as wildcards.
        let rows = sqlx::query_as::<_, ObjectRecord>(&format!(
            "{SELECT_COLUMNS} WHERE bucket = ? AND instr(key, ?) = 1 AND key {op} ? \
             ORDER BY key ASC LIMIT ?"
        ))
        .bind(&self.bucket)
        .bind(prefix)
        .bind(from)
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Stream `body` into a temp file beside `file_path`, returning the temp
    /// path, byte count and MD5 etag. The temp file is removed on failure.
    async fn write_temp(
        &self,
        file_path: &Path,
        mut body: ByteStream,
    ) -> StoreResult<(PathBuf, u64, String)> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut received: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            received += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        Ok((tmp_path, received, format!("{:x}", digest.compute())))
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Stream-upload an object to disk and upsert its metadata row.
    ///
    /// The byte count must match `size`; the payload is fsynced and renamed
    /// into place before the row is written.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: Option<String>,
    ) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let (tmp_path, received, etag) = self.write_temp(&file_path, body).await?;

        if received != size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::SizeMismatch {
                key: key.to_string(),
                declared: size,
                received,
            });
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        let insert_result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, bucket, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&self.bucket)
        .bind(key)
        .bind(content_type)
        .bind(received as i64)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match insert_result {
            Ok(_) => {
                debug!(key, size = received, etag = %etag, "stored object");
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    /// Open an object for streaming out.
    ///
    /// Returns NotFound if the row or the physical payload is missing.
    async fn get(&self, key: &str) -> StoreResult<StoredObject> {
        ensure_key_safe(key)?;
        let record = self.fetch_object(key).await?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(StoredObject {
            key: record.key,
            size: record.size_bytes.max(0) as u64,
            content_type: record.content_type,
            last_modified: record.last_modified,
            body: Box::pin(ReaderStream::new(file)),
        })
    }

    /// List one page following ListObjectsV2 rules: literal prefix filter,
    /// delimiter grouping, lexicographic order, opaque continuation token.
    async fn list(&self, params: ListObjectsParams) -> StoreResult<ListPage> {
        let mut builder = PageBuilder::new(&params)?;
        let batch = params.max_keys.clamp(1, 1000) + 1;

        'scan: loop {
            let rows = self
                .fetch_after(builder.prefix(), builder.cursor(), batch)
                .await?;
            let exhausted = rows.len() < batch;

            for row in rows {
                match builder.push(row.into()) {
                    Step::Next => {}
                    Step::SkipTo(_) => continue 'scan,
                    Step::Full | Step::Done => break 'scan,
                }
            }

            if exhausted {
                break;
            }
        }

        let page = builder.finish();
        debug!(
            prefix = %params.prefix,
            objects = page.objects.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.truncated,
            "listed objects"
        );
        Ok(page)
    }

    /// Delete the metadata row and payload. Absent keys are a no-op.
    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(&self.bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            debug!(key, "delete of absent object");
        }

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root()).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use bytes::Bytes;
    use futures::{TryStreamExt, stream};
    use tempfile::TempDir;

    async fn store() -> (LocalObjectStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        (LocalObjectStore::new(Arc::new(pool), dir.path(), "drive"), dir)
    }

    fn body(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::once(async move { Ok(Bytes::from_static(data)) }))
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (store, _dir) = store().await;
        store
            .put("u1/docs/a_b.txt", body(b"payload"), 7, Some("text/plain".into()))
            .await
            .unwrap();

        let obj = store.get("u1/docs/a_b.txt").await.unwrap();
        assert_eq!(obj.size, 7);
        assert_eq!(obj.content_type.as_deref(), Some("text/plain"));
        let chunks: Vec<Bytes> = obj.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"payload");
    }

    #[tokio::test]
    async fn overwrite_replaces_payload() {
        let (store, _dir) = store().await;
        store.put("u1/x", body(b"one"), 3, None).await.unwrap();
        store.put("u1/x", body(b"second"), 6, None).await.unwrap();

        let obj = store.get("u1/x").await.unwrap();
        let chunks: Vec<Bytes> = obj.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"second");
    }

    #[tokio::test]
    async fn folder_marker_is_storable() {
        let (store, _dir) = store().await;
        store.put("u1/docs/", body(b""), 0, None).await.unwrap();

        let page = store
            .list(ListObjectsParams::new("u1/").delimiter("/"))
            .await
            .unwrap();
        assert!(page.objects.is_empty());
        assert_eq!(page.common_prefixes, vec!["u1/docs/"]);
    }

    #[tokio::test]
    async fn prefix_is_literal() {
        let (store, _dir) = store().await;
        store.put("u1/a_b/x", body(b"1"), 1, None).await.unwrap();
        store.put("u1/aXb/y", body(b"1"), 1, None).await.unwrap();

        let page = store.list(ListObjectsParams::new("u1/a_b/")).await.unwrap();
        let keys: Vec<_> = page.objects.into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["u1/a_b/x"]);
    }

    #[tokio::test]
    async fn paginates_with_delimiter() {
        let (store, _dir) = store().await;
        for key in ["u1/a/1", "u1/a/2", "u1/b.txt", "u1/c/1", "u1/d.txt"] {
            store.put(key, body(b"1"), 1, None).await.unwrap();
        }

        let mut files = Vec::new();
        let mut folders = Vec::new();
        let mut token = None;
        loop {
            let page = store
                .list(
                    ListObjectsParams::new("u1/")
                        .delimiter("/")
                        .max_keys(2)
                        .continuation_token(token.take()),
                )
                .await
                .unwrap();
            files.extend(page.objects.into_iter().map(|o| o.key));
            folders.extend(page.common_prefixes);
            if !page.truncated {
                break;
            }
            token = page.next_token;
        }

        assert_eq!(files, vec!["u1/b.txt", "u1/d.txt"]);
        assert_eq!(folders, vec!["u1/a/", "u1/c/"]);
    }

    #[tokio::test]
    async fn max_code_point_segments_list_and_terminate() {
        let (store, _dir) = store().await;
        for key in [
            "u1/docs/sub/\u{10FFFF}/x",
            "u1/docs/sub/\u{10FFFF}\u{10FFFF}",
            "u1/docs/z.txt",
            "u1/docs/\u{10FFFF}/y",
        ] {
            store.put(key, body(b"1"), 1, None).await.unwrap();
        }

        let mut files = Vec::new();
        let mut folders = Vec::new();
        let mut token = None;
        loop {
            let page = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                store.list(
                    ListObjectsParams::new("u1/docs/")
                        .delimiter("/")
                        .max_keys(1)
                        .continuation_token(token.take()),
                ),
            )
            .await
            .expect("listing terminates")
            .unwrap();
            files.extend(page.objects.into_iter().map(|o| o.key));
            folders.extend(page.common_prefixes);
            if !page.truncated {
                break;
            }
            token = page.next_token;
        }

        assert_eq!(files, vec!["u1/docs/z.txt"]);
        assert_eq!(folders, vec!["u1/docs/sub/", "u1/docs/\u{10FFFF}/"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_cleans_payload() {
        let (store, dir) = store().await;
        store.put("u1/x", body(b"abc"), 3, None).await.unwrap();
        let path = store.object_path("u1/x");
        assert!(path.exists());

        store.delete("u1/x").await.unwrap();
        store.delete("u1/x").await.unwrap();
        assert!(!path.exists());
        assert!(matches!(store.get("u1/x").await, Err(StoreError::NotFound(_))));
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn size_mismatch_leaves_nothing_behind() {
        let (store, _dir) = store().await;
        let err = store.put("u1/x", body(b"abc"), 4, None).await.unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { .. }));
        assert!(matches!(store.get("u1/x").await, Err(StoreError::NotFound(_))));
    }
}
