//! src/services/drive_service.rs
//!
//! DriveService — a per-user folder tree over a flat object store. Folders are
//! key prefixes: listing a folder is a delimiter listing of its prefix,
//! deleting one removes every key beneath it, and quota usage is the sum of
//! object sizes under `<user_id>/`. The service holds no filesystem state of
//! its own; everything is derived from the key space on each call.

use crate::{
    models::{
        listing::{FileEntry, FolderEntry, FolderListing, UploadedFile, format_file_size},
        usage::StorageUsage,
    },
    services::{
        object_store::{ByteStream, ListObjectsParams, ListPage, ObjectStore, StoreError},
        paths::{self, DELIMITER, PathError},
    },
};
use bytes::Bytes;
use futures::stream;
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 1 GiB.
pub const DEFAULT_MAX_STORAGE_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug)]
pub struct DriveConfig {
    /// Per-user quota across all non-marker objects.
    pub max_storage_bytes: u64,
    /// `max_keys` requested from the store per list call.
    pub page_size: usize,
    /// Upper bound on a full pagination scan or batch delete.
    pub scan_timeout: Duration,
    /// Validate user ids, folder paths and names before building keys.
    pub strict_paths: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_storage_bytes: DEFAULT_MAX_STORAGE_BYTES,
            page_size: DEFAULT_PAGE_SIZE,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            strict_paths: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error(
        "storage limit exceeded: {used} bytes used, {incoming} bytes incoming, {max} bytes allowed"
    )]
    QuotaExceeded { used: u64, incoming: u64, max: u64 },
    #[error("failed to upload `{key}`: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("operation on `{prefix}` exceeded {timeout:?}")]
    Timeout { prefix: String, timeout: Duration },
}

pub type DriveResult<T> = Result<T, DriveError>;

/// A file to be stored, with its size known up front.
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub body: ByteStream,
}

impl UploadRequest {
    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: Option<String>,
        data: Bytes,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            size: data.len() as u64,
            body: Box::pin(stream::once(async move { Ok(data) })),
        }
    }
}

/// A file opened for download.
pub struct Download {
    pub key: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub body: ByteStream,
}

/// Async mutex per user id, serializing quota check and upload.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    fn handle(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(user_id.to_string()).or_default().clone()
    }

    /// Drop locks nobody holds a handle to.
    fn prune(&self) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[derive(Clone)]
pub struct DriveService {
    store: Arc<dyn ObjectStore>,
    config: DriveConfig,
    upload_locks: Arc<UserLocks>,
}

impl DriveService {
    pub fn new(store: Arc<dyn ObjectStore>, config: DriveConfig) -> Self {
        Self {
            store,
            config,
            upload_locks: Arc::new(UserLocks::default()),
        }
    }

    pub fn max_storage_bytes(&self) -> u64 {
        self.config.max_storage_bytes
    }

    fn check_user(&self, user_id: &str) -> DriveResult<()> {
        if user_id.is_empty() {
            return Err(PathError::Empty("user id").into());
        }
        if self.config.strict_paths {
            paths::validate_name("user id", user_id)?;
        }
        Ok(())
    }

    fn check_folder(&self, what: &'static str, folder: Option<&str>) -> DriveResult<()> {
        if self.config.strict_paths {
            paths::validate_folder_path(what, folder.unwrap_or_default())?;
        }
        Ok(())
    }

    fn check_name(&self, what: &'static str, name: &str) -> DriveResult<()> {
        if name.is_empty() {
            return Err(PathError::Empty(what).into());
        }
        if self.config.strict_paths {
            paths::validate_name(what, name)?;
        }
        Ok(())
    }

    /// Checked before anything is written so an oversized key is a path
    /// error rather than a store failure.
    fn check_file_key(&self, user_id: &str, folder: Option<&str>, name: &str) -> DriveResult<()> {
        paths::check_key_len(name, paths::file_key_len(user_id, folder, name))?;
        Ok(())
    }

    /// Run `fut` under the configured scan deadline.
    async fn within_deadline<T>(
        &self,
        prefix: &str,
        fut: impl Future<Output = DriveResult<T>>,
    ) -> DriveResult<T> {
        match tokio::time::timeout(self.config.scan_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(prefix, timeout = ?self.config.scan_timeout, "scan deadline exceeded");
                Err(DriveError::Timeout {
                    prefix: prefix.to_string(),
                    timeout: self.config.scan_timeout,
                })
            }
        }
    }

    /// Page through every listing result under `prefix`, handing each page to
    /// `visit`. Fails if the store reports a truncated page without a fresh
    /// continuation token.
    async fn walk<F>(&self, prefix: &str, delimiter: Option<&str>, mut visit: F) -> DriveResult<()>
    where
        F: FnMut(ListPage) + Send,
    {
        let mut token: Option<String> = None;
        let mut seen_tokens = HashSet::new();
        let mut pages = 0usize;
        loop {
            let mut params = ListObjectsParams::new(prefix)
                .max_keys(self.config.page_size)
                .continuation_token(token.take());
            if let Some(delimiter) = delimiter {
                params = params.delimiter(delimiter);
            }

            let page = self.store.list(params).await?;
            pages += 1;
            let truncated = page.truncated;
            let next = page.next_token.clone();
            visit(page);

            if !truncated {
                break;
            }
            match next {
                Some(next) if seen_tokens.insert(next.clone()) => token = Some(next),
                stalled => {
                    warn!(prefix, token = ?stalled, "listing stopped advancing");
                    return Err(StoreError::PaginationStalled {
                        prefix: prefix.to_string(),
                        token: stalled,
                    }
                    .into());
                }
            }
        }
        debug!(prefix, pages, "scan complete");
        Ok(())
    }

    /// [`DriveService::walk`] under the scan deadline.
    async fn scan<F>(&self, prefix: &str, delimiter: Option<&str>, visit: F) -> DriveResult<()>
    where
        F: FnMut(ListPage) + Send,
    {
        self.within_deadline(prefix, self.walk(prefix, delimiter, visit)).await
    }

    /// Store one file under `<user>/[<folder>/]<uuid>_<name>` and return its key.
    ///
    /// Does not consult the quota; see [`DriveService::upload_files`].
    pub async fn upload_file(
        &self,
        user_id: &str,
        folder: Option<&str>,
        file: UploadRequest,
    ) -> DriveResult<UploadedFile> {
        self.check_user(user_id)?;
        self.check_folder("folder path", folder)?;
        self.check_name("file name", &file.file_name)?;
        self.check_file_key(user_id, folder, &file.file_name)?;

        let token = Uuid::new_v4().to_string();
        let key = paths::file_key(user_id, folder, &token, &file.file_name);
        debug!(key = %key, size = file.size, "uploading file");

        self.store
            .put(&key, file.body, file.size, file.content_type.clone())
            .await
            .map_err(|source| DriveError::Upload {
                key: key.clone(),
                source,
            })?;

        info!(user_id, key = %key, size = file.size, "uploaded file");
        Ok(UploadedFile {
            name: file.file_name,
            key,
            size_bytes: file.size,
            size_label: format_file_size(file.size),
            content_type: file.content_type,
        })
    }

    /// Quota-checked batch upload.
    ///
    /// Holds the user's upload lock while the combined size is checked against
    /// the quota and every file is stored, so concurrent batches from one user
    /// are applied one at a time. Nothing is stored if the batch does not fit.
    pub async fn upload_files(
        &self,
        user_id: &str,
        folder: Option<&str>,
        files: Vec<UploadRequest>,
    ) -> DriveResult<Vec<UploadedFile>> {
        self.check_user(user_id)?;
        self.check_folder("folder path", folder)?;
        for file in &files {
            self.check_name("file name", &file.file_name)?;
            self.check_file_key(user_id, folder, &file.file_name)?;
        }

        let lock = self.upload_locks.handle(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.upload_batch_locked(user_id, folder, files).await
        };
        drop(lock);
        self.upload_locks.prune();
        result
    }

    async fn upload_batch_locked(
        &self,
        user_id: &str,
        folder: Option<&str>,
        files: Vec<UploadRequest>,
    ) -> DriveResult<Vec<UploadedFile>> {
        let incoming: u64 = files.iter().map(|f| f.size).sum();
        let used = self.used_bytes(user_id).await?;
        let max = self.config.max_storage_bytes;
        if !self.fits(used, incoming) {
            warn!(user_id, used, incoming, max, "upload rejected by quota");
            return Err(DriveError::QuotaExceeded { used, incoming, max });
        }

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            uploaded.push(self.upload_file(user_id, folder, file).await?);
        }
        Ok(uploaded)
    }

    /// Write the zero-byte marker `<user>/<parent>/<name>/` and return the
    /// folder's full path. Re-creating an existing folder is a no-op overwrite.
    pub async fn create_folder(
        &self,
        user_id: &str,
        folder_name: &str,
        parent: Option<&str>,
    ) -> DriveResult<String> {
        self.check_user(user_id)?;
        self.check_name("folder name", folder_name)?;
        self.check_folder("parent folder path", parent)?;

        let full_path = paths::join_folder(parent, folder_name);
        let marker = paths::folder_prefix(user_id, Some(&full_path));
        paths::check_key_len(&full_path, marker.len())?;
        let empty: ByteStream = Box::pin(stream::empty());
        self.store.put(&marker, empty, 0, None).await?;

        info!(user_id, path = %full_path, "created folder");
        Ok(full_path)
    }

    /// Direct children of a folder: files stored at this level and one entry
    /// per sub-folder prefix, in store order.
    pub async fn list_folder(
        &self,
        user_id: &str,
        folder: Option<&str>,
    ) -> DriveResult<FolderListing> {
        self.check_user(user_id)?;
        self.check_folder("folder path", folder)?;

        let folder = paths::normalize_folder(folder);
        let prefix = paths::folder_prefix(user_id, folder);
        let mut listing = FolderListing::default();
        let mut seen_prefixes = HashSet::new();

        self.scan(&prefix, Some(DELIMITER), |page| {
            for object in page.objects {
                if object.key == prefix || object.key.ends_with(DELIMITER) {
                    continue;
                }
                let id = listing.files.len() + 1;
                listing.files.push(FileEntry::new(id, object));
            }
            for common in page.common_prefixes {
                let Some(name) = paths::child_folder_name(&prefix, &common) else {
                    continue;
                };
                if !seen_prefixes.insert(common.clone()) {
                    continue;
                }
                let id = listing.folders.len() + 1;
                listing.folders.push(FolderEntry {
                    id,
                    name: name.to_string(),
                    full_path: paths::join_folder(folder, name),
                });
            }
        })
        .await?;

        debug!(
            prefix = %prefix,
            files = listing.files.len(),
            folders = listing.folders.len(),
            "listed folder"
        );
        Ok(listing)
    }

    /// Sum of sizes of every non-marker object under `<user>/`.
    pub async fn used_bytes(&self, user_id: &str) -> DriveResult<u64> {
        self.check_user(user_id)?;
        let prefix = paths::user_prefix(user_id);
        let mut total: u64 = 0;
        self.scan(&prefix, None, |page| {
            total += page
                .objects
                .iter()
                .filter(|o| !o.key.ends_with(DELIMITER))
                .map(|o| o.size)
                .sum::<u64>();
        })
        .await?;
        Ok(total)
    }

    pub async fn storage_usage(&self, user_id: &str) -> DriveResult<StorageUsage> {
        let used = self.used_bytes(user_id).await?;
        Ok(StorageUsage::new(used, self.config.max_storage_bytes))
    }

    /// Whether `incoming` more bytes fit in the user's quota right now.
    ///
    /// Advisory only: another upload may land between this check and a
    /// subsequent [`DriveService::upload_file`].
    pub async fn can_upload(&self, user_id: &str, incoming: u64) -> DriveResult<bool> {
        let used = self.used_bytes(user_id).await?;
        Ok(self.fits(used, incoming))
    }

    fn fits(&self, used: u64, incoming: u64) -> bool {
        used.saturating_add(incoming) <= self.config.max_storage_bytes
    }

    /// Delete every key under the folder's prefix, returning how many were
    /// removed. An empty `folder` clears the user's whole namespace.
    ///
    /// Keys are collected first and then deleted one by one; the first store
    /// failure aborts the batch and leaves the rest in place. Collection and
    /// deletion share one scan deadline.
    pub async fn delete_folder(&self, user_id: &str, folder: Option<&str>) -> DriveResult<usize> {
        self.check_user(user_id)?;
        self.check_folder("folder path", folder)?;

        let prefix = paths::folder_prefix(user_id, folder);
        let count = self
            .within_deadline(&prefix, async {
                let mut keys = Vec::new();
                self.walk(&prefix, None, |page| {
                    keys.extend(page.objects.into_iter().map(|o| o.key));
                })
                .await?;

                for key in &keys {
                    self.store.delete(key).await?;
                    debug!(key = %key, "deleted object");
                }
                Ok::<usize, DriveError>(keys.len())
            })
            .await?;

        if count == 0 {
            debug!(prefix = %prefix, "no objects to delete");
        } else {
            info!(user_id, prefix = %prefix, count, "deleted folder");
        }
        Ok(count)
    }

    /// Remove all of a user's files and folders.
    pub async fn clear_all(&self, user_id: &str) -> DriveResult<usize> {
        self.delete_folder(user_id, None).await
    }

    /// Delete a single file. Deleting an absent key succeeds.
    pub async fn delete_file(&self, user_id: &str, key: &str) -> DriveResult<()> {
        self.check_user(user_id)?;
        if !key.starts_with(&paths::user_prefix(user_id)) {
            return Err(PathError::ForeignKey(key.to_string()).into());
        }
        self.store.delete(key).await?;
        info!(user_id, key, "deleted file");
        Ok(())
    }

    /// Open a user's file for streaming. Keys outside the user's namespace and
    /// folder markers read as not found.
    pub async fn download(&self, user_id: &str, key: &str) -> DriveResult<Download> {
        self.check_user(user_id)?;
        if !key.starts_with(&paths::user_prefix(user_id)) || key.ends_with(DELIMITER) {
            return Err(DriveError::NotFound(key.to_string()));
        }

        let object = self.store.get(key).await.map_err(|err| match err {
            StoreError::NotFound(key) => DriveError::NotFound(key),
            other => DriveError::Store(other),
        })?;

        debug!(key, size = object.size, "opened download");
        Ok(Download {
            file_name: paths::original_name(paths::display_name(key)).to_string(),
            content_type: object
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: object.size,
            key: object.key,
            body: object.body,
        })
    }

    /// One-entry listing used by readiness checks.
    pub async fn probe(&self) -> DriveResult<()> {
        self.store.list(ListObjectsParams::new("").max_keys(1)).await?;
        Ok(())
    }
}
