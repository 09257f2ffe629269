//! Defines routes for the per-user file and folder API.
//!
//! ## Structure
//! - **Files** (under `/api/files`)
//!   - `POST   /upload`        — multipart upload of one or more files
//!   - `GET    /download`      — stream a file by key
//!   - `DELETE /file`          — delete one file by key
//!   - `GET    /list`          — direct children of a folder
//!
//! - **Folders and account**
//!   - `POST   /folder`        — create a folder marker
//!   - `DELETE /folder`        — recursive folder delete
//!   - `DELETE /clear-all`     — delete everything the user owns
//!   - `GET    /storage-usage` — bytes used against the quota
//!   - `GET    /can-upload`    — whether `size` more bytes fit the quota
//!
//! Every endpoint takes the caller's `userId` as a query parameter (or form
//! field for uploads).

use crate::{
    handlers::{
        file_handlers::{
            can_upload, clear_all, create_folder, delete_file, delete_folder, download_file,
            list_files, storage_usage, upload_files,
        },
        health_handlers::{healthz, readyz},
    },
    services::drive_service::DriveService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router for all drive routes.
///
/// `body_limit` caps a single multipart upload request in bytes.
pub fn routes(body_limit: usize) -> Router<DriveService> {
    let files = Router::new()
        .route(
            "/upload",
            post(upload_files).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/folder", post(create_folder).delete(delete_folder))
        .route("/list", get(list_files))
        .route("/download", get(download_file))
        .route("/file", delete(delete_file))
        .route("/clear-all", delete(clear_all))
        .route("/storage-usage", get(storage_usage))
        .route("/can-upload", get(can_upload));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/files", files)
}
