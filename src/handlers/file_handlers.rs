//! HTTP handlers for the per-user file and folder API.
//! Query parameters carry the caller's `userId`; identity is resolved upstream.
//! Download bodies are streamed straight from the object store.

use crate::{
    errors::AppError,
    models::{
        listing::{FolderListing, UploadedFile},
        usage::StorageUsage,
    },
    services::drive_service::{DriveService, UploadRequest},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: String,
    pub folder_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderQuery {
    pub user_id: String,
    pub folder_name: String,
    pub parent_folder_path: Option<String>,
}

/// `folderPath` is required; an empty value deletes everything the user owns.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFolderQuery {
    pub user_id: String,
    pub folder_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    pub user_id: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanUploadQuery {
    pub user_id: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanUploadResponse {
    pub success: bool,
    pub allowed: bool,
    pub max_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderInfo {
    pub name: String,
    pub full_path: String,
}

#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub success: bool,
    pub folder: FolderInfo,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    #[serde(flatten)]
    pub listing: FolderListing,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub success: bool,
    #[serde(flatten)]
    pub usage: StorageUsage,
}

/// `POST /api/files/upload` — multipart form with `userId`, optional
/// `folderPath` and one or more `files` parts. The whole batch is checked
/// against the user's quota before anything is stored.
pub async fn upload_files(
    State(service): State<DriveService>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut user_id = None;
    let mut folder_path = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "userId" => {
                user_id = Some(field.text().await?);
            }
            "folderPath" => {
                folder_path = Some(field.text().await?);
            }
            "files" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file part is missing a file name"))?;
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                files.push(UploadRequest::from_bytes(file_name, content_type, data));
            }
            other => debug!("ignoring multipart field `{}`", other),
        }
    }

    let user_id = user_id.ok_or_else(|| AppError::bad_request("missing userId"))?;
    if files.is_empty() {
        return Err(AppError::bad_request("no files provided"));
    }

    let uploaded = service
        .upload_files(&user_id, folder_path.as_deref(), files)
        .await?;

    Ok(Json(UploadResponse {
        success: true,
        files: uploaded,
    }))
}

/// `GET /api/files/can-upload` — advisory pre-check; the upload itself
/// re-checks under the user's lock.
pub async fn can_upload(
    State(service): State<DriveService>,
    Query(q): Query<CanUploadQuery>,
) -> Result<Json<CanUploadResponse>, AppError> {
    let allowed = service.can_upload(&q.user_id, q.size).await?;
    Ok(Json(CanUploadResponse {
        success: true,
        allowed,
        max_bytes: service.max_storage_bytes(),
    }))
}

/// `POST /api/files/folder`
pub async fn create_folder(
    State(service): State<DriveService>,
    Query(q): Query<CreateFolderQuery>,
) -> Result<Json<FolderResponse>, AppError> {
    let full_path = service
        .create_folder(&q.user_id, &q.folder_name, q.parent_folder_path.as_deref())
        .await?;

    Ok(Json(FolderResponse {
        success: true,
        folder: FolderInfo {
            name: q.folder_name,
            full_path,
        },
    }))
}

/// `GET /api/files/list`
pub async fn list_files(
    State(service): State<DriveService>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let listing = service
        .list_folder(&q.user_id, q.folder_path.as_deref())
        .await?;
    Ok(Json(ListResponse {
        success: true,
        listing,
    }))
}

/// `GET /api/files/download` — streams the object as an attachment.
pub async fn download_file(
    State(service): State<DriveService>,
    Query(q): Query<KeyQuery>,
) -> Result<Response, AppError> {
    let download = service.download(&q.user_id, &q.key).await?;
    debug!(key = %download.key, size = download.size, "streaming download");

    let mut response = Response::new(Body::from_stream(download.body));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(
        response.headers_mut(),
        &download.content_type,
        download.size,
        &download.file_name,
    );
    Ok(response)
}

/// `DELETE /api/files/file`
pub async fn delete_file(
    State(service): State<DriveService>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    service.delete_file(&q.user_id, &q.key).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "File deleted successfully".into(),
        deleted: None,
    }))
}

/// `DELETE /api/files/folder`
pub async fn delete_folder(
    State(service): State<DriveService>,
    Query(q): Query<DeleteFolderQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = service
        .delete_folder(&q.user_id, Some(q.folder_path.as_str()))
        .await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "Folder deleted successfully".into(),
        deleted: Some(deleted),
    }))
}

/// `DELETE /api/files/clear-all`
pub async fn clear_all(
    State(service): State<DriveService>,
    Query(q): Query<UserQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = service.clear_all(&q.user_id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "All files and folders cleared successfully".into(),
        deleted: Some(deleted),
    }))
}

/// `GET /api/files/storage-usage`
pub async fn storage_usage(
    State(service): State<DriveService>,
    Query(q): Query<UserQuery>,
) -> Result<Json<UsageResponse>, AppError> {
    let usage = service.storage_usage(&q.user_id).await?;
    Ok(Json(UsageResponse {
        success: true,
        usage,
    }))
}

fn set_download_headers(headers: &mut HeaderMap, content_type: &str, size: u64, file_name: &str) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', "'"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
}
