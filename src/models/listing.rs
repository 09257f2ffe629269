//! Folder listings and upload results.
//!
//! Listing ids are positions within one response, starting at 1 for files
//! and for folders independently. They are not stable identities.

use crate::services::{object_store::ObjectSummary, paths};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A leaf object directly inside the listed folder.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: usize,
    /// Last path segment of the key, upload token included.
    pub name: String,
    /// Name as uploaded, without the upload token.
    pub original_name: String,
    pub size_bytes: u64,
    pub size_label: String,
    pub last_modified: DateTime<Utc>,
    pub key: String,
}

impl FileEntry {
    pub fn new(id: usize, object: ObjectSummary) -> Self {
        let name = paths::display_name(&object.key).to_string();
        let original_name = paths::original_name(&name).to_string();
        Self {
            id,
            name,
            original_name,
            size_bytes: object.size,
            size_label: format_file_size(object.size),
            last_modified: object.last_modified,
            key: object.key,
        }
    }
}

/// A direct child folder of the listed folder.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub id: usize,
    pub name: String,
    pub full_path: String,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct FolderListing {
    pub files: Vec<FileEntry>,
    pub folders: Vec<FolderEntry>,
}

impl FolderListing {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }
}

/// Result of one stored upload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub key: String,
    pub size_bytes: u64,
    pub size_label: String,
    pub content_type: Option<String>,
}

/// Human-readable size: bytes below 1 KiB, otherwise KB or MB with one decimal.
pub fn format_file_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_labels() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(1023), "1023 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn file_entry_from_summary() {
        let entry = FileEntry::new(
            3,
            ObjectSummary {
                key: "u1/docs/0b7e9b1c-5a41-4e43-9a0f-0f3d2b6c7d11_notes.md".into(),
                size: 2048,
                last_modified: Utc::now(),
            },
        );
        assert_eq!(entry.id, 3);
        assert_eq!(entry.name, "0b7e9b1c-5a41-4e43-9a0f-0f3d2b6c7d11_notes.md");
        assert_eq!(entry.original_name, "notes.md");
        assert_eq!(entry.size_label, "2.0 KB");
    }
}
