//! Resolved file metadata

use serde::{Deserialize, Serialize};

use super::size::{total_size_bytes, SizeError, SizeUnit};

/// Read-only view of one stored object, resolved per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Blob-store key
    pub storage_key: String,
    /// Size as recorded in the metadata store
    pub declared_size: f64,
    pub size_unit: SizeUnit,
    /// Folder the file is grouped under inside bundles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
}

impl FileDescriptor {
    pub fn new(storage_key: impl Into<String>, declared_size: f64, size_unit: SizeUnit) -> Self {
        Self {
            storage_key: storage_key.into(),
            declared_size,
            size_unit,
            folder_name: None,
        }
    }

    /// Set the folder, treating blank names as no folder
    pub fn with_folder(mut self, folder_name: impl Into<String>) -> Self {
        self.folder_name = normalize_folder(Some(folder_name.into()));
        self
    }

    /// Last path segment of the storage key
    pub fn file_name(&self) -> &str {
        file_name_from_key(&self.storage_key)
    }

    /// Declared size in whole bytes
    pub fn total_size_bytes(&self) -> Result<u64, SizeError> {
        total_size_bytes(self.declared_size, self.size_unit)
    }

    /// Name of this file's entry inside a bundle. Never climbs out of the
    /// archive root.
    pub fn entry_name(&self) -> String {
        let file = relative_path(self.file_name());
        match &self.folder_name {
            Some(folder) => format!("{}/{}", folder, file),
            None => file,
        }
    }
}

/// Last path segment of a blob-store key
pub fn file_name_from_key(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[idx + 1..],
        None => key,
    }
}

/// Folder as a relative archive path; empty folders become `None`
pub fn normalize_folder(folder: Option<String>) -> Option<String> {
    folder
        .map(|f| relative_path(f.trim()))
        .filter(|f| !f.is_empty())
}

/// Join the non-empty segments of `path`, dropping `.` and `..`
fn relative_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .collect::<Vec<_>>()
        .join("/")
}
