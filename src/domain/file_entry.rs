use serde::{Deserialize, Serialize};

/// One tracked file inside a `ProjectState`.
///
/// `path` is always relative to the project root, forward-slashed, and
/// lowercased when the state was built on a case-insensitive filesystem.
/// `modified` is informational only — it is never used to decide equality,
/// `hash` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, hash: impl Into<String>, size: u64, modified: i64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            size,
            modified,
            blob_key: None,
        }
    }

    pub fn with_blob_key(mut self, blob_key: impl Into<String>) -> Self {
        self.blob_key = Some(blob_key.into());
        self
    }
}
