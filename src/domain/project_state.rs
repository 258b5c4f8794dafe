use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Algo, FileEntry, ValidationError};

/// A fully-scanned snapshot of a project. Immutable once finalized into a
/// commit — a new edit always produces a brand new `ProjectState`, never a
/// mutation of an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_name: String,
    pub project_path: PathBuf,
    pub algo: Algo,
    pub files: Vec<FileEntry>,
    pub created_at: i64,
}

impl ProjectState {
    pub fn new(project_name: impl Into<String>, project_path: PathBuf, algo: Algo, mut files: Vec<FileEntry>, created_at: i64) -> Result<Self, ValidationError> {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let state = Self {
            project_name: project_name.into(),
            project_path,
            algo,
            files,
            created_at,
        };
        state.validate()?;
        Ok(state)
    }

    /// Re-checks `ProjectState`'s invariants: unique,
    /// sorted, traversal-free, `.portsy/`-free paths.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut previous: Option<&str> = None;

        for entry in &self.files {
            if entry.path.is_empty() {
                return Err(ValidationError::EmptyPath(entry.path.clone()));
            }

            if entry.path.split('/').any(|segment| segment == "..") {
                return Err(ValidationError::PathTraversal(entry.path.clone()));
            }

            if entry.path.starts_with(".portsy/") || entry.path == ".portsy" {
                return Err(ValidationError::ReservedDirectory(entry.path.clone()));
            }

            if let Some(prev) = previous {
                if prev == entry.path {
                    return Err(ValidationError::DuplicatePath(entry.path.clone()));
                }
                if prev > entry.path.as_str() {
                    return Err(ValidationError::NotSorted(entry.path.clone(), prev.to_string()));
                }
            }

            previous = Some(&entry.path);
        }

        Ok(())
    }

    pub fn manifest(&self) -> std::collections::BTreeMap<String, String> {
        self.files.iter().map(|f| (f.path.clone(), f.hash.clone())).collect()
    }

    pub fn by_path(&self) -> std::collections::HashMap<&str, &FileEntry> {
        self.files.iter().map(|f| (f.path.as_str(), f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> FileEntry {
        FileEntry::new(path, "deadbeef", 10, 0)
    }

    #[test]
    fn empty_state_is_valid() {
        let state = ProjectState::new("proj", PathBuf::from("."), Algo::Sha256, vec![], 0).unwrap();
        assert!(state.files.is_empty());
    }

    #[test]
    fn sorts_on_construction() {
        let state = ProjectState::new("proj", PathBuf::from("."), Algo::Sha256, vec![entry("b.txt"), entry("a.txt")], 0).unwrap();
        assert_eq!(state.files[0].path, "a.txt");
        assert_eq!(state.files[1].path, "b.txt");
    }

    #[test]
    fn rejects_duplicate_paths() {
        let err = ProjectState::new("proj", PathBuf::from("."), Algo::Sha256, vec![entry("a.txt"), entry("a.txt")], 0).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicatePath(_)));
    }

    #[test]
    fn rejects_path_traversal() {
        let err = ProjectState::new("proj", PathBuf::from("."), Algo::Sha256, vec![entry("../escape.txt")], 0).unwrap_err();
        assert!(matches!(err, ValidationError::PathTraversal(_)));
    }

    #[test]
    fn rejects_portsy_directory() {
        let err = ProjectState::new("proj", PathBuf::from("."), Algo::Sha256, vec![entry(".portsy/cache.json")], 0).unwrap_err();
        assert!(matches!(err, ValidationError::ReservedDirectory(_)));
    }
}
