use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::domain::{Algo, FileEntry, ProjectState, ValidationError};
use crate::utils::paths::{is_ignored_dir, is_ignored_file, normalize_relative_path};

use super::hasher::{hash_file, HashError};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),

    #[error("root directory is inaccessible: {path}: {source}")]
    RootDirAccessError { path: String, source: std::io::Error },

    #[error(transparent)]
    ValidationError(#[from] ValidationError),
}

pub struct Scanner {
    project_root: PathBuf,
    case_insensitive: bool,
}

impl Scanner {
    pub fn new<P: AsRef<Path>>(project_root: P) -> Self {
        Self {
            project_root: project_root.as_ref().to_owned(),
            case_insensitive: crate::utils::paths::host_is_case_insensitive(),
        }
    }

    /// Walks `project_root` depth-first and emits a sorted, normalized
    /// `ProjectState`. Per-file errors (permission denied mid-walk, a file
    /// vanishing between readdir and stat) are skipped and logged; only an
    /// unreadable root aborts the whole scan.
    pub fn scan(&self, project_name: &str, algo: Algo, created_at: i64) -> Result<ScanResult, ScanError> {
        std::fs::read_dir(&self.project_root).map_err(|source| ScanError::RootDirAccessError {
            path: self.project_root.display().to_string(),
            source,
        })?;

        let mut files = Vec::new();
        let mut errors = Vec::new();

        let walker = WalkDir::new(&self.project_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                if entry.file_type().is_dir() {
                    !is_ignored_dir(&name)
                } else {
                    true
                }
            });

        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("walk error while scanning {}: {}", self.project_root.display(), err);
                    errors.push(ScanError::WalkdirError(err));
                    continue;
                }
            };

            let path = entry.path();

            // Symlinked files and directories are skipped to avoid cycles and
            // because a tracked file must own its bytes, not borrow them.
            if entry.path_is_symlink() {
                log::debug!("skipping symlink {}", path.display());
                continue;
            }

            if entry.file_type().is_dir() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if is_ignored_file(&file_name) {
                continue;
            }

            let relative = match path.strip_prefix(&self.project_root) {
                Ok(rel) => rel,
                Err(_) => {
                    log::warn!("skipping {} — not under project root", path.display());
                    continue;
                }
            };

            let normalized = normalize_relative_path(relative, self.case_insensitive);

            match hash_file(path, algo) {
                Ok(hashed) => files.push(FileEntry::new(normalized, hashed.hash_hex, hashed.size, hashed.modified)),
                Err(HashError::InvalidTarget(_)) => continue,
                Err(err) => {
                    log::warn!("skipping {}: {}", path.display(), err);
                    continue;
                }
            }
        }

        let state = ProjectState::new(project_name, self.project_root.clone(), algo, files, created_at)?;

        Ok(ScanResult { state, errors })
    }
}

#[derive(Debug)]
pub struct ScanResult {
    pub state: ProjectState,
    pub errors: Vec<ScanError>,
}
