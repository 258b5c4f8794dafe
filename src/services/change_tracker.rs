use std::path::{Path, PathBuf};

use crate::domain::Algo;

use super::cache::{CacheError, LocalCache};
use super::diff::{diff_manifests, ManifestDiff};
use super::scanner::{ScanError, Scanner};

#[derive(Debug, thiserror::Error)]
pub enum ChangeTrackerError {
    #[error("failed to read projects root {0}: {1}")]
    RootAccess(PathBuf, std::io::Error),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone)]
pub struct ProjectChange {
    pub name: String,
    pub path: PathBuf,
    pub diff: ManifestDiff,
    pub total: usize,
}

/// Iterates immediate subdirectories of `root` as candidate projects,
/// scans each one, diffs it against its `LocalCache`, and returns a
/// deterministic, sorted-by-name list. Projects with no changes are
/// omitted entirely.
pub struct ChangeTracker {
    root: PathBuf,
    algo: Algo,
}

impl ChangeTracker {
    pub fn new<P: AsRef<Path>>(root: P, algo: Algo) -> Self {
        Self { root: root.as_ref().to_owned(), algo }
    }

    pub fn pending(&self) -> Result<Vec<ProjectChange>, ChangeTrackerError> {
        let entries = std::fs::read_dir(&self.root).map_err(|err| ChangeTrackerError::RootAccess(self.root.clone(), err))?;

        let mut project_dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        project_dirs.sort();

        let mut changes = Vec::new();

        for project_dir in project_dirs {
            let Some(name) = project_dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };

            let scanner = Scanner::new(&project_dir);
            let scan = match scanner.scan(&name, self.algo, 0) {
                Ok(scan) => scan,
                Err(err) => {
                    log::warn!("skipping {} in change tracker: {}", project_dir.display(), err);
                    continue;
                }
            };

            if scan.state.files.is_empty() {
                continue;
            }

            let cache = LocalCache::new(&project_dir);
            let cached = cache.load(self.algo)?;
            let current_manifest = scan.state.manifest();

            let diff = diff_manifests(&cached.manifest, &current_manifest);
            if diff.is_empty() {
                continue;
            }

            let total = diff.added.len() + diff.modified.len() + diff.deleted.len();
            changes.push(ProjectChange { name, path: project_dir, diff, total });
        }

        changes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reports_no_changes_for_fresh_projects_without_cache() {
        let root = tempfile::tempdir().unwrap();
        let proj = root.path().join("proj-a");
        fs::create_dir(&proj).unwrap();
        fs::write(proj.join("track.als"), b"data").unwrap();

        let tracker = ChangeTracker::new(root.path(), Algo::Sha256);
        let changes = tracker.pending().unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "proj-a");
        assert_eq!(changes[0].diff.added.len(), 1);
    }

    #[test]
    fn omits_projects_with_no_drift_from_cache() {
        let root = tempfile::tempdir().unwrap();
        let proj = root.path().join("proj-a");
        fs::create_dir(&proj).unwrap();
        fs::write(proj.join("track.als"), b"data").unwrap();

        let scanner = Scanner::new(&proj);
        let scan = scanner.scan("proj-a", Algo::Sha256, 0).unwrap();
        let cache = LocalCache::new(&proj);
        cache.save(&super::super::cache::LocalCacheFile::from_manifest(Algo::Sha256, scan.state.manifest())).unwrap();

        let tracker = ChangeTracker::new(root.path(), Algo::Sha256);
        let changes = tracker.pending().unwrap();

        assert!(changes.is_empty());
    }

    #[test]
    fn results_are_sorted_by_project_name() {
        let root = tempfile::tempdir().unwrap();
        for name in ["zebra", "alpha", "mid"] {
            let proj = root.path().join(name);
            fs::create_dir(&proj).unwrap();
            fs::write(proj.join("track.als"), b"data").unwrap();
        }

        let tracker = ChangeTracker::new(root.path(), Algo::Sha256);
        let changes = tracker.pending().unwrap();

        let names: Vec<&str> = changes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zebra"]);
    }
}
