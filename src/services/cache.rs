use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::Algo;

const CACHE_DIR: &str = ".portsy";
const CACHE_FILE: &str = "cache.json";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to create cache directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("failed to write cache tempfile {0}: {1}")]
    WriteTemp(PathBuf, std::io::Error),

    #[error("failed to rename cache tempfile into place: {0}")]
    Rename(std::io::Error),

    #[error("failed to read cache file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to serialize local cache: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to archive corrupted cache file: {0}")]
    Archive(std::io::Error),
}

/// On-disk shape of `<project>/.portsy/cache.json`: the locally-known
/// manifest as of the last successful push or pull, keyed by the same
/// forward-slash, normalized paths the Scanner produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCacheFile {
    pub version: u32,
    pub algo: Algo,
    #[serde(rename = "updatedAt")]
    pub updated_at: chrono::DateTime<Utc>,
    pub manifest: BTreeMap<String, String>,
}

impl LocalCacheFile {
    pub fn empty(algo: Algo) -> Self {
        Self {
            version: CACHE_VERSION,
            algo,
            updated_at: Utc::now(),
            manifest: BTreeMap::new(),
        }
    }

    pub fn from_manifest(algo: Algo, manifest: BTreeMap<String, String>) -> Self {
        Self {
            version: CACHE_VERSION,
            algo,
            updated_at: Utc::now(),
            manifest,
        }
    }
}

pub struct LocalCache {
    project_root: PathBuf,
}

impl LocalCache {
    pub fn new<P: AsRef<Path>>(project_root: P) -> Self {
        Self {
            project_root: project_root.as_ref().to_owned(),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.project_root.join(CACHE_DIR)
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_dir().join(CACHE_FILE)
    }

    /// Loads the cache, failing open: a missing file yields an empty cache
    /// with `default_algo`; a corrupt file is archived to a sibling
    /// `cache.bad-<timestamp>.json` and also yields an empty cache.
    pub fn load(&self, default_algo: Algo) -> Result<LocalCacheFile, CacheError> {
        let path = self.cache_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(LocalCacheFile::empty(default_algo)),
            Err(err) => return Err(CacheError::Read(path, err)),
        };

        match serde_json::from_slice::<LocalCacheFile>(&raw) {
            Ok(cache) => Ok(cache),
            Err(err) => {
                log::warn!("cache at {} is corrupt ({}), archiving and starting fresh", path.display(), err);
                self.archive_corrupt(&path)?;
                Ok(LocalCacheFile::empty(default_algo))
            }
        }
    }

    fn archive_corrupt(&self, path: &Path) -> Result<(), CacheError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let archived = self.cache_dir().join(format!("cache.bad-{now}.json"));
        fs::rename(path, archived).map_err(CacheError::Archive)
    }

    /// Atomically replaces the cache file: write to `cache.json.tmp`, fsync
    /// it, rename over the target, then fsync the directory so the rename
    /// itself is durable. A reader never observes a half-written cache.
    pub fn save(&self, cache: &LocalCacheFile) -> Result<(), CacheError> {
        let dir = self.cache_dir();
        fs::create_dir_all(&dir).map_err(|err| CacheError::CreateDir(dir.clone(), err))?;

        let payload = serde_json::to_vec_pretty(cache)?;
        let tmp_path = dir.join("cache.json.tmp");

        {
            let mut tmp = File::create(&tmp_path).map_err(|err| CacheError::WriteTemp(tmp_path.clone(), err))?;
            tmp.write_all(&payload).map_err(|err| CacheError::WriteTemp(tmp_path.clone(), err))?;
            tmp.sync_all().map_err(|err| CacheError::WriteTemp(tmp_path.clone(), err))?;
        }

        fs::rename(&tmp_path, self.cache_path()).map_err(CacheError::Rename)?;

        if let Ok(dir_handle) = File::open(&dir) {
            let _ = dir_handle.sync_all();
        }

        Ok(())
    }
}
