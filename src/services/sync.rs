use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::domain::{Algo, CommitMeta, FileEntry, ProjectState};

use super::blobstore::{build_key, BlobStore, BlobStoreError};
use super::cache::{CacheError, LocalCache, LocalCacheFile};
use super::metastore::{MetaStore, MetaStoreError};
use super::scanner::{ScanError, Scanner};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),

    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),

    #[error("no state found for project {0}")]
    NoSuchState(String),

    #[error("hash verify failed for {path} after download")]
    VerifyFailed { path: String },

    #[error("operation cancelled")]
    Cancelled,
}

/// Default worker pool width for uploads/migrations/downloads:
/// `max(2, NumCPU/2)`.
fn default_worker_count() -> usize {
    std::cmp::max(2, num_cpus_estimate() / 2)
}

fn num_cpus_estimate() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[derive(Debug, Default)]
pub struct PushStats {
    pub uploaded: usize,
    pub migrated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Default)]
pub struct PullStats {
    pub to_download: usize,
    pub downloaded: usize,
    pub verified: usize,
    pub skipped: usize,
    pub deleted: usize,
}

enum FileAction {
    Skip,
    Upload,
    Migrate { from_key: String },
}

pub struct SyncEngine<B: BlobStore, M: MetaStore> {
    blobstore: Arc<B>,
    metastore: Arc<M>,
    blob_prefix: Option<String>,
}

impl<B: BlobStore, M: MetaStore> SyncEngine<B, M> {
    pub fn new(blobstore: Arc<B>, metastore: Arc<M>, blob_prefix: Option<String>) -> Self {
        Self { blobstore, metastore, blob_prefix }
    }

    fn key_for(&self, project_name: &str, hash_hex: &str) -> String {
        build_key(self.blob_prefix.as_deref(), project_name, hash_hex)
    }

    /// HEAD does not advance until `FinalizeCommit` completes; cancelling
    /// before that point leaves HEAD untouched and any already-uploaded
    /// blobs intact for a later retry.
    pub async fn push(
        &self,
        project_root: &Path,
        project_name: &str,
        message: &str,
        algo: Algo,
        created_at: i64,
        user_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<PushStats, SyncError> {
        let scanner = Scanner::new(project_root);
        let scan = scanner.scan(project_name, algo, created_at)?;
        let mut current = scan.state;

        let prev = self.metastore.get_latest_state(project_name).await?;
        let prev_by_path: std::collections::HashMap<&str, &FileEntry> = prev
            .as_ref()
            .map(|(state, _)| state.by_path())
            .unwrap_or_default();

        let mut stats = PushStats::default();
        let mut actions: Vec<(usize, FileAction)> = Vec::new();

        for (i, entry) in current.files.iter().enumerate() {
            let desired_key = self.key_for(project_name, &entry.hash);
            let action = match prev_by_path.get(entry.path.as_str()) {
                None => FileAction::Upload,
                Some(prev_entry) if prev_entry.hash != entry.hash => FileAction::Upload,
                Some(prev_entry) => {
                    let carried_key = prev_entry.blob_key.clone().unwrap_or_else(|| self.key_for(project_name, &prev_entry.hash));
                    if carried_key == desired_key {
                        FileAction::Skip
                    } else {
                        FileAction::Migrate { from_key: carried_key }
                    }
                }
            };
            actions.push((i, action));
        }

        let semaphore = Arc::new(Semaphore::new(default_worker_count()));
        let mut tasks = tokio::task::JoinSet::new();

        for (i, action) in actions {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let entry = current.files[i].clone();
            let desired_key = self.key_for(project_name, &entry.hash);
            let local_path = project_root.join(&entry.path);
            let blobstore = self.blobstore.clone();
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");

            match action {
                FileAction::Skip => {
                    stats.unchanged += 1;
                    current.files[i].blob_key = Some(desired_key);
                    continue;
                }
                FileAction::Upload => {
                    stats.uploaded += 1;
                    tasks.spawn(async move {
                        let _permit = permit;
                        blobstore.upload_if_missing(&local_path, &desired_key).await.map(|_| i)
                    });
                }
                FileAction::Migrate { from_key } => {
                    stats.migrated += 1;
                    tasks.spawn(async move {
                        let _permit = permit;
                        blobstore.copy_if_missing(&from_key, &desired_key).await.map(|_| i)
                    });
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            let index = result.map_err(|err| SyncError::BlobStore(BlobStoreError::Io { key: String::new(), source: std::io::Error::other(err) }))??;
            let hash = current.files[index].hash.clone();
            current.files[index].blob_key = Some(self.key_for(project_name, &hash));
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let commit = CommitMeta::new(message, created_at, user_id, prev.as_ref().map(|(_, c)| c.id));
        self.metastore.begin_commit(project_name, &commit, &current).await?;

        let blobstore = self.blobstore.clone();
        let project_name_owned = project_name.to_string();
        let prefix = self.blob_prefix.clone();
        let verify: super::metastore::VerifyFn<'static> = Box::new(move |hash| {
            let blobstore = blobstore.clone();
            let key = build_key(prefix.as_deref(), &project_name_owned, &hash);
            Box::pin(async move { blobstore.exists(&key).await.unwrap_or(false) })
        });

        self.metastore.finalize_commit(project_name, &commit, &current, verify).await?;

        let cache = LocalCache::new(project_root);
        cache.save(&LocalCacheFile::from_manifest(algo, current.manifest()))?;

        Ok(stats)
    }

    /// Cancelling stops in-flight downloads and leaves the destination
    /// consistent: no `.part` files remain and no `LocalCache` rewrite
    /// occurs for a cancelled pull.
    pub async fn pull(
        &self,
        project_name: &str,
        dest_path: &Path,
        commit_id: Option<uuid::Uuid>,
        allow_delete: bool,
        cancel: CancellationToken,
    ) -> Result<PullStats, SyncError> {
        let (target, _commit) = match commit_id {
            Some(id) => self.metastore.get_state_by_commit(project_name, id).await?,
            None => self.metastore.get_latest_state(project_name).await?.ok_or_else(|| SyncError::NoSuchState(project_name.to_string()))?,
        };

        tokio::fs::create_dir_all(dest_path).await.map_err(|source| BlobStoreError::Io { key: dest_path.display().to_string(), source })?;

        let mut stats = PullStats { to_download: target.files.len(), ..Default::default() };
        let semaphore = Arc::new(Semaphore::new(default_worker_count()));
        let mut tasks = tokio::task::JoinSet::new();

        for entry in target.files.clone() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let local_path = dest_path.join(&entry.path);
            let algo = target.algo;
            let blobstore = self.blobstore.clone();
            let project_name_owned = project_name.to_string();
            let prefix = self.blob_prefix.clone();
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");

            tasks.spawn(async move {
                let _permit = permit;

                if let Some(parent) = local_path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|source| BlobStoreError::Io { key: entry.path.clone(), source })?;
                }

                let needs_download = match tokio::fs::metadata(&local_path).await {
                    Err(_) => true,
                    Ok(metadata) if !metadata.is_file() => true,
                    Ok(_) => match super::hasher::hash_file(&local_path, algo) {
                        Ok(hashed) => hashed.hash_hex != entry.hash,
                        Err(_) => true,
                    },
                };

                if !needs_download {
                    return Ok::<_, SyncError>((entry.path.clone(), false));
                }

                let key = entry.blob_key.clone().unwrap_or_else(|| build_key(prefix.as_deref(), &project_name_owned, &entry.hash));
                blobstore.download_to(&key, &local_path).await?;

                let rehashed = super::hasher::hash_file(&local_path, algo).map_err(|err| BlobStoreError::Io { key: entry.path.clone(), source: std::io::Error::other(err) })?;
                if rehashed.hash_hex != entry.hash {
                    return Err(SyncError::VerifyFailed { path: entry.path.clone() });
                }

                Ok((entry.path.clone(), true))
            });
        }

        while let Some(result) = tasks.join_next().await {
            let (_, downloaded) = result.map_err(|err| SyncError::BlobStore(BlobStoreError::Io { key: String::new(), source: std::io::Error::other(err) }))??;
            if downloaded {
                stats.downloaded += 1;
            } else {
                stats.skipped += 1;
            }
            stats.verified += 1;
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if allow_delete {
            stats.deleted = prune_untracked(dest_path, &target).await?;
        }

        let cache = LocalCache::new(dest_path);
        cache.save(&LocalCacheFile::from_manifest(target.algo, target.manifest()))?;

        Ok(stats)
    }
}

/// Removes every regular file under `dest_path` that isn't in `target` and
/// isn't under `.portsy/`.
async fn prune_untracked(dest_path: &Path, target: &ProjectState) -> Result<usize, SyncError> {
    let tracked: std::collections::HashSet<PathBuf> = target.files.iter().map(|f| dest_path.join(&f.path)).collect();
    let mut removed = 0;

    for entry in walkdir::WalkDir::new(dest_path).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.starts_with(dest_path.join(".portsy")) {
            continue;
        }
        if !tracked.contains(path) {
            if std::fs::remove_file(path).is_ok() {
                removed += 1;
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blobstore::FsBlobStore;
    use crate::services::metastore::SqliteMetaStore;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::fs;

    async fn test_engine() -> (SyncEngine<FsBlobStore, SqliteMetaStore>, tempfile::TempDir) {
        let blob_root = tempfile::tempdir().unwrap();
        let blobstore = Arc::new(FsBlobStore::new(blob_root.path().to_path_buf(), None));

        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let metastore = Arc::new(SqliteMetaStore::from_pool(pool));

        (SyncEngine::new(blobstore, metastore, None), blob_root)
    }

    #[tokio::test]
    async fn first_push_uploads_every_file() {
        let (engine, _blob_root) = test_engine().await;
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("track.als"), b"session").unwrap();
        fs::create_dir(project.path().join("Samples")).unwrap();
        fs::write(project.path().join("Samples/kick.wav"), b"kick-bytes").unwrap();

        let stats = engine
            .push(project.path(), "proj", "init", Algo::Sha256, 0, None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.uploaded, 2);
        assert_eq!(stats.unchanged, 0);
        assert!(project.path().join(".portsy/cache.json").exists());
    }

    #[tokio::test]
    async fn second_push_with_no_changes_uploads_nothing() {
        let (engine, _blob_root) = test_engine().await;
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("track.als"), b"session").unwrap();

        engine.push(project.path(), "proj", "init", Algo::Sha256, 0, None, CancellationToken::new()).await.unwrap();
        let stats = engine.push(project.path(), "proj", "again", Algo::Sha256, 1, None, CancellationToken::new()).await.unwrap();

        assert_eq!(stats.uploaded, 0);
        assert_eq!(stats.unchanged, 1);
    }

    #[tokio::test]
    async fn push_then_pull_round_trips_bytes() {
        let (engine, _blob_root) = test_engine().await;
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("track.als"), b"session-bytes").unwrap();
        fs::create_dir(project.path().join("Samples")).unwrap();
        fs::write(project.path().join("Samples/kick.wav"), b"kick-bytes").unwrap();

        engine.push(project.path(), "proj", "init", Algo::Sha256, 0, None, CancellationToken::new()).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        let stats = engine.pull("proj", dest.path(), None, false, CancellationToken::new()).await.unwrap();

        assert_eq!(stats.downloaded, 2);
        assert_eq!(fs::read(dest.path().join("track.als")).unwrap(), b"session-bytes");
        assert_eq!(fs::read(dest.path().join("Samples/kick.wav")).unwrap(), b"kick-bytes");
    }

    #[tokio::test]
    async fn pull_with_allow_delete_prunes_untracked_files() {
        let (engine, _blob_root) = test_engine().await;
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("track.als"), b"session").unwrap();
        engine.push(project.path(), "proj", "init", Algo::Sha256, 0, None, CancellationToken::new()).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("stray.wav"), b"leftover").unwrap();

        let stats = engine.pull("proj", dest.path(), None, true, CancellationToken::new()).await.unwrap();

        assert_eq!(stats.deleted, 1);
        assert!(!dest.path().join("stray.wav").exists());
    }

    #[tokio::test]
    async fn pull_without_prior_push_fails_with_no_such_state() {
        let (engine, _blob_root) = test_engine().await;
        let dest = tempfile::tempdir().unwrap();
        let err = engine.pull("ghost", dest.path(), None, false, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::NoSuchState(_)));
    }
}
