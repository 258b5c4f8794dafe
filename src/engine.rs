use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::Algo;
use crate::services::blobstore::{BlobStore, FsBlobStore, HttpBlobStore};
use crate::services::change_tracker::{ChangeTracker, ChangeTrackerError, ProjectChange};
use crate::services::events::{Event, EventBus};
use crate::services::metastore::{MetaStore, MetaStoreError, SqliteMetaStore};
use crate::services::sync::{PullStats, PushStats, SyncEngine, SyncError};
use crate::services::watcher::{FleetWatcher, WatcherError};
use crate::utils::config::{BlobStoreConfig, Config};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    ChangeTracker(#[from] ChangeTrackerError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

/// Owns the long-lived handles a CLI invocation (or, eventually, a daemon)
/// needs across its whole run: the durable metadata/blob store connections,
/// the event bus UI surfaces subscribe to, and the cancellation scope that
/// governs every running watcher. Created once at startup and torn down
/// explicitly by cancelling `watcher_scope` — no package-level mutable state.
pub struct Engine {
    metastore: Arc<SqliteMetaStore>,
    blobstore: Arc<dyn BlobStore>,
    events: EventBus,
    watcher_scope: CancellationToken,
    algo: Algo,
    blob_prefix: Option<String>,
}

impl Engine {
    pub async fn new(config: &Config) -> Result<Self, EngineError> {
        let metastore = Arc::new(SqliteMetaStore::connect(&config.metastore.sqlite_path).await?);

        let (blobstore, blob_prefix): (Arc<dyn BlobStore>, Option<String>) = match &config.blobstore {
            BlobStoreConfig::Fs { root, prefix } => (Arc::new(FsBlobStore::new(root.clone(), prefix.clone())), prefix.clone()),
            BlobStoreConfig::Http { base_url, prefix } => {
                let client = reqwest::Client::new();
                (Arc::new(HttpBlobStore::new(client, base_url.clone(), prefix.clone())), prefix.clone())
            }
        };

        Ok(Self {
            metastore,
            blobstore,
            events: EventBus::new(),
            watcher_scope: CancellationToken::new(),
            algo: config.algo,
            blob_prefix,
        })
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn algo(&self) -> Algo {
        self.algo
    }

    /// Cancels every running watcher. Idempotent.
    pub fn shutdown_watchers(&self) {
        self.watcher_scope.cancel();
    }

    pub async fn push(&self, project_root: &Path, project_name: &str, message: &str, user_id: Option<String>) -> Result<PushStats, EngineError> {
        let engine = SyncEngine::new(self.blobstore.clone(), self.metastore.clone(), self.blob_prefix.clone());
        let now = chrono::Utc::now().timestamp();
        let stats = engine
            .push(project_root, project_name, message, self.algo, now, user_id, CancellationToken::new())
            .await
            .map_err(EngineError::Sync)?;

        self.events.publish(Event::PushDone { project: project_name.to_string() });
        Ok(stats)
    }

    pub async fn pull(&self, project_name: &str, dest_path: &Path, commit_id: Option<uuid::Uuid>, allow_delete: bool) -> Result<PullStats, EngineError> {
        let engine = SyncEngine::new(self.blobstore.clone(), self.metastore.clone(), self.blob_prefix.clone());
        engine.pull(project_name, dest_path, commit_id, allow_delete, CancellationToken::new()).await.map_err(EngineError::Sync)
    }

    pub fn pending(&self, root: &Path) -> Result<Vec<ProjectChange>, EngineError> {
        let changes = ChangeTracker::new(root, self.algo).pending().map_err(EngineError::ChangeTracker)?;

        for change in &changes {
            self.events.publish(Event::ProjectDiff {
                project_id: change.name.clone(),
                added: change.diff.added.clone(),
                modified: change.diff.modified.clone(),
                deleted: change.diff.deleted.clone(),
            });
        }

        Ok(changes)
    }

    pub async fn watch(&self, root: &Path, watcher_config: crate::utils::config::WatcherConfig) -> Result<(), EngineError> {
        let fleet = FleetWatcher::new(root.to_path_buf(), watcher_config);
        fleet.run(self.watcher_scope.clone(), self.events.clone()).await.map_err(EngineError::Watcher)
    }

    pub async fn list_projects(&self) -> Result<Vec<crate::domain::ProjectDoc>, EngineError> {
        self.metastore.list_projects().await.map_err(EngineError::MetaStore)
    }

    pub async fn commit_history(&self, project_name: &str, limit: u32) -> Result<Vec<crate::domain::CommitMeta>, EngineError> {
        self.metastore.get_commit_history(project_name, limit).await.map_err(EngineError::MetaStore)
    }
}
