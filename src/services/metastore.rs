use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// A boxed async blob-existence check, passed into `finalize_commit`.
/// Boxed rather than generic so `MetaStore` stays object-safe (callers hold
/// it as `Arc<dyn MetaStore>`).
pub type VerifyFn<'a> = Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> + Send + Sync + 'a>;

use crate::domain::{Algo, CommitMeta, CommitStatus, FileEntry, ProjectDoc, ProjectState, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("blob missing for hash {0}, finalize aborted")]
    BlobMissing(String),

    #[error("no such project: {0}")]
    NoSuchProject(String),

    #[error("no such commit {commit_id} for project {project}")]
    NoSuchCommit { project: String, commit_id: Uuid },

    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn upsert_latest_state(&self, project_name: &str, state: &ProjectState, commit: &CommitMeta) -> Result<(), MetaStoreError>;

    async fn begin_commit(&self, project_name: &str, commit: &CommitMeta, state: &ProjectState) -> Result<(), MetaStoreError>;

    async fn finalize_commit<'a>(
        &'a self,
        project_name: &'a str,
        commit: &'a CommitMeta,
        state: &'a ProjectState,
        verify: VerifyFn<'a>,
    ) -> Result<(), MetaStoreError>;

    async fn get_latest_state(&self, project_name: &str) -> Result<Option<(ProjectState, CommitMeta)>, MetaStoreError>;

    async fn get_state_by_commit(&self, project_name: &str, commit_id: Uuid) -> Result<(ProjectState, CommitMeta), MetaStoreError>;

    async fn list_projects(&self) -> Result<Vec<ProjectDoc>, MetaStoreError>;

    async fn get_commit_history(&self, project_name: &str, limit: u32) -> Result<Vec<CommitMeta>, MetaStoreError>;
}

pub struct SqliteMetaStore {
    pool: SqlitePool,
}

impl SqliteMetaStore {
    pub async fn connect(sqlite_path: &std::path::Path) -> Result<Self, MetaStoreError> {
        let url = format!("sqlite://{}?mode=rwc", sqlite_path.display());
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_project_doc(&self, project_name: &str) -> Result<Option<ProjectDoc>, MetaStoreError> {
        load_project_doc_with(&self.pool, project_name).await
    }

    async fn write_state_row(&self, executor: &mut sqlx::SqliteConnection, project_name: &str, commit_id: Uuid, state: &ProjectState) -> Result<(), MetaStoreError> {
        let files_json = serde_json::to_string(&state.files).map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;
        sqlx::query(
            "INSERT OR REPLACE INTO states (project_name, commit_id, project_path, algo, created_at, files_json) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(project_name)
        .bind(commit_id.to_string())
        .bind(state.project_path.to_string_lossy().to_string())
        .bind(state.algo.as_str())
        .bind(state.created_at)
        .bind(files_json)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn write_commit_row(&self, executor: &mut sqlx::SqliteConnection, project_name: &str, commit: &CommitMeta) -> Result<(), MetaStoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO commits (project_name, commit_id, message, timestamp, user_id, parent_id, status) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project_name)
        .bind(commit.id.to_string())
        .bind(&commit.message)
        .bind(commit.timestamp)
        .bind(&commit.user_id)
        .bind(commit.parent_id.map(|id| id.to_string()))
        .bind(commit.status.as_str())
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MetaStore for SqliteMetaStore {
    /// Non-transactional one-phase write, retained for legacy single-writer
    /// pushes — writes commit, state, and merges HEAD without
    /// the two-phase BeginCommit/FinalizeCommit dance.
    async fn upsert_latest_state(&self, project_name: &str, state: &ProjectState, commit: &CommitMeta) -> Result<(), MetaStoreError> {
        let mut tx = self.pool.begin().await?;

        self.write_commit_row(&mut tx, project_name, &commit.clone().finalized()).await?;
        self.write_state_row(&mut tx, project_name, commit.id, state).await?;

        let mut doc = load_project_doc_with(&mut *tx, project_name).await?.unwrap_or_else(|| ProjectDoc::empty(project_name));
        doc.advance(commit.id, commit.timestamp);
        write_project_doc_row(&mut tx, &doc).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn begin_commit(&self, project_name: &str, commit: &CommitMeta, state: &ProjectState) -> Result<(), MetaStoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO projects (name, last5) VALUES (?, '[]')")
            .bind(project_name)
            .execute(&mut *tx)
            .await?;

        self.write_commit_row(&mut tx, project_name, commit).await?;
        self.write_state_row(&mut tx, project_name, commit.id, state).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_commit<'a>(
        &'a self,
        project_name: &'a str,
        commit: &'a CommitMeta,
        state: &'a ProjectState,
        verify: VerifyFn<'a>,
    ) -> Result<(), MetaStoreError> {
        // Step 1: verify every blob exists, outside any transaction.
        for entry in &state.files {
            if !verify(entry.hash.clone()).await {
                return Err(MetaStoreError::BlobMissing(entry.hash.clone()));
            }
        }

        // Step 2: the transactional boundary. Finalize is idempotent — a
        // retry with the same (commit.id, state) after a crash re-applies
        // the same HEAD advance via INSERT OR REPLACE / re-push-and-trim.
        let mut tx = self.pool.begin().await?;

        let finalized = commit.clone().finalized();
        self.write_commit_row(&mut tx, project_name, &finalized).await?;
        self.write_state_row(&mut tx, project_name, commit.id, state).await?;

        let mut doc = load_project_doc_with(&mut *tx, project_name).await?.unwrap_or_else(|| ProjectDoc::empty(project_name));
        if doc.last_commit_id != Some(commit.id) {
            doc.advance(commit.id, commit.timestamp);
        }
        write_project_doc_row(&mut tx, &doc).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_latest_state(&self, project_name: &str) -> Result<Option<(ProjectState, CommitMeta)>, MetaStoreError> {
        let Some(doc) = self.load_project_doc(project_name).await? else { return Ok(None) };
        let Some(commit_id) = doc.last_commit_id else { return Ok(None) };
        self.get_state_by_commit(project_name, commit_id).await.map(Some)
    }

    async fn get_state_by_commit(&self, project_name: &str, commit_id: Uuid) -> Result<(ProjectState, CommitMeta), MetaStoreError> {
        let commit_row = sqlx::query("SELECT message, timestamp, user_id, parent_id, status FROM commits WHERE project_name = ? AND commit_id = ?")
            .bind(project_name)
            .bind(commit_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetaStoreError::NoSuchCommit { project: project_name.to_string(), commit_id })?;

        let commit = row_to_commit_meta(commit_id, commit_row)?;

        let state_row = sqlx::query("SELECT project_path, algo, created_at, files_json FROM states WHERE project_name = ? AND commit_id = ?")
            .bind(project_name)
            .bind(commit_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetaStoreError::NoSuchCommit { project: project_name.to_string(), commit_id })?;

        let state = row_to_project_state(project_name, state_row)?;
        Ok((state, commit))
    }

    async fn list_projects(&self) -> Result<Vec<ProjectDoc>, MetaStoreError> {
        let rows = sqlx::query("SELECT name, last_commit_id, last_commit_at, last5 FROM projects").fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_project_doc).collect()
    }

    async fn get_commit_history(&self, project_name: &str, limit: u32) -> Result<Vec<CommitMeta>, MetaStoreError> {
        let rows = sqlx::query(
            "SELECT commit_id, message, timestamp, user_id, parent_id, status FROM commits WHERE project_name = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(project_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let commit_id = Uuid::from_str(row.try_get::<String, _>("commit_id")?.as_str()).map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;
                row_to_commit_meta(commit_id, row)
            })
            .collect()
    }
}

async fn load_project_doc_with<'e, E>(executor: E, project_name: &str) -> Result<Option<ProjectDoc>, MetaStoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query("SELECT name, last_commit_id, last_commit_at, last5 FROM projects WHERE name = ?")
        .bind(project_name)
        .fetch_optional(executor)
        .await?;

    let Some(row) = row else { return Ok(None) };
    row_to_project_doc(row).map(Some)
}

async fn write_project_doc_row(executor: &mut sqlx::SqliteConnection, doc: &ProjectDoc) -> Result<(), MetaStoreError> {
    let last5_json = serde_json::to_string(&doc.last5.iter().collect::<Vec<_>>()).map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;
    sqlx::query("INSERT OR REPLACE INTO projects (name, last_commit_id, last_commit_at, last5) VALUES (?, ?, ?, ?)")
        .bind(&doc.name)
        .bind(doc.last_commit_id.map(|id| id.to_string()))
        .bind(doc.last_commit_at)
        .bind(last5_json)
        .execute(executor)
        .await?;
    Ok(())
}

fn row_to_project_doc(row: sqlx::sqlite::SqliteRow) -> Result<ProjectDoc, MetaStoreError> {
    let name: String = row.try_get("name")?;
    let last_commit_id: Option<String> = row.try_get("last_commit_id")?;
    let last_commit_at: Option<i64> = row.try_get("last_commit_at")?;
    let last5_json: String = row.try_get("last5")?;

    let last5_ids: Vec<Uuid> = serde_json::from_str(&last5_json).map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;

    Ok(ProjectDoc {
        name,
        last_commit_id: last_commit_id.map(|id| Uuid::from_str(&id)).transpose().map_err(|err| MetaStoreError::Corrupt(err.to_string()))?,
        last_commit_at,
        last5: VecDeque::from(last5_ids),
    })
}

fn row_to_commit_meta(id: Uuid, row: sqlx::sqlite::SqliteRow) -> Result<CommitMeta, MetaStoreError> {
    let message: String = row.try_get("message")?;
    let timestamp: i64 = row.try_get("timestamp")?;
    let user_id: Option<String> = row.try_get("user_id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let status: String = row.try_get("status")?;

    Ok(CommitMeta {
        id,
        message,
        timestamp,
        user_id,
        parent_id: parent_id.map(|p| Uuid::from_str(&p)).transpose().map_err(|err| MetaStoreError::Corrupt(err.to_string()))?,
        status: CommitStatus::from_str(&status).map_err(MetaStoreError::Corrupt)?,
    })
}

fn row_to_project_state(project_name: &str, row: sqlx::sqlite::SqliteRow) -> Result<ProjectState, MetaStoreError> {
    let project_path: String = row.try_get("project_path")?;
    let algo: String = row.try_get("algo")?;
    let created_at: i64 = row.try_get("created_at")?;
    let files_json: String = row.try_get("files_json")?;

    let files: Vec<FileEntry> = serde_json::from_str(&files_json).map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;
    let algo = Algo::from_str(&algo).map_err(|err| MetaStoreError::Corrupt(err.to_string()))?;

    Ok(ProjectState::new(project_name, PathBuf::from(project_path), algo, files, created_at)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileEntry;

    async fn test_store() -> SqliteMetaStore {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteMetaStore::from_pool(pool)
    }

    fn sample_state(project: &str, files: Vec<FileEntry>) -> ProjectState {
        ProjectState::new(project, PathBuf::from("/tmp/x"), Algo::Sha256, files, 0).unwrap()
    }

    fn always(result: bool) -> VerifyFn<'static> {
        Box::new(move |_| Box::pin(async move { result }))
    }

    #[tokio::test]
    async fn begin_then_finalize_advances_head() {
        let store = test_store().await;
        let commit = CommitMeta::new("first", 100, None, None);
        let state = sample_state("proj", vec![FileEntry::new("a.als", "h1", 1, 0)]);

        store.begin_commit("proj", &commit, &state).await.unwrap();
        assert!(store.get_latest_state("proj").await.unwrap().is_none());

        store.finalize_commit("proj", &commit, &state, always(true)).await.unwrap();

        let (fetched_state, fetched_commit) = store.get_latest_state("proj").await.unwrap().unwrap();
        assert_eq!(fetched_commit.id, commit.id);
        assert_eq!(fetched_state.files.len(), 1);
    }

    #[tokio::test]
    async fn finalize_aborts_when_blob_missing() {
        let store = test_store().await;
        let commit = CommitMeta::new("first", 100, None, None);
        let state = sample_state("proj", vec![FileEntry::new("a.als", "h1", 1, 0)]);

        store.begin_commit("proj", &commit, &state).await.unwrap();
        let err = store.finalize_commit("proj", &commit, &state, always(false)).await.unwrap_err();

        assert!(matches!(err, MetaStoreError::BlobMissing(_)));
        assert!(store.get_latest_state("proj").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_is_idempotent_on_retry() {
        let store = test_store().await;
        let commit = CommitMeta::new("first", 100, None, None);
        let state = sample_state("proj", vec![FileEntry::new("a.als", "h1", 1, 0)]);

        store.begin_commit("proj", &commit, &state).await.unwrap();
        store.finalize_commit("proj", &commit, &state, always(true)).await.unwrap();
        store.finalize_commit("proj", &commit, &state, always(true)).await.unwrap();

        let (_, fetched_commit) = store.get_latest_state("proj").await.unwrap().unwrap();
        assert_eq!(fetched_commit.id, commit.id);
    }

    #[tokio::test]
    async fn commit_history_is_most_recent_first() {
        let store = test_store().await;

        for i in 0..3 {
            let commit = CommitMeta::new(format!("commit {i}"), i, None, None);
            let state = sample_state("proj", vec![]);
            store.begin_commit("proj", &commit, &state).await.unwrap();
            store.finalize_commit("proj", &commit, &state, always(true)).await.unwrap();
        }

        let history = store.get_commit_history("proj", 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].timestamp >= history[1].timestamp);
        assert!(history[1].timestamp >= history[2].timestamp);
    }
}
