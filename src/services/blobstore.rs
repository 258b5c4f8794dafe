use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("I/O error on blob {key}: {source}")]
    Io { key: String, source: std::io::Error },

    #[error("source file {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("http blobstore request failed for {key}: {source}")]
    Http { key: String, source: reqwest::Error },

    #[error("http blobstore returned unexpected status {status} for {key}")]
    UnexpectedStatus { key: String, status: u16 },
}

/// Builds the content-addressed key for a blob: `<prefix?>/<project>/blobs/<hashHex>`
/// Projects are namespaced so identical content in two
/// projects never collides unless the project names themselves do.
pub fn build_key(prefix: Option<&str>, project_name: &str, hash_hex: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{project_name}/blobs/{hash_hex}"),
        _ => format!("{project_name}/blobs/{hash_hex}"),
    }
}

/// Appends `.part` to the full file name rather than replacing its
/// extension, so e.g. `Samples/kick.wav` and `Samples/kick.aif` never
/// resolve to the same tmp path during a concurrent download.
fn tmp_path_for(local_path: &Path) -> PathBuf {
    let mut name = local_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    local_path.with_file_name(name)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError>;

    /// Uploads `local_path` to `key` if no blob is stored there yet. MUST be
    /// idempotent: a second call after the first succeeded is a silent no-op.
    async fn upload_if_missing(&self, local_path: &Path, key: &str) -> Result<(), BlobStoreError>;

    /// Server-side copy. Identity when `from_key == to_key`; a no-op if
    /// `to_key` is already present.
    async fn copy_if_missing(&self, from_key: &str, to_key: &str) -> Result<(), BlobStoreError>;

    /// Atomic download: writes `local_path.part`, fsyncs, renames over
    /// `local_path`, fsyncs the parent directory. Never leaves a partial
    /// file at `local_path` on failure.
    async fn download_to(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError>;

    async fn upload_reader(&self, data: Vec<u8>, key: &str) -> Result<(), BlobStoreError>;
}

pub struct FsBlobStore {
    root: PathBuf,
    prefix: Option<String>,
}

impl FsBlobStore {
    pub fn new(root: PathBuf, prefix: Option<String>) -> Self {
        Self { root, prefix }
    }

    pub fn build_key(&self, project_name: &str, hash_hex: &str) -> String {
        build_key(self.prefix.as_deref(), project_name, hash_hex)
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path_for(path);
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError> {
        Ok(self.resolve(key).is_file())
    }

    async fn upload_if_missing(&self, local_path: &Path, key: &str) -> Result<(), BlobStoreError> {
        let target = self.resolve(key);
        if target.is_file() {
            return Ok(());
        }
        if !local_path.is_file() {
            return Err(BlobStoreError::SourceMissing(local_path.to_path_buf()));
        }
        let data = std::fs::read(local_path).map_err(|source| BlobStoreError::Io { key: key.to_string(), source })?;
        self.atomic_write(&target, &data).map_err(|source| BlobStoreError::Io { key: key.to_string(), source })
    }

    async fn copy_if_missing(&self, from_key: &str, to_key: &str) -> Result<(), BlobStoreError> {
        if from_key == to_key {
            return Ok(());
        }
        let to_path = self.resolve(to_key);
        if to_path.is_file() {
            return Ok(());
        }
        let data = std::fs::read(self.resolve(from_key)).map_err(|source| BlobStoreError::Io { key: from_key.to_string(), source })?;
        self.atomic_write(&to_path, &data).map_err(|source| BlobStoreError::Io { key: to_key.to_string(), source })
    }

    async fn download_to(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError> {
        let source = self.resolve(key);
        let data = std::fs::read(&source).map_err(|source_err| BlobStoreError::Io { key: key.to_string(), source: source_err })?;

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| BlobStoreError::Io { key: key.to_string(), source })?;
        }

        let tmp = tmp_path_for(local_path);
        let write_result = (|| -> Result<(), std::io::Error> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            std::fs::rename(&tmp, local_path)?;
            if let Some(parent) = local_path.parent() {
                if let Ok(dir) = std::fs::File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
            Ok(())
        })();

        if let Err(source) = write_result {
            let _ = std::fs::remove_file(&tmp);
            return Err(BlobStoreError::Io { key: key.to_string(), source });
        }

        Ok(())
    }

    async fn upload_reader(&self, data: Vec<u8>, key: &str) -> Result<(), BlobStoreError> {
        let target = self.resolve(key);
        if target.is_file() {
            return Ok(());
        }
        self.atomic_write(&target, &data).map_err(|source| BlobStoreError::Io { key: key.to_string(), source })
    }
}

pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    prefix: Option<String>,
}

impl HttpBlobStore {
    pub fn new(client: reqwest::Client, base_url: String, prefix: Option<String>) -> Self {
        Self { client, base_url, prefix }
    }

    pub fn build_key(&self, project_name: &str, hash_hex: &str) -> String {
        build_key(self.prefix.as_deref(), project_name, hash_hex)
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError> {
        let response = self
            .client
            .head(self.url_for(key))
            .send()
            .await
            .map_err(|source| BlobStoreError::Http { key: key.to_string(), source })?;
        Ok(response.status().is_success())
    }

    /// Conditional PUT via `If-None-Match: *`; a 412 precondition-failed
    /// response means another writer already stored this content, which is
    /// success from the caller's point of view.
    async fn upload_if_missing(&self, local_path: &Path, key: &str) -> Result<(), BlobStoreError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|source| BlobStoreError::Io { key: key.to_string(), source })?;

        let response = self
            .client
            .put(self.url_for(key))
            .header("If-None-Match", "*")
            .body(data)
            .send()
            .await
            .map_err(|source| BlobStoreError::Http { key: key.to_string(), source })?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 412 {
            return Ok(());
        }
        Err(BlobStoreError::UnexpectedStatus { key: key.to_string(), status: status.as_u16() })
    }

    async fn copy_if_missing(&self, from_key: &str, to_key: &str) -> Result<(), BlobStoreError> {
        if from_key == to_key {
            return Ok(());
        }
        if self.exists(to_key).await? {
            return Ok(());
        }
        let response = self
            .client
            .post(format!("{}/copy", self.base_url.trim_end_matches('/')))
            .json(&serde_json::json!({ "from": from_key, "to": to_key }))
            .send()
            .await
            .map_err(|source| BlobStoreError::Http { key: to_key.to_string(), source })?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(BlobStoreError::UnexpectedStatus { key: to_key.to_string(), status: response.status().as_u16() })
    }

    async fn download_to(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError> {
        let mut response = self
            .client
            .get(self.url_for(key))
            .send()
            .await
            .map_err(|source| BlobStoreError::Http { key: key.to_string(), source })?;

        if !response.status().is_success() {
            return Err(BlobStoreError::UnexpectedStatus { key: key.to_string(), status: response.status().as_u16() });
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| BlobStoreError::Io { key: key.to_string(), source })?;
        }

        let tmp = tmp_path_for(local_path);
        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            while let Some(chunk) = response.chunk().await.map_err(std::io::Error::other)? {
                tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await?;
            }
            tokio::io::AsyncWriteExt::sync_all(&mut file).await?;
            tokio::fs::rename(&tmp, local_path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BlobStoreError::Io { key: key.to_string(), source });
        }

        Ok(())
    }

    async fn upload_reader(&self, data: Vec<u8>, key: &str) -> Result<(), BlobStoreError> {
        let response = self
            .client
            .put(self.url_for(key))
            .header("If-None-Match", "*")
            .body(data)
            .send()
            .await
            .map_err(|source| BlobStoreError::Http { key: key.to_string(), source })?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 412 {
            return Ok(());
        }
        Err(BlobStoreError::UnexpectedStatus { key: key.to_string(), status: status.as_u16() })
    }
}

#[allow(dead_code)]
async fn drain_to_vec<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_key_namespaces_by_project() {
        assert_eq!(build_key(None, "proj", "abc"), "proj/blobs/abc");
        assert_eq!(build_key(Some("store1"), "proj", "abc"), "store1/proj/blobs/abc");
    }

    #[tokio::test]
    async fn fs_blobstore_upload_then_exists() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.wav");
        std::fs::write(&src, b"hello").unwrap();

        let store = FsBlobStore::new(root.path().to_path_buf(), None);
        let key = store.build_key("proj", "abc123");

        assert!(!store.exists(&key).await.unwrap());
        store.upload_if_missing(&src, &key).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn fs_blobstore_upload_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.wav");
        std::fs::write(&src, b"hello").unwrap();

        let store = FsBlobStore::new(root.path().to_path_buf(), None);
        let key = store.build_key("proj", "abc123");

        store.upload_if_missing(&src, &key).await.unwrap();
        store.upload_if_missing(&src, &key).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn fs_blobstore_copy_if_missing_migrates_key() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.wav");
        std::fs::write(&src, b"hello").unwrap();

        let store = FsBlobStore::new(root.path().to_path_buf(), None);
        let old_key = store.build_key("proj", "oldkey");
        let new_key = store.build_key("proj", "newkey");

        store.upload_if_missing(&src, &old_key).await.unwrap();
        store.copy_if_missing(&old_key, &new_key).await.unwrap();

        assert!(store.exists(&new_key).await.unwrap());
    }

    #[tokio::test]
    async fn fs_blobstore_download_to_is_atomic_and_verifiable() {
        let root = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        let store = FsBlobStore::new(root.path().to_path_buf(), None);
        let key = store.build_key("proj", "abc123");
        store.upload_reader(b"payload".to_vec(), &key).await.unwrap();

        let dest = dest_dir.path().join("nested/out.wav");
        store.download_to(&key, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert!(!tmp_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn fs_blobstore_download_tmp_paths_dont_collide_across_extensions() {
        let root = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        let store = FsBlobStore::new(root.path().to_path_buf(), None);
        let wav_key = store.build_key("proj", "wavhash");
        let aif_key = store.build_key("proj", "aifhash");
        store.upload_reader(b"wav-bytes".to_vec(), &wav_key).await.unwrap();
        store.upload_reader(b"aif-bytes".to_vec(), &aif_key).await.unwrap();

        let wav_dest = dest_dir.path().join("Samples/kick.wav");
        let aif_dest = dest_dir.path().join("Samples/kick.aif");

        assert_ne!(tmp_path_for(&wav_dest), tmp_path_for(&aif_dest));

        store.download_to(&wav_key, &wav_dest).await.unwrap();
        store.download_to(&aif_key, &aif_dest).await.unwrap();

        assert_eq!(std::fs::read(&wav_dest).unwrap(), b"wav-bytes");
        assert_eq!(std::fs::read(&aif_dest).unwrap(), b"aif-bytes");
    }
}
