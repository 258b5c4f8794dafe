use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::domain::Algo;

/// Buffered reads of at least this size.
const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("cannot hash {0}: not a regular file (directory or symlink)")]
    InvalidTarget(std::path::PathBuf),

    #[error("I/O error hashing {path}: {source}")]
    IoError { path: std::path::PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone)]
pub struct HashResult {
    pub hash_hex: String,
    pub size: u64,
    pub modified: i64,
}

/// Streams a file's bytes through `algo`, refusing directories and symlinks.
/// `size`/`modified` come from a single stat captured before `open`, so a
/// concurrent write landing between stat and read cannot make the reported
/// size/mtime disagree with what was actually hashed in spirit (the content
/// hash always wins on conflicts; these two fields are informational).
pub fn hash_file(path: &Path, algo: Algo) -> Result<HashResult, HashError> {
    let metadata = std::fs::symlink_metadata(path).map_err(|source| HashError::IoError { path: path.to_path_buf(), source })?;

    if metadata.is_symlink() || metadata.is_dir() {
        return Err(HashError::InvalidTarget(path.to_path_buf()));
    }

    let size = metadata.len();
    let modified = metadata
        .modified()
        .ok()
        .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let file = File::open(path).map_err(|source| HashError::IoError { path: path.to_path_buf(), source })?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);

    let hash_hex = match algo {
        Algo::Sha256 => hash_with(&mut reader, path, sha2::Sha256::default())?,
        Algo::Blake3 => hash_with_blake3(&mut reader, path)?,
    };

    Ok(HashResult { hash_hex, size, modified })
}

fn hash_with<D: sha2::Digest>(reader: &mut impl Read, path: &Path, mut digest: D) -> Result<String, HashError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|source| HashError::IoError { path: path.to_path_buf(), source })?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(hex_encode(&digest.finalize()))
}

fn hash_with_blake3(reader: &mut impl Read, path: &Path) -> Result<String, HashError> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|source| HashError::IoError { path: path.to_path_buf(), source })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable_and_algo_specific() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let sha = hash_file(&path, Algo::Sha256).unwrap();
        let sha_again = hash_file(&path, Algo::Sha256).unwrap();
        let b3 = hash_file(&path, Algo::Blake3).unwrap();

        assert_eq!(sha.hash_hex, sha_again.hash_hex);
        assert_ne!(sha.hash_hex, b3.hash_hex);
        assert_eq!(sha.size, 11);
    }

    #[test]
    fn refuses_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(dir.path(), Algo::Sha256).unwrap_err();
        assert!(matches!(err, HashError::InvalidTarget(_)));
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"data").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = hash_file(&link, Algo::Sha256).unwrap_err();
        assert!(matches!(err, HashError::InvalidTarget(_)));
    }
}
