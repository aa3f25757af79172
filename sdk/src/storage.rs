//! JSON files backing the persistent host stores.
//!
//! Every store is a single versioned document that is rewritten as a whole on each change. Writes
//! go to a sibling temporary file first and are then renamed over the original, so a crash never
//! leaves a half-written store behind.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Version stamped into every store document.
pub const STORAGE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("access store file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("(de)serialize store file {}", path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store file {} has unsupported version {found}", path.display())]
    Version { path: PathBuf, found: u32 },
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct Document<T> {
    version: u32,
    data: T,
}

/// Reads a store document, returning `T::default()` if the file does not exist yet.
pub(crate) async fn read<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "store file not found, starting empty");
            return Ok(T::default());
        }
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let document: Document<T> =
        serde_json::from_slice(&raw).map_err(|source| StorageError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
    if document.version != STORAGE_VERSION {
        return Err(StorageError::Version {
            path: path.to_path_buf(),
            found: document.version,
        });
    }
    Ok(document.data)
}

/// Atomically replaces the store document at `path` with `data`.
pub(crate) async fn write<T>(path: &Path, data: &T) -> Result<(), StorageError>
where
    T: Serialize,
{
    let io_err = |source: std::io::Error| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let document = Document {
        version: STORAGE_VERSION,
        data,
    };
    let json = serde_json::to_vec_pretty(&document).map_err(|source| StorageError::Serde {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

    tracing::trace!(path = %path.display(), bytes = json.len(), "wrote store file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let data: BTreeMap<String, String> = read(&dir.path().join("absent")).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".storage").join("store");
        let mut data = BTreeMap::new();
        data.insert("k".to_string(), "v".to_string());

        write(&path, &data).await.unwrap();
        let back: BTreeMap<String, String> = read(&path).await.unwrap();
        assert_eq!(back, data);
        assert!(!dir.path().join(".storage").join("store.tmp").exists());
    }

    #[tokio::test]
    async fn rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        tokio::fs::write(&path, r#"{"version": 7, "data": {}}"#)
            .await
            .unwrap();

        let err = read::<BTreeMap<String, String>>(&path).await.unwrap_err();
        assert!(
            matches!(err, StorageError::Version { found: 7, .. }),
            "{err:?}"
        );
    }
}
