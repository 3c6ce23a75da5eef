//! Caches kept in a host directory and bind-mounted into phases

use crate::error::{PackError, PackResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Build or launch cache stored at a host path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindCache {
    path: PathBuf,
    name: String,
}

impl BindCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.to_string_lossy().into_owned();
        Self { path, name }
    }

    /// Host path, used as the bind source
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the host directory before it is mounted
    pub async fn prepare(&self) -> PackResult<()> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| PackError::CachePrepare {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    pub async fn clear(&self) -> PackResult<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(PackError::io(format!("removing {}", self.name), e))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn prepare_then_clear() {
        let root = TempDir::new().unwrap();
        let cache = BindCache::new(root.path().join("cache").join("build-cache"));

        cache.prepare().await.unwrap();
        assert!(cache.path().is_dir());
        std::fs::write(cache.path().join("layer.tgz"), b"data").unwrap();

        cache.clear().await.unwrap();
        assert!(!cache.path().exists());
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn prepare_under_a_file_fails() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let cache = BindCache::new(file.join("build-cache"));

        let err = cache.prepare().await.unwrap_err();
        assert!(matches!(err, PackError::CachePrepare { ref name, .. } if name == cache.name()));
    }
}
