//! A `Storage` (C1) implementation over a plain directory tree, so the
//! standalone CLI driver persists roles and configuration across runs
//! instead of only ever holding them in `InMemoryStorage`. Key strings
//! (`{backend_uuid}/role/{name}/key`, …) map directly onto nested path
//! components under a configured root — the same separator the key-layout
//! functions in `mashery_core::paths` already use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mashery_core::CoreError;
use mashery_core::Storage;

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read_binary(&self, path: &str) -> Result<Option<Vec<u8>>, CoreError> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Storage(format!("read {path}: {e}"))),
        }
    }

    async fn write_binary(&self, path: &str, value: Vec<u8>) -> Result<(), CoreError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Storage(format!("create_dir_all {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&full, value).await.map_err(|e| CoreError::Storage(format!("write {path}: {e}")))
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Storage(format!("delete {path}: {e}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        let root = self.resolve(prefix);
        let mut out = Vec::new();
        if root.is_dir() {
            walk(&root, &root, &mut out).await.map_err(|e| CoreError::Storage(format!("list {prefix}: {e}")))?;
        }
        Ok(out)
    }
}

/// Recursively collects every file under `dir`, returned relative to `base`
/// with forward-slash separators regardless of host path conventions.
fn walk<'a>(base: &'a Path, dir: &'a Path, out: &'a mut Vec<String>) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                walk(base, &path, out).await?;
            } else if let Ok(rel) = path.strip_prefix(base) {
                let rel = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/");
                out.push(rel);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_core::StorageJsonExt;

    #[tokio::test]
    async fn round_trips_through_the_filesystem() {
        let dir = std::env::temp_dir().join(format!("mashery-cli-test-{}", uuid::Uuid::new_v4()));
        let storage = FileStorage::new(&dir);
        storage.write_json("b1/role/r1/key", &serde_json::json!({"n": 1})).await.unwrap();
        storage.write_json("b1/role/r2/key", &serde_json::json!({"n": 2})).await.unwrap();

        let listed = storage.list("b1/role/").await.unwrap();
        let mut listed = listed;
        listed.sort();
        assert_eq!(listed, vec!["r1/key".to_string(), "r2/key".to_string()]);

        let got: Option<serde_json::Value> = storage.read_json("b1/role/r1/key").await.unwrap();
        assert_eq!(got, Some(serde_json::json!({"n": 1})));

        storage.delete("b1/role/r1/key").await.unwrap();
        assert!(storage.read_binary("b1/role/r1/key").await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
