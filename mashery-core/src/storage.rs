//! Storage adapter: key→bytes persistence with JSON/binary helpers over
//! whatever keyspace the embedding host actually provides.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::CoreError;

/// Host-provided (or, for standalone use, in-process) key→bytes store.
///
/// A missing key is not an error: `read`/`read_binary` return `Ok(None)`.
/// Errors here are always `CoreError::Storage` — storage I/O failures are
/// fatal to the current operation but are never conflated with "the key
/// wasn't there".
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_binary(&self, path: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn write_binary(&self, path: &str, value: Vec<u8>) -> Result<(), CoreError>;
    async fn delete(&self, path: &str) -> Result<(), CoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, CoreError>;
}

/// JSON convenience helpers over any `Storage` impl.
///
/// Kept as an extension trait (rather than default methods on `Storage` itself)
/// so `Storage` stays object-safe — the engine holds it behind `Arc<dyn Storage>`.
#[async_trait]
pub trait StorageJsonExt: Storage {
    async fn read_json<T: DeserializeOwned + Send>(
        &self,
        path: &str,
    ) -> Result<Option<T>, CoreError> {
        match self.read_binary(path).await? {
            None => Ok(None),
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::Storage(format!("decode {path}: {e}")))?;
                Ok(Some(value))
            }
        }
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &str, value: &T) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CoreError::Storage(format!("encode {path}: {e}")))?;
        self.write_binary(path, bytes).await
    }
}

impl<S: Storage + ?Sized> StorageJsonExt for S {}

/// A process-local storage backend good enough to run the engine standalone:
/// an `RwLock<BTreeMap>` keyed by the same path strings the host would use.
/// Production embeddings are expected to supply their own `Storage` over
/// their native keyspace; this type exists so the engine is runnable and
/// testable without one.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read_binary(&self, path: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let guard = self
            .entries
            .read()
            .map_err(|_| CoreError::Storage("storage lock poisoned".into()))?;
        Ok(guard.get(path).cloned())
    }

    async fn write_binary(&self, path: &str, value: Vec<u8>) -> Result<(), CoreError> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| CoreError::Storage("storage lock poisoned".into()))?;
        guard.insert(path.to_string(), value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| CoreError::Storage("storage lock poisoned".into()))?;
        guard.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        let guard = self
            .entries
            .read()
            .map_err(|_| CoreError::Storage("storage lock poisoned".into()))?;
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_not_an_error() {
        let s = InMemoryStorage::new();
        assert!(s.read_binary("role/r1/key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_round_trip() {
        let s = InMemoryStorage::new();
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct V {
            n: i64,
        }
        s.write_json("p", &V { n: 42 }).await.unwrap();
        let got: Option<V> = s.read_json("p").await.unwrap();
        assert_eq!(got, Some(V { n: 42 }));
    }

    #[tokio::test]
    async fn list_strips_prefix() {
        let s = InMemoryStorage::new();
        s.write_binary("role/r1/key", vec![]).await.unwrap();
        s.write_binary("role/r2/key", vec![]).await.unwrap();
        s.write_binary("config", vec![]).await.unwrap();
        let mut names = s.list("role/").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["r1/key".to_string(), "r2/key".to_string()]);
    }

    #[tokio::test]
    async fn delete_then_read_is_none() {
        let s = InMemoryStorage::new();
        s.write_binary("k", vec![1, 2, 3]).await.unwrap();
        s.delete("k").await.unwrap();
        assert!(s.read_binary("k").await.unwrap().is_none());
    }
}
