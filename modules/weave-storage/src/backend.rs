use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::ObjectStore;

use crate::error::Result;

/// A namespaced view over an `object_store::ObjectStore`. `prefix` lets
/// one physical container back several logical roots (raw-data archive,
/// file downloads) without cross-contamination.
#[derive(Clone)]
pub struct StorageBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl StorageBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    /// A new backend scoped to `sub` under this one's prefix, sharing the
    /// same underlying store connection.
    pub fn scoped(&self, sub: &str) -> Self {
        let prefix = if self.prefix.is_empty() {
            sub.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), sub)
        };
        Self {
            store: self.store.clone(),
            prefix,
        }
    }

    fn full_path(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix.trim_end_matches('/'), key))
        }
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store.put(&self.full_path(key), data.into()).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self.store.get(&self.full_path(key)).await?;
        Ok(result.bytes().await?)
    }

    pub async fn get_opt(&self, key: &str) -> Result<Option<Bytes>> {
        match self.get(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(crate::error::StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&self.full_path(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys under `sub_prefix` (relative to this backend's own prefix),
    /// with the scoping prefix stripped back off before returning.
    pub async fn list(&self, sub_prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_path(sub_prefix);
        let mut stream = self.store.list(Some(&full_prefix));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let rel = meta
                .location
                .as_ref()
                .strip_prefix(self.prefix.trim_end_matches('/'))
                .unwrap_or(meta.location.as_ref())
                .trim_start_matches('/')
                .to_string();
            keys.push(rel);
        }
        Ok(keys)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.full_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn backend() -> StorageBackend {
        StorageBackend::new(Arc::new(InMemory::new()), "raw".to_string())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let backend = backend();
        backend.put("a/b.json", Bytes::from_static(b"{}")).await.unwrap();
        let got = backend.get("a/b.json").await.unwrap();
        assert_eq!(&got[..], b"{}");
    }

    #[tokio::test]
    async fn get_opt_is_none_for_missing_key() {
        let backend = backend();
        assert!(backend.get_opt("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scoped_backend_does_not_collide_with_parent_keys() {
        let parent = backend();
        let child = parent.scoped("syncjob-1");
        child.put("manifest.json", Bytes::from_static(b"{}")).await.unwrap();
        assert!(parent.get_opt("manifest.json").await.unwrap().is_none());
        assert!(child.get_opt("manifest.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = backend();
        backend.delete("never-existed").await.unwrap();
    }
}
