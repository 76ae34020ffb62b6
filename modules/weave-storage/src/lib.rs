//! Blob storage backend, grounded on the original's
//! `StorageBackend` ABC: a small, backend-agnostic put/get/delete/list
//! surface that `weave-rawdata` and `weave-download` build on. Backed by
//! `object_store`, so the same trait covers local disk (dev/tests), Azure
//! Blob, and S3-compatible stores without call sites caring which.

mod backend;
mod error;

pub use backend::StorageBackend;
pub use error::{Result, StorageError};

use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use url::Url;

/// Builds a `StorageBackend` from a connection string. `memory://` is
/// in-process (tests); `file:///path` is local disk; anything else is
/// parsed as an `object_store` URL (e.g. `az://container/prefix`).
pub fn backend_from_url(raw: &str) -> Result<StorageBackend> {
    if raw == "memory://" {
        return Ok(StorageBackend::new(Arc::new(InMemory::new()), String::new()));
    }
    let url = Url::parse(raw).map_err(|e| StorageError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "file" => {
            let path = url.path();
            std::fs::create_dir_all(path).map_err(|e| StorageError::Backend(e.to_string()))?;
            let store = LocalFileSystem::new_with_prefix(path)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(StorageBackend::new(Arc::new(store), String::new()))
        }
        _ => {
            let (store, path) = object_store::parse_url(&url).map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(StorageBackend::new(Arc::from(store), path.to_string()))
        }
    }
}

pub use object_store::path::Path as StoragePath;
