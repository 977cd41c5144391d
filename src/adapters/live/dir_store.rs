//! Directory-backed object store.
//!
//! The shared build root doubles as the store: `<root>/<bucket>/<key>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::partial_path;
use crate::error::{Error, Result};
use crate::ports::object_store::{validate_location, ObjectStore, StoreFuture};

/// Object store whose buckets are the top-level directories of `root`.
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    /// Creates a store rooted at the shared build root.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_location(bucket, key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

async fn copy_via_temp(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = partial_path(dest);
    tokio::fs::copy(src, &tmp).await?;
    tokio::fs::rename(&tmp, dest).await
}

impl ObjectStore for DirObjectStore {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a> {
        Box::pin(async move {
            validate_location(bucket, "key")?;
            let dir = self.root.join(bucket);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::Store { message: format!("create bucket {bucket}: {e}") })
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        local: &'a Path,
        overwrite: bool,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let dest = self.object_path(bucket, key)?;
            if !overwrite && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                return Err(Error::Conflict { bucket: bucket.into(), key: key.into() });
            }
            if dest == local {
                return Ok(());
            }
            tracing::debug!(bucket, key, from = %local.display(), "put object");
            copy_via_temp(local, &dest)
                .await
                .map_err(|e| Error::io(format!("put {bucket}/{key}"), e))
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str, dest: &'a Path) -> StoreFuture<'a> {
        Box::pin(async move {
            let src = self.object_path(bucket, key)?;
            if src == dest {
                return Ok(());
            }
            tracing::debug!(bucket, key, to = %dest.display(), "get object");
            match copy_via_temp(&src, dest).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound && !src.exists() => {
                    Err(Error::NotFound { bucket: bucket.into(), key: key.into() })
                }
                Err(e) => Err(Error::io(format!("get {bucket}/{key}"), e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = DirObjectStore::new(root.path());

        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let src = work.path().join("payload.bin");
        std::fs::write(&src, &data).unwrap();

        store.ensure_bucket("builds").await.unwrap();
        store.put("builds", "42/x86_64/payload.bin", &src, false).await.unwrap();
        assert!(root.path().join("builds/42/x86_64/payload.bin").is_file());

        let dest = work.path().join("out/payload.bin");
        store.get("builds", "42/x86_64/payload.bin", &dest).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), data);
    }

    #[tokio::test]
    async fn put_without_overwrite_conflicts() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = DirObjectStore::new(root.path());
        let src = work.path().join("a");
        std::fs::write(&src, "one").unwrap();

        store.put("source", "a", &src, false).await.unwrap();
        let err = store.put("source", "a", &src, false).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        std::fs::write(&src, "two").unwrap();
        store.put("source", "a", &src, true).await.unwrap();
        assert_eq!(std::fs::read_to_string(root.path().join("source/a")).unwrap(), "two");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = DirObjectStore::new(root.path());
        let err = store.get("builds", "nope", &root.path().join("x")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn ensure_bucket_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let store = DirObjectStore::new(root.path());
        store.ensure_bucket("builds").await.unwrap();
        store.ensure_bucket("builds").await.unwrap();
        assert!(root.path().join("builds").is_dir());
    }
}
