//! Object store port: the bucket/key contract used to move files between units.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::Result;

/// Boxed future type alias used by [`ObjectStore`] to keep the trait dyn-compatible.
pub type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Shared bucket/key store reached only through put, get, and ensure-bucket.
///
/// Every top-level directory under the shared build root is a bucket and
/// every file beneath it is a key. A run writes each key from a single
/// producer, so implementations only need atomic per-key operations.
pub trait ObjectStore: Send + Sync {
    /// Creates the bucket if it does not already exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Store`] if the bucket cannot be created.
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a>;

    /// Uploads `local` to `bucket/key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Conflict`] if the key exists and `overwrite` is
    /// false, or another error if the upload fails.
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        local: &'a Path,
        overwrite: bool,
    ) -> StoreFuture<'a>;

    /// Downloads `bucket/key` to `dest`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the key does not exist.
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str, dest: &'a Path) -> StoreFuture<'a>;
}

/// Rejects keys that would escape their bucket.
///
/// # Errors
///
/// Returns [`crate::Error::Store`] for empty names, absolute keys, or `..` segments.
pub fn validate_location(bucket: &str, key: &str) -> Result<()> {
    let bad_bucket = bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == "..";
    let bad_key = key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s == "..");
    if bad_bucket || bad_key {
        return Err(crate::Error::Store {
            message: format!("invalid object location {bucket:?}/{key:?}"),
        });
    }
    Ok(())
}
