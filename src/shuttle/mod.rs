//! Remote files: handles into the shared object store and the helpers that
//! move them into and out of an execution unit.

mod publish;

pub use publish::{publish, PublishReport, PublishTarget};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::ports::object_store::{validate_location, ObjectStore};
use crate::ports::shell::{CommandLine, ShellExecutor};

/// Bucket receiving build outputs.
pub const BUILDS_BUCKET: &str = "builds";
/// Bucket receiving scripts and payloads discovered at orchestration start.
pub const SOURCE_BUCKET: &str = "source";
/// Bucket receiving files a stage asked to return.
pub const CACHE_BUCKET: &str = "cache";

/// A handle describing a file's location in the shared object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Top-level bucket name.
    pub bucket: String,
    /// Key relative to the bucket.
    pub key: String,
    /// Extract the file as a tarball after download.
    #[serde(default)]
    pub compressed: bool,
    /// Artifact type the file was resolved from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl RemoteFile {
    /// Creates a plain handle.
    #[must_use]
    pub fn new(bucket: &str, key: &str) -> Self {
        Self { bucket: bucket.to_string(), key: key.to_string(), compressed: false, artifact: None }
    }

    /// Local path of this file under a unit's build root.
    #[must_use]
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(&self.bucket).join(&self.key)
    }
}

/// Downloads `files` into `root` in order, extracting compressed files in place.
///
/// Returns the local paths written.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for a missing key, or a store error if a
/// compressed file fails to extract.
pub async fn stage_in(
    store: &dyn ObjectStore,
    shell: &dyn ShellExecutor,
    cancel: &CancelToken,
    files: &[RemoteFile],
    root: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let dest = file.local_path(root);
        tracing::info!(bucket = %file.bucket, key = %file.key, "staging in remote file");
        store.get(&file.bucket, &file.key, &dest).await?;
        if file.compressed {
            extract(shell, cancel, &dest, root).await?;
        }
        written.push(dest);
    }
    Ok(written)
}

/// Uploads each of `files` (paths relative to `root`) to the cache bucket
/// under the same relative key, replacing earlier copies.
///
/// Every file is attempted; returns the keys uploaded.
///
/// # Errors
///
/// Returns [`Error::Store`] naming how many uploads failed.
pub async fn return_files(
    store: &dyn ObjectStore,
    root: &Path,
    files: &[String],
) -> Result<Vec<String>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    store.ensure_bucket(CACHE_BUCKET).await?;
    let mut uploaded = Vec::with_capacity(files.len());
    let mut failed = 0usize;
    for file in files {
        let key = file.trim_start_matches("./");
        let result = match validate_location(CACHE_BUCKET, key) {
            Ok(()) => store.put(CACHE_BUCKET, key, &root.join(key), true).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::info!(bucket = CACHE_BUCKET, key, "returned file");
                uploaded.push(key.to_string());
            }
            Err(e) => {
                tracing::error!(bucket = CACHE_BUCKET, key, error = %e, "failed upload of requested file");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(Error::Store { message: format!("{failed} returned file(s) failed to upload") });
    }
    Ok(uploaded)
}

async fn extract(
    shell: &dyn ShellExecutor,
    cancel: &CancelToken,
    archive: &Path,
    root: &Path,
) -> Result<()> {
    let argv = vec![
        "tar".to_string(),
        "-xf".to_string(),
        archive.display().to_string(),
        "-C".to_string(),
        root.display().to_string(),
    ];
    let Some(cmd) = CommandLine::direct(argv) else {
        return Ok(());
    };
    let outcome = shell
        .run(&cmd, cancel)
        .await
        .map_err(|e| Error::io(format!("extract {}", archive.display()), e))?;
    if outcome.success() {
        Ok(())
    } else {
        Err(Error::Store {
            message: format!("extracting {} failed with {outcome:?}", archive.display()),
        })
    }
}
