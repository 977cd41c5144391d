//! Publication of a unit's build outputs to the builds bucket.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{RemoteFile, BUILDS_BUCKET};
use crate::error::{Error, Result};
use crate::manifest::{self, BUILDS_JSON};
use crate::ports::filesystem::FileSystem;
use crate::ports::object_store::ObjectStore;

/// Where a unit sends its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    /// Destination bucket.
    pub bucket: String,
    /// Architecture whose build directory is published.
    pub arch: String,
}

impl PublishTarget {
    /// Targets the builds bucket for `arch`.
    #[must_use]
    pub fn builds(arch: &str) -> Self {
        Self { bucket: BUILDS_BUCKET.to_string(), arch: arch.to_string() }
    }
}

/// Keys touched by a publish pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Keys written.
    pub uploaded: Vec<String>,
    /// Artifact keys left alone because they were staged in or already present.
    pub skipped: Vec<String>,
}

struct Upload {
    key: String,
    local: PathBuf,
    overwrite: bool,
}

/// Uploads a unit's build outputs under `<buildID>/<arch>/`.
///
/// Metadata files are always overwritten. Artifacts are never replaced: one
/// that was staged into the unit, or whose key already exists, is skipped.
/// Kola log archives from `tmp/` go under `logs/`. Every upload is attempted
/// even after a failure.
///
/// # Errors
///
/// Returns the build manifest error if `builds/builds.json` exists but the
/// latest build cannot be read, or a store error if any upload failed.
pub async fn publish(
    fs: &dyn FileSystem,
    store: &dyn ObjectStore,
    root: &Path,
    target: &PublishTarget,
    staged: &[RemoteFile],
) -> Result<PublishReport> {
    let builds_dir = root.join("builds");
    let builds_json = builds_dir.join(BUILDS_JSON);
    if !fs.exists(&builds_json) {
        tracing::info!(root = %root.display(), "no builds to publish");
        return Ok(PublishReport::default());
    }
    let build = manifest::read_build(fs, &builds_dir, None, &target.arch)?;
    let key_dir = build.relative_dir();
    let build_dir = builds_dir.join(&key_dir);

    let staged_keys: HashSet<&str> = staged
        .iter()
        .filter(|f| f.bucket == target.bucket)
        .map(|f| f.key.as_str())
        .collect();

    let mut report = PublishReport::default();
    let mut uploads =
        vec![Upload { key: BUILDS_JSON.to_string(), local: builds_json, overwrite: true }];

    let names = fs.list_dir(&build_dir).map_err(|e| Error::Manifest {
        message: format!("failed to read build dir {}: {e}", build_dir.display()),
    })?;
    for name in names {
        let local = build_dir.join(&name);
        if fs.is_dir(&local) {
            continue;
        }
        let key = format!("{key_dir}/{name}");
        if manifest::is_known_build_meta(&name) {
            uploads.push(Upload { key, local, overwrite: true });
        } else if build.is_artifact(&local).is_some() {
            if staged_keys.contains(key.as_str()) {
                report.skipped.push(key);
            } else {
                uploads.push(Upload { key, local, overwrite: false });
            }
        }
    }

    let tmp_dir = root.join("tmp");
    if fs.is_dir(&tmp_dir) {
        let names = fs.list_dir(&tmp_dir).unwrap_or_default();
        for name in names.into_iter().filter(|n| n.contains("kola") && n.ends_with("tar.xz")) {
            uploads.push(Upload {
                key: format!("{key_dir}/logs/{name}"),
                local: tmp_dir.join(&name),
                overwrite: true,
            });
        }
    }

    let mut failed = 0usize;
    for upload in uploads {
        match store.put(&target.bucket, &upload.key, &upload.local, upload.overwrite).await {
            Ok(()) => {
                tracing::info!(bucket = %target.bucket, key = %upload.key, "published");
                report.uploaded.push(upload.key);
            }
            Err(Error::Conflict { .. }) => {
                tracing::debug!(key = %upload.key, "artifact already published, skipping");
                report.skipped.push(upload.key);
            }
            Err(e) => {
                tracing::error!(key = %upload.key, error = %e, "upload failed");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(Error::Store { message: format!("publish failed for {failed} file(s)") });
    }
    Ok(report)
}
