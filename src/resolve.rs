//! Artifact resolution: maps a stage's required artifact types to remote files.

use crate::error::{Error, Result};
use crate::manifest::BuildManifest;
use crate::shuttle::{RemoteFile, BUILDS_BUCKET};
use crate::spec::Stage;

/// Resolves every `require_artifacts` entry of `stage` against `manifest`,
/// then each `request_artifacts` entry the manifest happens to have.
///
/// Keys are relative to the builds root: `<buildID>/<arch>/<path>`.
///
/// # Errors
///
/// Returns [`Error::MissingArtifact`] for the first required name that the
/// manifest lacks, or for the first required name at all when the manifest
/// failed to load. Requested names never fail.
pub fn resolve(
    stage: &Stage,
    manifest: std::result::Result<&BuildManifest, &Error>,
) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::with_capacity(stage.require_artifacts.len());
    for name in &stage.require_artifacts {
        let missing =
            || Error::MissingArtifact { stage: stage.id.clone(), artifact: name.clone() };
        let manifest = match manifest {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(stage = %stage.id, artifact = %name, error = %e, "no build manifest");
                return Err(missing());
            }
        };
        let artifact = manifest.get_artifact(name).ok_or_else(missing)?;
        files.push(remote_file(manifest, name, &artifact.path));
    }

    let Ok(manifest) = manifest else {
        return Ok(files);
    };
    for name in &stage.request_artifacts {
        let artifact = name.to_ascii_lowercase();
        if files.iter().any(|f| f.artifact.as_deref() == Some(artifact.as_str())) {
            continue;
        }
        match manifest.get_artifact(name) {
            Some(found) => files.push(remote_file(manifest, name, &found.path)),
            None => tracing::debug!(stage = %stage.id, %artifact, "requested artifact not built"),
        }
    }
    Ok(files)
}

fn remote_file(manifest: &BuildManifest, name: &str, path: &str) -> RemoteFile {
    RemoteFile {
        bucket: BUILDS_BUCKET.to_string(),
        key: format!("{}/{}", manifest.relative_dir(), path),
        compressed: false,
        artifact: Some(name.to_ascii_lowercase()),
    }
}
