//! Build manifests: the `builds.json` index and per-build `meta.json`.
//!
//! Layout under the builds root:
//!
//! ```text
//! builds/
//!   ├── builds.json
//!   └── <build-id>/<arch>/
//!         ├── meta.json
//!         └── <artifact files>
//! ```

pub mod artifacts;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ports::filesystem::FileSystem;

/// Name of the build index file.
pub const BUILDS_JSON: &str = "builds.json";
/// Name of the per-build manifest file.
pub const META_JSON: &str = "meta.json";

/// One entry in `builds.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEntry {
    /// Build identifier.
    pub id: String,
    /// Architectures the build was produced for.
    #[serde(default)]
    pub arches: Vec<String>,
}

/// The `builds.json` index. Builds are listed newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildsIndex {
    /// Known builds, newest first.
    #[serde(default)]
    pub builds: Vec<BuildEntry>,
    /// When the index was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BuildsIndex {
    /// Returns the newest build id that includes `arch`.
    #[must_use]
    pub fn latest(&self, arch: &str) -> Option<&str> {
        self.builds.iter().find(|b| b.arches.iter().any(|a| a == arch)).map(|b| b.id.as_str())
    }
}

/// A file produced by a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name relative to the build directory.
    #[serde(default)]
    pub path: String,
    /// Hex SHA-256 of the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Artifact {
    /// An artifact counts as present when it names a file.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.path.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetaJson {
    #[serde(default)]
    buildid: String,
    #[serde(default)]
    images: BTreeMap<String, Artifact>,
    #[serde(default)]
    extensions: Option<Artifact>,
}

/// The record of one build's artifacts for one architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildManifest {
    /// Build identifier.
    pub build_id: String,
    /// Architecture the manifest describes.
    pub arch: String,
    artifacts: BTreeMap<String, Artifact>,
}

impl BuildManifest {
    /// Parses a `meta.json` document.
    ///
    /// Only entries named in [`artifacts::ARTIFACT_TYPES`] are kept; names are
    /// lower-cased.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if the document is not valid JSON.
    pub fn from_meta_json(json: &str, arch: &str) -> Result<Self> {
        let meta: MetaJson = serde_json::from_str(json)
            .map_err(|e| Error::Manifest { message: format!("failed to parse {META_JSON}: {e}") })?;
        let mut artifacts = BTreeMap::new();
        for (name, artifact) in meta.images {
            let name = name.to_ascii_lowercase();
            if artifacts::is_known(&name) {
                artifacts.insert(name, artifact);
            } else {
                tracing::debug!(artifact = %name, "ignoring unknown artifact type");
            }
        }
        if let Some(ext) = meta.extensions {
            artifacts.insert("extensions".into(), ext);
        }
        Ok(Self { build_id: meta.buildid, arch: arch.to_string(), artifacts })
    }

    /// Creates a manifest from explicit entries.
    #[must_use]
    pub fn new(build_id: &str, arch: &str, entries: &[(&str, &str)]) -> Self {
        let artifacts = entries
            .iter()
            .map(|(name, path)| {
                (name.to_ascii_lowercase(), Artifact { path: (*path).to_string(), ..Artifact::default() })
            })
            .collect();
        Self { build_id: build_id.to_string(), arch: arch.to_string(), artifacts }
    }

    /// Looks up a present artifact by type name (case-insensitive).
    #[must_use]
    pub fn get_artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(&name.to_ascii_lowercase()).filter(|a| a.is_present())
    }

    /// Returns the artifact type whose file name matches the base name of `path`.
    #[must_use]
    pub fn is_artifact(&self, path: &Path) -> Option<&str> {
        let base = path.file_name()?.to_str()?;
        self.artifacts
            .iter()
            .find(|(_, a)| a.is_present() && a.path == base)
            .map(|(name, _)| name.as_str())
    }

    /// Directory of this build relative to the builds root: `<id>/<arch>`.
    #[must_use]
    pub fn relative_dir(&self) -> String {
        format!("{}/{}", self.build_id, self.arch)
    }
}

/// Reads `builds.json` from the builds root.
///
/// # Errors
///
/// Returns [`Error::Manifest`] if the file is missing or malformed.
pub fn read_index(fs: &dyn FileSystem, builds_dir: &Path) -> Result<BuildsIndex> {
    let path = builds_dir.join(BUILDS_JSON);
    let text = fs.read_to_string(&path).map_err(|e| Error::Manifest {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    serde_json::from_str(&text).map_err(|e| Error::Manifest {
        message: format!("failed to parse {}: {e}", path.display()),
    })
}

/// Reads the manifest of `build_id`, or of the latest build for `arch` when
/// `build_id` is `None`.
///
/// # Errors
///
/// Returns [`Error::Manifest`] when no build exists for `arch` or its
/// `meta.json` cannot be read.
pub fn read_build(
    fs: &dyn FileSystem,
    builds_dir: &Path,
    build_id: Option<&str>,
    arch: &str,
) -> Result<BuildManifest> {
    let build_id = match build_id {
        Some(id) => id.to_string(),
        None => read_index(fs, builds_dir)?
            .latest(arch)
            .map(str::to_string)
            .ok_or_else(|| Error::Manifest { message: format!("no builds found for {arch}") })?,
    };
    let path: PathBuf = builds_dir.join(&build_id).join(arch).join(META_JSON);
    let text = fs.read_to_string(&path).map_err(|e| Error::Manifest {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    let mut manifest = BuildManifest::from_meta_json(&text, arch)?;
    if manifest.build_id.is_empty() {
        manifest.build_id = build_id;
    }
    Ok(manifest)
}

/// Returns `true` for build metadata files that are always republished.
#[must_use]
pub fn is_known_build_meta(name: &str) -> bool {
    name == BUILDS_JSON
        || name == "commitmeta.json"
        || name == "ostree-commit-object"
        || name == "coreos-assembler-config-git.json"
        || name.starts_with("manifest-lock.generated")
        || is_meta_json(name)
}

/// Returns `true` for `meta.json` and `meta.<anything>.json`.
#[must_use]
pub fn is_meta_json(name: &str) -> bool {
    name == META_JSON
        || (name.starts_with("meta.") && name.ends_with(".json") && name.len() > "meta..json".len())
}
