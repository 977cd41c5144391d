//! Execution-unit partitioning and the work assignments handed to each unit.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::BuildManifest;
use crate::resolve::resolve;
use crate::shuttle::{PublishTarget, RemoteFile};
use crate::spec::{JobSpec, Stage};

/// Groups stage ids into execution units.
///
/// Stage 0 always lands in unit 0, even when it asks for its own pod. Each
/// later stage with `own_pod` opens a new unit if the current one is
/// non-empty; every other stage joins the current unit.
#[must_use]
pub fn partition(stages: &[Stage]) -> Vec<Vec<String>> {
    let mut units: Vec<Vec<String>> = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        let open_new = match units.last() {
            None => true,
            Some(current) => i > 0 && stage.own_pod && !current.is_empty(),
        };
        if open_new {
            units.push(Vec::new());
        }
        if let Some(current) = units.last_mut() {
            current.push(stage.id.clone());
        }
    }
    units
}

/// The work one execution unit performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAssignment {
    /// Position of the unit in partition order.
    pub index: usize,
    /// Stage ids to run, in order.
    pub stage_ids: Vec<String>,
    /// The job specification the stages belong to.
    pub jobspec: JobSpec,
    /// Files to stage in before the first stage starts.
    #[serde(default)]
    pub remote_files: Vec<RemoteFile>,
    /// Where outputs go once the stages finish.
    pub publish: PublishTarget,
}

impl WorkAssignment {
    /// Splits the stages of `spec` into ordered assignments publishing for `arch`.
    #[must_use]
    pub fn plan(spec: &JobSpec, arch: &str) -> Vec<Self> {
        partition(&spec.stages)
            .into_iter()
            .enumerate()
            .map(|(index, stage_ids)| Self {
                index,
                stage_ids,
                jobspec: spec.clone(),
                remote_files: Vec::new(),
                publish: PublishTarget::builds(arch),
            })
            .collect()
    }

    /// Looks up this unit's stages in its job specification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if an id has no matching stage.
    pub fn stages(&self) -> Result<Vec<&Stage>> {
        self.stage_ids
            .iter()
            .map(|id| {
                self.jobspec.stage(id).ok_or_else(|| Error::InvalidJobSpec {
                    message: format!("unit {} names unknown stage {id:?}", self.index),
                })
            })
            .collect()
    }

    /// Adds `common` files and every stage's resolved artifacts to the
    /// stage-in list, skipping duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArtifact`] if any stage's requirement cannot be met.
    pub fn attach_inputs(
        &mut self,
        common: &[RemoteFile],
        manifest: std::result::Result<&BuildManifest, &Error>,
    ) -> Result<()> {
        let mut files: Vec<RemoteFile> = common.to_vec();
        for stage in self.stages()? {
            files.extend(resolve(stage, manifest)?);
        }
        let mut seen: HashSet<(String, String)> =
            self.remote_files.iter().map(|f| (f.bucket.clone(), f.key.clone())).collect();
        for file in files {
            if seen.insert((file.bucket.clone(), file.key.clone())) {
                self.remote_files.push(file);
            }
        }
        Ok(())
    }

    /// Serializes for the worker environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::InvalidJobSpec { message: format!("encode assignment: {e}") })
    }

    /// Parses an assignment handed to a worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidJobSpec { message: format!("decode assignment: {e}") })
    }
}
