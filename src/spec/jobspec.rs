//! Root job specification type.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::stage::{build_command, Stage};
use crate::error::{Error, Result};

/// Job-level knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Name of the build, e.g. `rhcos-4.7`.
    #[serde(default, alias = "name")]
    pub build_name: String,
    /// When set, only explicitly defined stages run; nothing is discovered.
    #[serde(default, alias = "strict")]
    pub strict_mode: bool,
}

/// Where to fetch the build recipe from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// URL of the recipe repository.
    #[serde(default)]
    pub git_url: String,
    /// Branch or ref to check out.
    #[serde(default)]
    pub git_ref: String,
}

/// Declarative description of every stage of one build job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job options.
    #[serde(default)]
    pub job: Job,
    /// Recipe location.
    #[serde(default)]
    pub recipe: Recipe,
    /// Stages in execution order.
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl JobSpec {
    /// Parses a job specification from YAML and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if the YAML is malformed or stage IDs collide.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut spec: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::InvalidJobSpec { message: e.to_string() })?;
        spec.normalize()?;
        Ok(spec)
    }

    /// Serializes the job specification to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::InvalidJobSpec { message: e.to_string() })
    }

    /// Fills in missing stage IDs and checks that every ID is unique.
    ///
    /// A stage without an ID becomes `stage-<n>` after its position, with a
    /// `-<k>` suffix when an explicit ID already uses that name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] naming the first duplicated ID or
    /// unknown build artifact.
    pub fn normalize(&mut self) -> Result<()> {
        let mut taken: HashSet<String> = self
            .stages
            .iter()
            .filter(|s| !s.id.trim().is_empty())
            .map(|s| s.id.clone())
            .collect();
        for (n, stage) in self.stages.iter_mut().enumerate() {
            if stage.id.trim().is_empty() {
                let base = format!("stage-{n}");
                let mut id = base.clone();
                let mut k = 1;
                while taken.contains(&id) {
                    id = format!("{base}-{k}");
                    k += 1;
                }
                taken.insert(id.clone());
                stage.id = id;
            }
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                return Err(Error::InvalidJobSpec {
                    message: format!("duplicate stage id {:?}", stage.id),
                });
            }
            if let Some(name) = stage.build_artifacts.iter().find(|n| build_command(n).is_none()) {
                return Err(Error::InvalidJobSpec {
                    message: format!("stage {:?}: {name:?} is not a buildable artifact", stage.id),
                });
            }
        }
        Ok(())
    }

    /// Returns the stage with the matching ID.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Appends a stage, refusing one whose ID is already taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if the ID is already in use.
    pub fn push_stage(&mut self, stage: Stage) -> Result<()> {
        if self.stage(&stage.id).is_some() {
            return Err(Error::InvalidJobSpec {
                message: format!("duplicate stage id {:?}", stage.id),
            });
        }
        self.stages.push(stage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
job:
  build_name: rhcos-4.7
  strict: false
recipe:
  git_url: https://example.com/config.git
  git_ref: main
stages:
  - id: base
    description: Base build
    commands:
      - cosa fetch
      - cosa build
  - description: Concurrent work
    concurrent: true
    own_pod: true
    require_artifacts: [ostree, qemu]
    prep_commands: [touch prep]
    commands: [echo a, echo b]
    post_commands: [test -f prep]
";

    #[test]
    fn parses_full_document() {
        let spec = JobSpec::from_yaml(SAMPLE).unwrap();
        assert_eq!(spec.job.build_name, "rhcos-4.7");
        assert!(!spec.job.strict_mode);
        assert_eq!(spec.recipe.git_ref, "main");
        assert_eq!(spec.stages.len(), 2);

        let second = &spec.stages[1];
        assert_eq!(second.id, "stage-1");
        assert!(second.concurrent_execution);
        assert!(second.own_pod);
        assert!(!second.direct_exec);
        assert_eq!(second.require_artifacts, vec!["ostree", "qemu"]);
        assert_eq!(second.prep_commands, vec!["touch prep"]);
        assert_eq!(second.post_commands, vec!["test -f prep"]);
    }

    #[test]
    fn accepts_short_job_field_names() {
        let spec = JobSpec::from_yaml("job: {name: fcos, strict_mode: true}\n").unwrap();
        assert_eq!(spec.job.build_name, "fcos");
        assert!(spec.job.strict_mode);
        assert!(spec.stages.is_empty());
    }

    #[test]
    fn rejects_duplicate_stage_ids() {
        let yaml = "stages:\n  - id: a\n    commands: [echo]\n  - id: a\n    commands: [echo]\n";
        let err = JobSpec::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate stage id"));
    }

    #[test]
    fn generated_ids_avoid_explicit_ones() {
        let yaml = "stages:\n  - id: stage-1\n    commands: [a]\n  - commands: [b]\n  - commands: [c]\n";
        let spec = JobSpec::from_yaml(yaml).unwrap();
        let ids: Vec<&str> = spec.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["stage-1", "stage-1-1", "stage-2"]);
    }

    #[test]
    fn rejects_unknown_build_artifact() {
        let yaml = "stages:\n  - id: b\n    build_artifacts: [base, floppy]\n";
        let err = JobSpec::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("floppy"));
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(JobSpec::from_yaml("stages: ["), Err(Error::InvalidJobSpec { .. })));
    }

    #[test]
    fn push_stage_refuses_taken_id() {
        let mut spec = JobSpec::from_yaml(SAMPLE).unwrap();
        let dup = Stage { id: "base".into(), ..Stage::default() };
        assert!(spec.push_stage(dup).is_err());
        let fresh = Stage { id: "envVar".into(), ..Stage::default() };
        spec.push_stage(fresh).unwrap();
        assert!(spec.stage("envVar").is_some());
    }

    #[test]
    fn yaml_output_parses_back() {
        let spec = JobSpec::from_yaml(SAMPLE).unwrap();
        let again = JobSpec::from_yaml(&spec.to_yaml().unwrap()).unwrap();
        assert_eq!(spec, again);
    }
}
