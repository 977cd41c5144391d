//! Build orchestrator: loads the job, partitions it, and drives every unit in order.

use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::launcher::UnitLauncher;
use crate::manifest::{self, BuildManifest, BUILDS_JSON, META_JSON};
use crate::partition::WorkAssignment;
use crate::shuttle::{RemoteFile, BUILDS_BUCKET, SOURCE_BUCKET};
use crate::spec::JobSpec;
use crate::store::{JobSpecStore, LoadedSpec};

/// Logged when a run has nothing to do.
pub const NO_WORK_HELP: &str = "No work to do. Please define one of the following:
    - 'COSA_CMDS' environment variable with the commands to execute
    - Job specification stages in your job specification file
    - Files ending in .cosa.sh beside the job specification";

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No stages, no ad-hoc command, and no job specification.
    NoWork,
    /// Every unit finished.
    Completed {
        /// Number of units run.
        units: usize,
    },
}

/// A job ready to run: the final stage list and the files every unit needs.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    /// Job specification including discovered stages.
    pub spec: JobSpec,
    /// Files staged into every unit (scripts, payload).
    pub common: Vec<RemoteFile>,
}

/// Wires the store, partitioner, resolver, and launchers together for one run.
pub struct Orchestrator<'a> {
    ctx: &'a ServiceContext,
    config: &'a Config,
    run_dir: PathBuf,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator whose scratch space lives under `run_dir`.
    #[must_use]
    pub fn new(ctx: &'a ServiceContext, config: &'a Config, run_dir: &Path) -> Self {
        Self { ctx, config, run_dir: run_dir.to_path_buf() }
    }

    /// Loads the job specification, or an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns any load error other than [`Error::JobSpecNotFound`].
    pub fn load(&self) -> Result<LoadedSpec> {
        let store = JobSpecStore::new(self.ctx, self.config);
        match store.load(&self.run_dir.join("jobspec")) {
            Ok(loaded) => Ok(loaded),
            Err(Error::JobSpecNotFound { path }) => {
                tracing::info!(path = %path.display(), "no job specification, relying on discovery");
                Ok(LoadedSpec { spec: JobSpec::default(), dir: self.config.srv_dir.clone() })
            }
            Err(e) => Err(e),
        }
    }

    /// Loads, applies any payload, and discovers implied stages.
    ///
    /// With `upload` false nothing is written to the store; the returned
    /// common files are the ones that would be uploaded.
    ///
    /// # Errors
    ///
    /// Returns load, discovery, or upload errors.
    pub async fn prepare(&self, upload: bool) -> Result<PreparedJob> {
        let LoadedSpec { mut spec, dir } = self.load()?;
        let mut common = Vec::new();

        if let Some(payload) = &self.config.source_archive {
            if is_yaml(payload) {
                tracing::info!(path = %payload.display(), "job specification delivered as payload");
                let text = self.ctx.fs.read_to_string(payload).map_err(|e| {
                    Error::io(format!("read {}", payload.display()), std::io::Error::other(e))
                })?;
                spec = JobSpec::from_yaml(&text)?;
            } else {
                let name = payload
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| Error::Config {
                        message: format!("payload {} has no file name", payload.display()),
                    })?;
                let mut file = RemoteFile::new(SOURCE_BUCKET, &name);
                file.compressed = true;
                if upload {
                    self.ctx.store.ensure_bucket(SOURCE_BUCKET).await?;
                    self.ctx.store.put(SOURCE_BUCKET, &name, payload, true).await?;
                }
                common.push(file);
            }
        }

        let store = JobSpecStore::new(self.ctx, self.config);
        let scripts = store.discover(&mut spec, &dir)?;
        if upload {
            common.extend(store.upload_scripts(&scripts).await?);
        } else {
            common.extend(scripts.into_iter().map(|s| s.remote));
        }
        Ok(PreparedJob { spec, common })
    }

    /// Runs the whole job, one unit at a time, halting at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. Files already uploaded stay in the store.
    pub async fn run(&self, launcher: &dyn UnitLauncher, cancel: &CancelToken) -> Result<Outcome> {
        let job = self.prepare(true).await?;
        if job.spec.stages.is_empty() {
            tracing::info!("{NO_WORK_HELP}");
            return Ok(Outcome::NoWork);
        }

        self.ctx.store.ensure_bucket(BUILDS_BUCKET).await?;
        let plan = WorkAssignment::plan(&job.spec, &self.config.arch);
        tracing::info!(units = plan.len(), stages = job.spec.stages.len(), "partitioned job");

        for mut assignment in plan.iter().cloned() {
            let unit = assignment.index;
            if cancel.is_cancelled() {
                let stage = assignment.stage_ids.first().cloned().unwrap_or_default();
                return Err(Error::Cancelled { stage });
            }

            // Re-read every time: an earlier unit may have published a build.
            let build = self.fetch_base_build().await;
            let mut inputs = job.common.clone();
            if let Ok(m) = &build {
                tracing::info!(unit, build_id = %m.build_id, "using base build");
                inputs.push(RemoteFile::new(BUILDS_BUCKET, BUILDS_JSON));
                inputs.push(RemoteFile::new(
                    BUILDS_BUCKET,
                    &format!("{}/{META_JSON}", m.relative_dir()),
                ));
            }

            let result = match assignment.attach_inputs(&inputs, build.as_ref()) {
                Ok(()) => launcher.launch(&assignment, cancel).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                log_failure(unit, &e);
                return Err(e);
            }
        }
        Ok(Outcome::Completed { units: plan.len() })
    }

    /// Downloads `builds.json` and the latest build's `meta.json` from the
    /// store into the run directory and parses them.
    async fn fetch_base_build(&self) -> Result<BuildManifest> {
        let arch = &self.config.arch;
        let local = self.run_dir.join("base").join(BUILDS_BUCKET);
        self.ctx.store.get(BUILDS_BUCKET, BUILDS_JSON, &local.join(BUILDS_JSON)).await?;
        let index = manifest::read_index(self.ctx.fs.as_ref(), &local)?;
        let build_id = index
            .latest(arch)
            .ok_or_else(|| Error::Manifest { message: format!("no builds found for {arch}") })?;
        let key = format!("{build_id}/{arch}/{META_JSON}");
        self.ctx.store.get(BUILDS_BUCKET, &key, &local.join(&key)).await?;
        manifest::read_build(self.ctx.fs.as_ref(), &local, Some(build_id), arch)
    }
}

fn log_failure(unit: usize, error: &Error) {
    match error {
        Error::StageFailed { stage, phase, failures } => {
            for failure in failures {
                tracing::error!(
                    unit,
                    stage = %stage,
                    %phase,
                    index = failure.index,
                    reason = %failure.reason,
                    "unit failed"
                );
            }
        }
        Error::MissingArtifact { stage, artifact } => {
            tracing::error!(unit, stage = %stage, artifact = %artifact, "unit cannot start");
        }
        other => tracing::error!(unit, error = %other, "unit failed"),
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e == "yaml" || e == "yml")
}
