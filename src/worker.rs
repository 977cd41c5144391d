//! Execution of one work assignment inside an execution unit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::manifest::META_JSON;
use crate::partition::WorkAssignment;
use crate::shuttle::{self, PublishReport, RemoteFile, BUILDS_BUCKET};
use crate::stage::{ProcessSettings, StageContext, StageMachine};

/// How a unit lays out and runs its work.
#[derive(Debug, Clone, Default)]
pub struct UnitOptions {
    /// Build root of the unit; commands run here and outputs are published from here.
    pub root: PathBuf,
    /// Extra environment for every command.
    pub env: Vec<(String, String)>,
    /// Optional cap on concurrent commands within a stage.
    pub max_concurrency: Option<usize>,
}

/// Stages in the assignment's files, runs its stages in order, then publishes.
///
/// A stage's `return_files` are uploaded to the cache bucket once it succeeds.
///
/// # Errors
///
/// Returns the first stage-in, stage, return, or publish error. Stages after
/// a failed one never start.
pub async fn execute(
    ctx: &ServiceContext,
    assignment: &WorkAssignment,
    opts: &UnitOptions,
    cancel: &CancelToken,
) -> Result<PublishReport> {
    let unit = assignment.index;
    let stages = assignment.stages()?;
    tokio::fs::create_dir_all(&opts.root)
        .await
        .map_err(|e| Error::io(format!("create unit root {}", opts.root.display()), e))?;
    tracing::info!(unit, root = %opts.root.display(), stages = ?assignment.stage_ids, "starting unit");

    shuttle::stage_in(
        ctx.store.as_ref(),
        ctx.shell.as_ref(),
        cancel,
        &assignment.remote_files,
        &opts.root,
    )
    .await?;
    if let Some(build_id) = base_build_id(&assignment.remote_files) {
        link_latest(&opts.root, build_id)?;
    }

    let stage_ctx = StageContext {
        shell: Arc::clone(&ctx.shell),
        jobspec: Arc::new(assignment.jobspec.clone()),
        settings: ProcessSettings { env: opts.env.clone(), cwd: Some(opts.root.clone()) },
        max_concurrency: opts.max_concurrency,
        cancel: cancel.clone(),
    };
    for stage in stages {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { stage: stage.id.clone() });
        }
        tracing::info!(unit, stage = %stage.id, "running stage");
        StageMachine::new(stage).execute(&stage_ctx).await?;
        tracing::info!(unit, stage = %stage.id, "stage succeeded");
        shuttle::return_files(ctx.store.as_ref(), &opts.root, &stage.return_files).await?;
    }

    shuttle::publish(
        ctx.fs.as_ref(),
        ctx.store.as_ref(),
        &opts.root,
        &assignment.publish,
        &assignment.remote_files,
    )
    .await
}

/// Build id of a staged-in base manifest (`<id>/<arch>/meta.json`).
fn base_build_id(files: &[RemoteFile]) -> Option<&str> {
    files
        .iter()
        .filter(|f| f.bucket == BUILDS_BUCKET)
        .find_map(|f| {
            let mut parts = f.key.split('/');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(_arch), Some(META_JSON), None) => Some(id),
                _ => None,
            }
        })
}

/// Points `builds/latest` at `build_id` unless something already sits there.
fn link_latest(root: &Path, build_id: &str) -> Result<()> {
    let latest = root.join(BUILDS_BUCKET).join("latest");
    if latest.symlink_metadata().is_ok() {
        return Ok(());
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(build_id, &latest)
        .map_err(|e| Error::io(format!("link {}", latest.display()), e))?;
    tracing::debug!(build_id, "linked builds/latest");
    Ok(())
}
