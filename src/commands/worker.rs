//! `gangway worker` command.

use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::{Config, WORK_ASSIGNMENT_ENV};
use crate::context::ServiceContext;
use crate::partition::WorkAssignment;
use crate::worker::{self, UnitOptions};

/// Execute the `worker` command.
///
/// The assignment comes from `--assignment` or the work assignment variable;
/// the unit builds in `--unit-dir`, or the shared build root when unset.
///
/// # Errors
///
/// Returns an error string if no assignment is available or the unit fails.
pub async fn run(
    ctx: &ServiceContext,
    config: &Config,
    assignment: Option<&Path>,
    unit_dir: Option<&Path>,
    cancel: &CancelToken,
) -> Result<(), String> {
    let json = match assignment {
        Some(path) => ctx
            .fs
            .read_to_string(path)
            .map_err(|e| format!("Failed to read assignment {}: {e}", path.display()))?,
        None => std::env::var(WORK_ASSIGNMENT_ENV)
            .map_err(|_| format!("No work assignment: set {WORK_ASSIGNMENT_ENV} or pass --assignment"))?,
    };
    let assignment = WorkAssignment::from_json(&json).map_err(|e| e.to_string())?;

    let opts = UnitOptions {
        root: unit_dir.map_or_else(|| config.srv_dir.clone(), Path::to_path_buf),
        env: config.command_env(),
        max_concurrency: config.max_concurrency,
    };
    let report = worker::execute(ctx, &assignment, &opts, cancel)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "Unit {} finished: {} uploaded, {} skipped.",
        assignment.index,
        report.uploaded.len(),
        report.skipped.len()
    );
    Ok(())
}
