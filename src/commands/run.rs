//! `gangway run` command.

use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::ports::shell::{CommandLine, ExitOutcome};
use crate::spec::{render, JobSpec};

/// Execute the `run` command.
///
/// Each argument is rendered against the job specification and the result
/// is executed directly, without a shell.
///
/// # Errors
///
/// Returns an error string if rendering fails or the command does not exit 0.
pub async fn run(
    ctx: &ServiceContext,
    config: &Config,
    spec: Option<&Path>,
    args: &[String],
    cancel: &CancelToken,
) -> Result<(), String> {
    let jobspec = super::template_context(ctx, config, spec)?;
    let argv = render_args(args, &jobspec)?;
    let cmd = CommandLine::direct(argv)
        .ok_or_else(|| "No command given.".to_string())?
        .with_env(&config.command_env());
    tracing::info!(program = %cmd.program, "running command");

    match ctx.shell.run(&cmd, cancel).await {
        Ok(ExitOutcome::Code(0)) => Ok(()),
        Ok(ExitOutcome::Code(code)) => Err(format!("{} exited with code {code}", cmd.program)),
        Ok(ExitOutcome::Signaled) => Err(format!("{} was terminated by a signal", cmd.program)),
        Err(e) => Err(format!("Failed to start {}: {e}", cmd.program)),
    }
}

fn render_args(args: &[String], jobspec: &JobSpec) -> Result<Vec<String>, String> {
    args.iter()
        .map(|arg| render(arg, jobspec).map_err(|e| e.to_string()))
        .collect()
}
