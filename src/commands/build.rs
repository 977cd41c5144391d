//! `gangway build` command.

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::launcher::{InProcessLauncher, ProcessLauncher, UnitLauncher, UnitSettings};
use crate::orchestrator::{Orchestrator, Outcome};

/// Execute the `build` command.
///
/// Unit work directories live under `<work_root>/gangway-<run id>` and are
/// removed when the run ends; published files stay in the store.
///
/// # Errors
///
/// Returns an error string describing the first fatal failure.
pub async fn run(
    ctx: &ServiceContext,
    config: &Config,
    separate_processes: bool,
    cancel: &CancelToken,
) -> Result<(), String> {
    let run_id = ctx.id_gen.run_id();
    let run_dir = config.work_root.join(format!("gangway-{run_id}"));
    tracing::info!(run_id = %run_id, arch = %config.arch, srv = %config.srv_dir.display(), "starting build");

    let settings = UnitSettings {
        run_dir: run_dir.clone(),
        env: config.command_env(),
        max_concurrency: config.max_concurrency,
    };
    let launcher: Box<dyn UnitLauncher + '_> = if separate_processes {
        let program = std::env::current_exe()
            .map_err(|e| format!("Failed to locate the gangway executable: {e}"))?;
        Box::new(ProcessLauncher::new(ctx, program, settings))
    } else {
        Box::new(InProcessLauncher::new(ctx, settings))
    };

    let result = Orchestrator::new(ctx, config, &run_dir).run(launcher.as_ref(), cancel).await;
    if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
        tracing::debug!(dir = %run_dir.display(), error = %e, "run directory not removed");
    }

    match result.map_err(|e| e.to_string())? {
        Outcome::NoWork => println!("No work defined."),
        Outcome::Completed { units } => println!("Build finished: {units} execution unit(s)."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_runs_stages_and_cleans_up() {
        let srv = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(
            srv.path().join("jobspec.yaml"),
            "stages:\n  - id: hello\n    commands: [\"echo hello > $COSA_SRV_DIR/hello.txt\"]\n",
        )
        .unwrap();
        let config = Config {
            srv_dir: srv.path().to_path_buf(),
            work_root: work.path().to_path_buf(),
            ..Config::default()
        };
        let ctx = ServiceContext::live(&config);
        run(&ctx, &config, false, &CancelToken::new()).await.unwrap();
        assert!(srv.path().join("hello.txt").is_file());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failing_build_reports_stage() {
        let srv = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(srv.path().join("jobspec.yaml"), "stages:\n  - id: broken\n    commands: [exit 4]\n")
            .unwrap();
        let config = Config {
            srv_dir: srv.path().to_path_buf(),
            work_root: work.path().to_path_buf(),
            ..Config::default()
        };
        let ctx = ServiceContext::live(&config);
        let err = run(&ctx, &config, false, &CancelToken::new()).await.unwrap_err();
        assert!(err.contains("broken"));
        assert!(err.contains("exit code 4"));
    }
}
