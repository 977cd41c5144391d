//! `gangway run-scripts` command.

use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::ports::shell::{CommandLine, ExitOutcome, SHELL};
use crate::spec::render;

/// Execute the `run-scripts` command.
///
/// Scripts are rendered against the job specification and run in order with
/// `bash -x`; the first failing script stops the run.
///
/// # Errors
///
/// Returns an error string naming the script that could not be read,
/// rendered, or run successfully.
pub async fn run(
    ctx: &ServiceContext,
    config: &Config,
    spec: Option<&Path>,
    files: &[PathBuf],
    cancel: &CancelToken,
) -> Result<(), String> {
    let jobspec = super::template_context(ctx, config, spec)?;
    let env = config.command_env();
    for file in files {
        let text = ctx
            .fs
            .read_to_string(file)
            .map_err(|e| format!("Failed to read script {}: {e}", file.display()))?;
        let script = render(&text, &jobspec)
            .map_err(|e| format!("Failed to render script {}: {e}", file.display()))?;
        tracing::info!(script = %file.display(), "running script");

        let cmd = script_command(&script).with_env(&env);
        match ctx.shell.run(&cmd, cancel).await {
            Ok(ExitOutcome::Code(0)) => {}
            Ok(ExitOutcome::Code(code)) => {
                return Err(format!("Script {} exited with code {code}", file.display()))
            }
            Ok(ExitOutcome::Signaled) => {
                return Err(format!("Script {} was terminated by a signal", file.display()))
            }
            Err(e) => return Err(format!("Failed to start script {}: {e}", file.display())),
        }
    }
    Ok(())
}

fn script_command(script: &str) -> CommandLine {
    CommandLine {
        program: SHELL.to_string(),
        args: vec!["-x".to_string(), "-c".to_string(), script.to_string()],
        env: Vec::new(),
        cwd: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Config, ServiceContext) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jobspec.yaml"), "job: {name: rhcos}\n").unwrap();
        let config = Config { srv_dir: dir.path().to_path_buf(), ..Config::default() };
        let ctx = ServiceContext::local(dir.path());
        (dir, config, ctx)
    }

    #[test]
    fn scripts_run_under_traced_bash() {
        let cmd = script_command("echo hi");
        assert_eq!(cmd.program, SHELL);
        assert_eq!(cmd.args, vec!["-x", "-c", "echo hi"]);
    }

    #[tokio::test]
    async fn renders_and_runs_in_order() {
        let (dir, config, ctx) = setup();
        let out = dir.path().join("out.txt");
        let first = dir.path().join("1.sh");
        let second = dir.path().join("2.sh");
        std::fs::write(&first, format!("echo {{{{ .Job.BuildName }}}} > {}", out.display())).unwrap();
        std::fs::write(&second, format!("echo second >> {}", out.display())).unwrap();

        run(&ctx, &config, None, &[first, second], &CancelToken::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "rhcos\nsecond\n");
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let (dir, config, ctx) = setup();
        let bad = dir.path().join("bad.sh");
        let never = dir.path().join("never.sh");
        std::fs::write(&bad, "exit 2").unwrap();
        std::fs::write(&never, format!("touch {}", dir.path().join("ran").display())).unwrap();

        let err = run(&ctx, &config, None, &[bad, never], &CancelToken::new()).await.unwrap_err();
        assert!(err.contains("bad.sh"));
        assert!(!dir.path().join("ran").exists());
    }
}
