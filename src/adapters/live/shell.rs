//! Live process runner using `tokio::process::Command`.

use std::process::Stdio;
#[cfg(unix)]
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::cancel::CancelToken;
use crate::ports::shell::{CommandLine, ExitOutcome, RunFuture, ShellExecutor};

/// How long a cancelled process group gets to exit after `SIGTERM`.
#[cfg(unix)]
const TERM_GRACE: Duration = Duration::from_secs(10);

/// Live runner that spawns real child processes.
///
/// Each command leads its own process group so cancellation reaches every
/// process it forked, not only the direct child.
pub struct LiveShellExecutor;

impl ShellExecutor for LiveShellExecutor {
    fn run<'a>(&'a self, command: &'a CommandLine, cancel: &'a CancelToken) -> RunFuture<'a> {
        Box::pin(async move {
            let mut cmd = Command::new(&command.program);
            cmd.args(&command.args)
                .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .kill_on_drop(true);
            #[cfg(unix)]
            cmd.process_group(0);
            if let Some(dir) = &command.cwd {
                cmd.current_dir(dir);
            }

            let mut child = cmd.spawn()?;
            let status = tokio::select! {
                status = child.wait() => status?,
                () = cancel.cancelled() => {
                    tracing::warn!(program = %command.program, "terminating child after cancellation");
                    terminate(&mut child).await?;
                    return Ok(ExitOutcome::Signaled);
                }
            };
            Ok(status.code().map_or(ExitOutcome::Signaled, ExitOutcome::Code))
        })
    }
}

/// Sends `SIGTERM` to the child's process group, then `SIGKILL` to whatever
/// is left once the child exits or the grace period runs out.
#[cfg(unix)]
async fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(group) = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw) else {
        return Ok(());
    };
    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!(error = %e, "SIGTERM to process group failed");
    }
    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
        tracing::warn!(pgid = group.as_raw(), "process group ignored SIGTERM, killing it");
    }
    // Grandchildren can outlive the group leader.
    let _ = killpg(group, Signal::SIGKILL);
    child.wait().await.map(drop)
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.kill().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn runs_echo_command() {
        let shell = LiveShellExecutor;
        let outcome = shell.run(&CommandLine::shell("echo hello"), &CancelToken::new()).await;
        assert!(outcome.unwrap().success());
    }

    #[tokio::test]
    async fn captures_exit_code() {
        let shell = LiveShellExecutor;
        let outcome = shell.run(&CommandLine::shell("exit 42"), &CancelToken::new()).await;
        assert_eq!(outcome.unwrap(), ExitOutcome::Code(42));
    }

    #[tokio::test]
    async fn passes_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandLine::shell("test \"$MOCK_ENV\" = 1 && touch marker")
            .with_env(&[("MOCK_ENV".into(), "1".into())])
            .with_cwd(Some(dir.path().to_path_buf()));
        let outcome = LiveShellExecutor.run(&cmd, &CancelToken::new()).await.unwrap();
        assert!(outcome.success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let cmd = CommandLine::direct(vec!["/nonexistent/program".into()]).unwrap();
        assert!(LiveShellExecutor.run(&cmd, &CancelToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn cancellation_terminates_child() {
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let cmd = CommandLine::direct(vec!["sleep".into(), "30".into()]).unwrap();
        let outcome = LiveShellExecutor.run(&cmd, &token).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Signaled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let cmd = CommandLine::shell("sh -c 'sleep 1; touch mark'; true")
            .with_cwd(Some(dir.path().to_path_buf()));
        let outcome = LiveShellExecutor.run(&cmd, &token).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Signaled);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("mark").exists());
    }
}
