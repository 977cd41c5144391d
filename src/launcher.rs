//! Unit launchers: how a work assignment gets an execution unit.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::cancel::CancelToken;
use crate::config::WORK_ASSIGNMENT_ENV;
use crate::context::ServiceContext;
use crate::error::{Error, FailureReason, Result};
use crate::partition::WorkAssignment;
use crate::ports::shell::{CommandLine, ExitOutcome};
use crate::worker::{self, UnitOptions};

/// Boxed future type alias used by [`UnitLauncher`] to keep the trait dyn-compatible.
pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Runs one work assignment to completion in its own execution unit.
pub trait UnitLauncher: Send + Sync {
    /// Launches the unit and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the unit's failure.
    fn launch<'a>(&'a self, assignment: &'a WorkAssignment, cancel: &'a CancelToken)
        -> LaunchFuture<'a>;
}

/// Shared unit settings for both launchers.
#[derive(Debug, Clone, Default)]
pub struct UnitSettings {
    /// Parent of the per-unit build roots (`unit-<n>`).
    pub run_dir: PathBuf,
    /// Environment given to every unit.
    pub env: Vec<(String, String)>,
    /// Optional cap on concurrent commands within a stage.
    pub max_concurrency: Option<usize>,
}

impl UnitSettings {
    fn unit_root(&self, index: usize) -> PathBuf {
        self.run_dir.join(format!("unit-{index}"))
    }
}

/// Runs each unit inside the current process.
pub struct InProcessLauncher<'c> {
    ctx: &'c ServiceContext,
    settings: UnitSettings,
}

impl<'c> InProcessLauncher<'c> {
    /// Creates a launcher sharing `ctx` with the orchestrator.
    #[must_use]
    pub fn new(ctx: &'c ServiceContext, settings: UnitSettings) -> Self {
        Self { ctx, settings }
    }
}

impl UnitLauncher for InProcessLauncher<'_> {
    fn launch<'a>(
        &'a self,
        assignment: &'a WorkAssignment,
        cancel: &'a CancelToken,
    ) -> LaunchFuture<'a> {
        Box::pin(async move {
            let opts = UnitOptions {
                root: self.settings.unit_root(assignment.index),
                env: self.settings.env.clone(),
                max_concurrency: self.settings.max_concurrency,
            };
            let report = worker::execute(self.ctx, assignment, &opts, cancel).await?;
            tracing::info!(
                unit = assignment.index,
                uploaded = report.uploaded.len(),
                skipped = report.skipped.len(),
                "unit finished"
            );
            Ok(())
        })
    }
}

/// Runs each unit as a `worker` child process of the given program.
pub struct ProcessLauncher<'c> {
    ctx: &'c ServiceContext,
    program: PathBuf,
    settings: UnitSettings,
}

impl<'c> ProcessLauncher<'c> {
    /// Creates a launcher that re-executes `program` in worker mode.
    #[must_use]
    pub fn new(ctx: &'c ServiceContext, program: PathBuf, settings: UnitSettings) -> Self {
        Self { ctx, program, settings }
    }

    fn command(&self, assignment: &WorkAssignment) -> Result<CommandLine> {
        let root = self.settings.unit_root(assignment.index);
        let mut env = self.settings.env.clone();
        env.extend(self.ctx.credential_env());
        env.push((WORK_ASSIGNMENT_ENV.to_string(), assignment.to_json()?));
        if let Some(n) = self.settings.max_concurrency {
            env.push(("COSA_MAX_CONCURRENCY".to_string(), n.to_string()));
        }
        let argv = vec![
            self.program.display().to_string(),
            "worker".to_string(),
            "--unit-dir".to_string(),
            root.display().to_string(),
        ];
        CommandLine::direct(argv)
            .map(|cmd| cmd.with_env(&env))
            .ok_or_else(|| Error::Config { message: "empty worker program".to_string() })
    }
}

impl UnitLauncher for ProcessLauncher<'_> {
    fn launch<'a>(
        &'a self,
        assignment: &'a WorkAssignment,
        cancel: &'a CancelToken,
    ) -> LaunchFuture<'a> {
        Box::pin(async move {
            let cmd = self.command(assignment)?;
            tracing::info!(unit = assignment.index, program = %cmd.program, "spawning worker");
            let outcome = self.ctx.shell.run(&cmd, cancel).await;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { stage: format!("unit-{}", assignment.index) });
            }
            let reason = match outcome {
                Ok(ExitOutcome::Code(0)) => return Ok(()),
                Ok(ExitOutcome::Code(code)) => FailureReason::Exit(code),
                Ok(ExitOutcome::Signaled) => FailureReason::Signal,
                Err(e) => FailureReason::Spawn(e.to_string()),
            };
            Err(Error::UnitFailed { unit: assignment.index, reason })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{JobSpec, Stage};

    fn plan() -> Vec<WorkAssignment> {
        let spec = JobSpec {
            stages: vec![
                Stage { id: "a".into(), commands: vec!["touch a".into()], ..Stage::default() },
                Stage {
                    id: "b".into(),
                    own_pod: true,
                    commands: vec!["test ! -e a".into()],
                    ..Stage::default()
                },
            ],
            ..JobSpec::default()
        };
        WorkAssignment::plan(&spec, "x86_64")
    }

    #[tokio::test]
    async fn in_process_units_get_separate_roots() {
        let srv = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        let ctx = ServiceContext::local(srv.path());
        let settings = UnitSettings { run_dir: run.path().to_path_buf(), ..UnitSettings::default() };
        let launcher = InProcessLauncher::new(&ctx, settings);
        let cancel = CancelToken::new();
        for assignment in &plan() {
            launcher.launch(assignment, &cancel).await.unwrap();
        }
        assert!(run.path().join("unit-0/a").exists());
        assert!(!run.path().join("unit-1/a").exists());
    }

    #[test]
    fn worker_command_carries_assignment() {
        let srv = tempfile::tempdir().unwrap();
        let ctx = ServiceContext::local(srv.path());
        let settings = UnitSettings {
            run_dir: PathBuf::from("/work/run"),
            env: vec![("COSA_FORCE_ARCH".into(), "x86_64".into())],
            max_concurrency: Some(2),
        };
        let launcher = ProcessLauncher::new(&ctx, PathBuf::from("/usr/bin/gangway"), settings);
        let assignment = &plan()[1];
        let cmd = launcher.command(assignment).unwrap();
        assert_eq!(cmd.program, "/usr/bin/gangway");
        assert_eq!(cmd.args, vec!["worker", "--unit-dir", "/work/run/unit-1"]);
        let json = cmd.env.iter().find(|(k, _)| k == WORK_ASSIGNMENT_ENV).unwrap();
        assert_eq!(WorkAssignment::from_json(&json.1).unwrap(), *assignment);
        assert!(cmd.env.iter().any(|(k, v)| k == "COSA_MAX_CONCURRENCY" && v == "2"));
    }

    #[tokio::test]
    async fn failing_worker_process_is_unit_failure() {
        let srv = tempfile::tempdir().unwrap();
        let ctx = ServiceContext::local(srv.path());
        let launcher =
            ProcessLauncher::new(&ctx, PathBuf::from("/bin/false"), UnitSettings::default());
        let err = launcher.launch(&plan()[0], &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnitFailed { unit: 0, reason: FailureReason::Exit(1) }));
    }
}
