//! Stage machine: runs one stage's prep, main, and post phases.
//!
//! ```text
//! Pending -> RunningPrep -> RunningMain -> RunningPost -> Succeeded
//!                 |              |              |
//!                 +--------------+--------------+--> Failed
//! ```
//!
//! A prep failure skips main and post; a main failure skips post. Nothing is
//! rolled back.

mod command;

pub use command::ProcessSettings;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::error::{CommandFailure, Error, FailureReason, Phase, Result};
use crate::ports::shell::{CommandLine, ShellExecutor};
use crate::spec::{render, JobSpec, Stage};

/// Lifecycle of one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Not started.
    Pending,
    /// Running prep commands.
    RunningPrep,
    /// Running main commands.
    RunningMain,
    /// Running post commands.
    RunningPost,
    /// Every phase completed.
    Succeeded,
    /// A phase failed or the run was cancelled. Terminal.
    Failed,
}

/// Everything a stage needs from its surroundings.
#[derive(Clone)]
pub struct StageContext {
    /// Process runner.
    pub shell: Arc<dyn ShellExecutor>,
    /// Template context for rendering.
    pub jobspec: Arc<JobSpec>,
    /// Environment and working directory for commands.
    pub settings: ProcessSettings,
    /// Optional cap on concurrently running main commands.
    pub max_concurrency: Option<usize>,
    /// Run-wide cancellation.
    pub cancel: CancelToken,
}

/// Drives one stage through its phases and records each state it enters.
pub struct StageMachine<'a> {
    stage: &'a Stage,
    history: Vec<StageState>,
}

impl<'a> StageMachine<'a> {
    /// Creates a machine in the `Pending` state.
    #[must_use]
    pub fn new(stage: &'a Stage) -> Self {
        Self { stage, history: vec![StageState::Pending] }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> StageState {
        self.history.last().copied().unwrap_or(StageState::Pending)
    }

    /// Every state entered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StageState] {
        &self.history
    }

    /// Runs the stage to completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageFailed`] naming the phase and failing command
    /// indices, [`Error::Cancelled`] if the run was cancelled, or
    /// [`Error::InvalidJobSpec`] if the stage has no commands at all.
    pub async fn execute(&mut self, ctx: &StageContext) -> Result<()> {
        if self.state() != StageState::Pending {
            return Err(Error::InvalidJobSpec {
                message: format!("stage {:?} was already executed", self.stage.id),
            });
        }
        if self.stage.is_empty() {
            self.enter(StageState::Failed);
            return Err(Error::InvalidJobSpec {
                message: format!("stage {:?} has no commands", self.stage.id),
            });
        }
        let result = self.run_phases(ctx).await;
        self.enter(if result.is_ok() { StageState::Succeeded } else { StageState::Failed });
        result
    }

    async fn run_phases(&mut self, ctx: &StageContext) -> Result<()> {
        let stage = self.stage;

        self.enter(StageState::RunningPrep);
        run_serial(ctx, stage, Phase::Prep, &stage.prep_commands).await?;

        self.enter(StageState::RunningMain);
        let main = stage.main_commands();
        if stage.concurrent_execution {
            run_concurrent(ctx, stage, &main).await?;
        } else {
            run_serial(ctx, stage, Phase::Main, &main).await?;
        }

        self.enter(StageState::RunningPost);
        run_serial(ctx, stage, Phase::Post, &stage.post_commands).await
    }

    fn enter(&mut self, state: StageState) {
        tracing::debug!(stage = %self.stage.id, ?state, "stage transition");
        self.history.push(state);
    }
}

/// Runs `stage` with a fresh machine.
///
/// # Errors
///
/// See [`StageMachine::execute`].
pub async fn execute(ctx: &StageContext, stage: &Stage) -> Result<()> {
    StageMachine::new(stage).execute(ctx).await
}

fn failed(stage: &Stage, phase: Phase, failures: Vec<CommandFailure>) -> Error {
    Error::StageFailed { stage: stage.id.clone(), phase, failures }
}

fn prepare(
    ctx: &StageContext,
    stage: &Stage,
    template: &str,
) -> std::result::Result<CommandLine, FailureReason> {
    let rendered = render(template, &ctx.jobspec).map_err(|e| match e {
        Error::Template { message } => FailureReason::Render(message),
        other => FailureReason::Render(other.to_string()),
    })?;
    command::command_line(&rendered, stage.direct_exec, &ctx.settings)
}

fn check_cancelled(ctx: &StageContext, stage: &Stage) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled { stage: stage.id.clone() });
    }
    Ok(())
}

async fn run_serial(
    ctx: &StageContext,
    stage: &Stage,
    phase: Phase,
    templates: &[String],
) -> Result<()> {
    for (index, template) in templates.iter().enumerate() {
        check_cancelled(ctx, stage)?;
        let cmd = prepare(ctx, stage, template)
            .map_err(|reason| failed(stage, phase, vec![CommandFailure { index, reason }]))?;
        tracing::info!(stage = %stage.id, %phase, index, "running command");
        let outcome = ctx.shell.run(&cmd, &ctx.cancel).await;
        check_cancelled(ctx, stage)?;
        if let Some(reason) = command::verdict(outcome) {
            tracing::error!(stage = %stage.id, %phase, index, %reason, "command failed");
            return Err(failed(stage, phase, vec![CommandFailure { index, reason }]));
        }
    }
    Ok(())
}

async fn run_concurrent(ctx: &StageContext, stage: &Stage, templates: &[String]) -> Result<()> {
    check_cancelled(ctx, stage)?;

    // Render everything first so a bad template launches nothing.
    let mut commands = Vec::with_capacity(templates.len());
    let mut render_failures = Vec::new();
    for (index, template) in templates.iter().enumerate() {
        match prepare(ctx, stage, template) {
            Ok(cmd) => commands.push((index, cmd)),
            Err(reason) => render_failures.push(CommandFailure { index, reason }),
        }
    }
    if !render_failures.is_empty() {
        return Err(failed(stage, Phase::Main, render_failures));
    }

    let limit = ctx.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let mut tasks = JoinSet::new();
    for (index, cmd) in commands {
        let shell = Arc::clone(&ctx.shell);
        let cancel = ctx.cancel.clone();
        let limit = limit.clone();
        let stage_id = stage.id.clone();
        tasks.spawn(async move {
            let _permit = match limit {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            if cancel.is_cancelled() {
                return (index, Some(FailureReason::Signal));
            }
            tracing::info!(stage = %stage_id, phase = %Phase::Main, index, "running command");
            (index, command::verdict(shell.run(&cmd, &cancel).await))
        });
    }

    let mut pending: Vec<usize> = (0..templates.len()).collect();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, verdict)) => {
                pending.retain(|&i| i != index);
                if let Some(reason) = verdict {
                    tracing::error!(stage = %stage.id, phase = %Phase::Main, index, %reason, "command failed");
                    failures.push(CommandFailure { index, reason });
                }
            }
            Err(e) => tracing::error!(stage = %stage.id, error = %e, "command task aborted"),
        }
    }
    // A task that panicked never reported its index.
    failures.extend(pending.into_iter().map(|index| CommandFailure {
        index,
        reason: FailureReason::Spawn("command task aborted".to_string()),
    }));
    check_cancelled(ctx, stage)?;
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by_key(|f| f.index);
    Err(failed(stage, Phase::Main, failures))
}
