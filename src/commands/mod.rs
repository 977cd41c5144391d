//! Command dispatch and handlers.

pub mod build;
pub mod plan;
pub mod run;
pub mod run_scripts;
pub mod worker;

use std::path::Path;

use crate::cancel::CancelToken;
use crate::cli::{Command, GlobalArgs};
use crate::config::Config;
use crate::context::ServiceContext;
use crate::error::Error;
use crate::spec::JobSpec;
use crate::store::JobSpecStore;

/// Dispatch a parsed command to its handler.
///
/// Configuration comes from the environment, with `global` flags taking
/// precedence. Async handlers run on a multi-threaded tokio runtime; SIGINT
/// or SIGTERM cancels the run and terminates child processes.
///
/// # Errors
///
/// Returns an error string if configuration is invalid or the selected
/// command handler fails.
pub fn dispatch(command: &Command, global: &GlobalArgs) -> Result<(), String> {
    let config = configure(global).map_err(|e| e.to_string())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {e}"))?;

    runtime.block_on(async {
        let ctx = ServiceContext::live(&config);
        let cancel = CancelToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::warn!("shutdown signal received, cancelling run");
            on_signal.cancel();
        });

        match command {
            Command::Build { separate_processes } => {
                build::run(&ctx, &config, *separate_processes, &cancel).await
            }
            Command::Run { spec, args } => {
                run::run(&ctx, &config, spec.as_deref(), args, &cancel).await
            }
            Command::RunScripts { spec, files } => {
                run_scripts::run(&ctx, &config, spec.as_deref(), files, &cancel).await
            }
            Command::Worker { assignment, unit_dir } => {
                worker::run(&ctx, &config, assignment.as_deref(), unit_dir.as_deref(), &cancel)
                    .await
            }
            Command::Plan { json } => plan::run(&ctx, &config, *json).await,
        }
    })
}

/// Resolves on the first SIGINT or SIGTERM. A handler that cannot be
/// installed never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}

/// Loads configuration from the environment and applies flag overrides.
///
/// # Errors
///
/// Returns [`Error::Config`] if an environment value is malformed.
pub fn configure(global: &GlobalArgs) -> Result<Config, Error> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &global.srv_dir {
        config.srv_dir.clone_from(dir);
    }
    if let Some(file) = &global.jobspec_file {
        config.jobspec_file.clone_from(file);
    }
    if let Some(arch) = &global.arch {
        config.arch = crate::config::builder_arch(Some(arch));
    }
    if let Some(n) = global.max_concurrency {
        config.max_concurrency = usize::try_from(n).ok();
    }
    Ok(config)
}

/// Loads the template context for single-command and script modes.
///
/// An explicit file wins; otherwise the usual local lookup applies, and a
/// missing specification yields an empty one.
fn template_context(
    ctx: &ServiceContext,
    config: &Config,
    explicit: Option<&Path>,
) -> Result<JobSpec, String> {
    if let Some(path) = explicit {
        let text = ctx
            .fs
            .read_to_string(path)
            .map_err(|e| format!("Failed to read job specification {}: {e}", path.display()))?;
        return JobSpec::from_yaml(&text).map_err(|e| e.to_string());
    }
    let local_only = Config { jobspec_url: None, ..config.clone() };
    match JobSpecStore::new(ctx, &local_only).load(&config.srv_dir) {
        Ok(loaded) => Ok(loaded.spec),
        Err(Error::JobSpecNotFound { .. }) => Ok(JobSpec::default()),
        Err(e) => Err(e.to_string()),
    }
}
