//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI parser for `gangway`.
#[derive(Debug, Parser)]
#[command(name = "gangway", version, about = "Run staged image builds across execution units")]
pub struct Cli {
    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for values otherwise read from the environment.
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Shared build root (overrides `COSA_SRV_DIR`).
    #[arg(long, global = true, value_name = "DIR")]
    pub srv_dir: Option<PathBuf>,
    /// Job specification file name (overrides `COSA_JOBSPEC_FILE`).
    #[arg(long, global = true, value_name = "FILE")]
    pub jobspec_file: Option<String>,
    /// Build architecture (overrides `COSA_FORCE_ARCH`).
    #[arg(long, global = true)]
    pub arch: Option<String>,
    /// Cap on concurrent commands per stage (overrides `COSA_MAX_CONCURRENCY`).
    #[arg(long, global = true, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_concurrency: Option<u64>,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every stage of the job, one execution unit at a time.
    Build {
        /// Run each unit as a separate worker process.
        #[arg(long)]
        separate_processes: bool,
    },
    /// Render each argument against the job specification, then execute it.
    Run {
        /// Job specification to render against.
        #[arg(long, value_name = "FILE")]
        spec: Option<PathBuf>,
        /// Command and arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Render each script against the job specification and run it with `bash -x`.
    RunScripts {
        /// Job specification to render against.
        #[arg(long, value_name = "FILE")]
        spec: Option<PathBuf>,
        /// Scripts to run, in order.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Execute one work assignment (used by `build --separate-processes`).
    Worker {
        /// Read the assignment from this file instead of `COSA_WORK_POD_JSON`.
        #[arg(long, value_name = "FILE")]
        assignment: Option<PathBuf>,
        /// Build root for this unit; defaults to the shared build root.
        #[arg(long, value_name = "DIR")]
        unit_dir: Option<PathBuf>,
    },
    /// Show how the job would be split into execution units.
    Plan {
        /// Print the work assignments as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;

    #[test]
    fn parses_build_subcommand() {
        let cli = Cli::parse_from(["gangway", "build", "--separate-processes"]);
        assert!(matches!(cli.command, Command::Build { separate_processes: true }));
    }

    #[test]
    fn run_keeps_hyphenated_arguments() {
        let cli = Cli::parse_from(["gangway", "run", "cosa", "build", "--force", "{{ .Job.BuildName }}"]);
        match cli.command {
            Command::Run { spec, args } => {
                assert!(spec.is_none());
                assert_eq!(args, vec!["cosa", "build", "--force", "{{ .Job.BuildName }}"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_overrides_follow_subcommand() {
        let cli = Cli::parse_from(["gangway", "plan", "--srv-dir", "/tmp/srv", "--max-concurrency", "3"]);
        assert_eq!(cli.global.srv_dir.as_deref(), Some(std::path::Path::new("/tmp/srv")));
        assert_eq!(cli.global.max_concurrency, Some(3));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Cli::try_parse_from(["gangway", "build", "--max-concurrency", "0"]).is_err());
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["gangway", "run"]).is_err());
    }
}
