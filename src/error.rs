//! Error types for build orchestration.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The phase of a stage in which a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Serial commands run before the main commands.
    Prep,
    /// The stage's main commands.
    Main,
    /// Serial commands run after the main commands succeeded.
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prep => "prep",
            Self::Main => "main",
            Self::Post => "post",
        })
    }
}

/// Why a single command counted as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The process exited with a non-zero status.
    Exit(i32),
    /// The process was terminated by a signal.
    Signal,
    /// The command template could not be rendered.
    Render(String),
    /// The process could not be started.
    Spawn(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => write!(f, "exit code {code}"),
            Self::Signal => f.write_str("terminated by signal"),
            Self::Render(msg) => write!(f, "render error: {msg}"),
            Self::Spawn(msg) => write!(f, "failed to start: {msg}"),
        }
    }
}

/// One failed command inside a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Position of the command within its phase.
    pub index: usize,
    /// What went wrong.
    pub reason: FailureReason,
}

fn describe(failures: &[CommandFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} ({})", f.index, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur while loading, planning, or running a build.
#[derive(Debug, Error)]
pub enum Error {
    /// A template had invalid syntax or referenced an unknown field.
    #[error("template error: {message}")]
    Template {
        /// Description of the render failure.
        message: String,
    },

    /// One or more commands of a stage failed.
    #[error("stage {stage:?} failed in {phase} phase: {}", describe(failures))]
    StageFailed {
        /// ID of the failed stage.
        stage: String,
        /// Phase in which the failure happened.
        phase: Phase,
        /// Every failing command, ordered by index.
        failures: Vec<CommandFailure>,
    },

    /// A stage declared an artifact the build manifest does not provide.
    #[error("stage {stage:?} requires artifact {artifact:?} which is not in the build manifest")]
    MissingArtifact {
        /// ID of the stage declaring the dependency.
        stage: String,
        /// Name of the missing artifact type.
        artifact: String,
    },

    /// The requested object does not exist in the store.
    #[error("object {bucket}/{key} not found")]
    NotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Key that was requested.
        key: String,
    },

    /// The object already exists and overwriting was not allowed.
    #[error("object {bucket}/{key} already exists")]
    Conflict {
        /// Bucket holding the object.
        bucket: String,
        /// Key of the existing object.
        key: String,
    },

    /// Neither a local job specification nor a clonable remote source exists.
    #[error("no job specification found at {}", path.display())]
    JobSpecNotFound {
        /// Local path that was checked.
        path: PathBuf,
    },

    /// The job specification failed to parse or validate.
    #[error("invalid job specification: {message}")]
    InvalidJobSpec {
        /// Description of the problem.
        message: String,
    },

    /// A build manifest could not be read.
    #[error("build manifest error: {message}")]
    Manifest {
        /// Description of the problem.
        message: String,
    },

    /// The object store failed for a reason other than a missing or existing key.
    #[error("object store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// Configuration input was malformed.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// An execution unit running in a separate process failed.
    #[error("execution unit {unit} failed: {reason}")]
    UnitFailed {
        /// Index of the unit in partition order.
        unit: usize,
        /// How the unit process ended.
        reason: FailureReason,
    },

    /// The run was cancelled before the work could finish.
    #[error("cancelled while running stage {stage:?}")]
    Cancelled {
        /// Stage that was running or about to run.
        stage: String,
    },

    /// Local I/O failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an I/O error with a short description of the attempted operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Returns the failing command indices of a [`Error::StageFailed`], if any.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        match self {
            Self::StageFailed { failures, .. } => failures.iter().map(|f| f.index).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failed_lists_every_index() {
        let err = Error::StageFailed {
            stage: "build".into(),
            phase: Phase::Main,
            failures: vec![
                CommandFailure { index: 1, reason: FailureReason::Exit(1) },
                CommandFailure { index: 3, reason: FailureReason::Signal },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("main phase"));
        assert!(msg.contains("#1 (exit code 1)"));
        assert!(msg.contains("#3 (terminated by signal)"));
        assert_eq!(err.failed_indices(), vec![1, 3]);
    }

    #[test]
    fn failed_indices_empty_for_other_errors() {
        let err = Error::NotFound { bucket: "builds".into(), key: "x".into() };
        assert!(err.failed_indices().is_empty());
        assert_eq!(err.to_string(), "object builds/x not found");
    }
}
