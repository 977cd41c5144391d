//! Turning a rendered template into a process invocation, and its exit into a verdict.

use std::path::PathBuf;

use crate::error::FailureReason;
use crate::ports::shell::{split_words, CommandLine, ExitOutcome};

/// Process settings shared by every command of a stage.
#[derive(Debug, Clone, Default)]
pub struct ProcessSettings {
    /// Extra environment for each command.
    pub env: Vec<(String, String)>,
    /// Working directory for each command.
    pub cwd: Option<PathBuf>,
}

/// Builds the invocation for one rendered command.
///
/// Direct commands are split into words and executed as-is; everything else
/// runs as a strict bash snippet.
pub fn command_line(
    rendered: &str,
    direct: bool,
    settings: &ProcessSettings,
) -> Result<CommandLine, FailureReason> {
    let cmd = if direct {
        let words = split_words(rendered)
            .ok_or_else(|| FailureReason::Render(format!("unbalanced quotes in {rendered:?}")))?;
        CommandLine::direct(words)
            .ok_or_else(|| FailureReason::Render("empty command".to_string()))?
    } else {
        CommandLine::shell(rendered)
    };
    Ok(cmd.with_env(&settings.env).with_cwd(settings.cwd.clone()))
}

/// Maps a process result onto a failure, or `None` on success.
pub fn verdict(result: std::io::Result<ExitOutcome>) -> Option<FailureReason> {
    match result {
        Ok(ExitOutcome::Code(0)) => None,
        Ok(ExitOutcome::Code(code)) => Some(FailureReason::Exit(code)),
        Ok(ExitOutcome::Signaled) => Some(FailureReason::Signal),
        Err(e) => Some(FailureReason::Spawn(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_commands_are_wrapped() {
        let cmd = command_line("echo hi | wc -l", false, &ProcessSettings::default()).unwrap();
        assert_eq!(cmd.program, "/bin/bash");
        assert_eq!(cmd.args.last().map(String::as_str), Some("echo hi | wc -l"));
    }

    #[test]
    fn direct_commands_are_split() {
        let settings = ProcessSettings { env: vec![("A".into(), "1".into())], cwd: None };
        let cmd = command_line("/bin/bash -xeu -o pipefail 'source/a b.sh'", true, &settings)
            .unwrap();
        assert_eq!(cmd.program, "/bin/bash");
        assert_eq!(cmd.args, vec!["-xeu", "-o", "pipefail", "source/a b.sh"]);
        assert_eq!(cmd.env, settings.env);
    }

    #[test]
    fn blank_direct_command_is_a_render_failure() {
        let err = command_line("   ", true, &ProcessSettings::default()).unwrap_err();
        assert!(matches!(err, FailureReason::Render(_)));
    }

    #[test]
    fn verdicts() {
        assert_eq!(verdict(Ok(ExitOutcome::Code(0))), None);
        assert_eq!(verdict(Ok(ExitOutcome::Code(3))), Some(FailureReason::Exit(3)));
        assert_eq!(verdict(Ok(ExitOutcome::Signaled)), Some(FailureReason::Signal));
        let spawn = verdict(Err(std::io::Error::from(std::io::ErrorKind::NotFound)));
        assert!(matches!(spawn, Some(FailureReason::Spawn(_))));
    }
}
