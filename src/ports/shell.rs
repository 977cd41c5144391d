//! Process runner port for executing external commands.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::cancel::CancelToken;

/// Shell used to run non-direct commands.
pub const SHELL: &str = "/bin/bash";
/// Flags making [`SHELL`] trace commands and stop on the first error.
pub const STRICT_BASH: &str = "-xeu -o pipefail";

/// Boxed future type alias used by [`ShellExecutor`] to keep the trait dyn-compatible.
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<ExitOutcome>> + Send + 'a>>;

/// A fully prepared process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory, if different from the current one.
    pub cwd: Option<PathBuf>,
}

impl CommandLine {
    /// Wraps a shell snippet so it runs under `bash -xeu -o pipefail`.
    #[must_use]
    pub fn shell(snippet: &str) -> Self {
        Self {
            program: SHELL.to_string(),
            args: ["-xeu", "-o", "pipefail", "-c", snippet].map(String::from).to_vec(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Builds a direct invocation from an argument vector.
    ///
    /// Returns `None` if `argv` is empty.
    #[must_use]
    pub fn direct(argv: Vec<String>) -> Option<Self> {
        let mut iter = argv.into_iter();
        let program = iter.next()?;
        Some(Self { program, args: iter.collect(), env: Vec::new(), cwd: None })
    }

    /// Sets the extra environment.
    #[must_use]
    pub fn with_env(mut self, env: &[(String, String)]) -> Self {
        self.env = env.to_vec();
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with the given status code.
    Code(i32),
    /// Killed by a signal, including termination after cancellation.
    Signaled,
}

impl ExitOutcome {
    /// Returns `true` for a zero exit status.
    #[must_use]
    pub fn success(self) -> bool {
        self == Self::Code(0)
    }
}

/// Executes external processes.
///
/// Only the exit status is reported; output streams are inherited by the
/// child and never interpreted.
pub trait ShellExecutor: Send + Sync {
    /// Runs the command to completion, terminating it if `cancel` fires first.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or waited on.
    fn run<'a>(&'a self, command: &'a CommandLine, cancel: &'a CancelToken) -> RunFuture<'a>;
}

/// Splits a fully formed command string into an argument vector.
///
/// Whitespace separates words. Single quotes preserve their content verbatim;
/// double quotes allow `\"` and `\\` escapes; a backslash outside quotes
/// escapes the next character.
///
/// Returns `None` on an unterminated quote.
#[must_use]
pub fn split_words(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        other => word.push(other),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            e @ ('"' | '\\') => word.push(e),
                            other => {
                                word.push('\\');
                                word.push(other);
                            }
                        },
                        other => word.push(other),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    word.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Some(words)
}

/// Quotes `word` so that [`split_words`] yields it back as a single word.
#[must_use]
pub fn quote_word(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_words() {
        assert_eq!(split_words("  /bin/echo a  b ").unwrap(), vec!["/bin/echo", "a", "b"]);
    }

    #[test]
    fn keeps_quoted_words_together() {
        let words = split_words(r#"bash -c 'echo "hi there"' "x \"y\"""#).unwrap();
        assert_eq!(words, vec!["bash", "-c", r#"echo "hi there""#, r#"x "y""#]);
    }

    #[test]
    fn quote_word_survives_split() {
        let cmd = format!("/bin/bash -c {}", quote_word("echo 'a' && echo b"));
        assert_eq!(split_words(&cmd).unwrap(), vec!["/bin/bash", "-c", "echo 'a' && echo b"]);
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(split_words("echo 'oops").is_none());
    }

    #[test]
    fn empty_quotes_make_an_empty_word() {
        assert_eq!(split_words("a '' b").unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn shell_wraps_in_strict_bash() {
        let cmd = CommandLine::shell("echo hi");
        assert_eq!(cmd.program, SHELL);
        assert_eq!(cmd.args.last().unwrap(), "echo hi");
    }

    #[test]
    fn direct_rejects_empty_argv() {
        assert!(CommandLine::direct(Vec::new()).is_none());
    }
}
