//! Live git adapter using `git` CLI commands.

use std::path::Path;
use std::process::Command;

use crate::ports::git::GitRepo;

/// Live git adapter that shells out to the `git` CLI.
pub struct LiveGitRepo;

impl GitRepo for LiveGitRepo {
    fn clone_into(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--depth=1"]);
        if !git_ref.is_empty() {
            cmd.args(["--branch", git_ref]);
        }
        let output = cmd.arg(url).arg(dest).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("git clone {url} failed: {stderr}").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_of_missing_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-repo");
        let result = LiveGitRepo.clone_into(
            missing.to_str().unwrap(),
            "",
            &dir.path().join("checkout"),
        );
        assert!(result.is_err());
    }
}
