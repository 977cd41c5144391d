//! Git port for fetching remote job specifications.

use std::path::Path;

/// Clones repositories holding job specifications.
pub trait GitRepo: Send + Sync {
    /// Shallow-clones `url` at `git_ref` into `dest`.
    ///
    /// An empty `git_ref` clones the default branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be cloned.
    fn clone_into(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
