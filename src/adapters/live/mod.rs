//! Live adapters for real external interactions.

pub mod dir_store;
pub mod filesystem;
pub mod git;
pub mod http_store;
pub mod id_gen;
pub mod shell;

use std::path::{Path, PathBuf};

/// Sibling of `dest` that a download is written to before being renamed
/// into place, so readers never observe a partial object.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dest.with_file_name(format!(".{name}.partial-{}", std::process::id()))
}
