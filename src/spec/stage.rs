//! Stage definition.

use serde::{Deserialize, Serialize};

use crate::manifest::artifacts;
use crate::ports::shell::{quote_word, SHELL, STRICT_BASH};

/// A named group of prep, main, and post commands forming one unit of build work.
///
/// Stages are created once when the job specification is parsed (plus any
/// synthetic stages appended by discovery) and are read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique identifier within the job specification.
    #[serde(default)]
    pub id: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Commands run serially before the main commands.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prep_commands: Vec<String>,
    /// Main commands, run serially or concurrently.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Commands run serially after the main commands succeeded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_commands: Vec<String>,
    /// Run the main commands in parallel.
    #[serde(default, rename = "concurrent", alias = "concurrent_execution")]
    pub concurrent_execution: bool,
    /// Force a new execution-unit boundary before this stage.
    #[serde(default)]
    pub own_pod: bool,
    /// Commands are fully formed argument vectors, not shell snippets.
    #[serde(default)]
    pub direct_exec: bool,
    /// Artifact types that must exist in the build manifest before this stage starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_artifacts: Vec<String>,
    /// Artifact types staged in when the build manifest has them; absent ones are skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_artifacts: Vec<String>,
    /// Artifact types to build; each expands to a `cosa` command run before `commands`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_artifacts: Vec<String>,
    /// Files under the build root uploaded to the cache bucket after the stage succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_files: Vec<String>,
}

impl Stage {
    /// Returns `true` if no phase has any command.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prep_commands.is_empty()
            && self.build_artifacts.is_empty()
            && self.commands.is_empty()
            && self.post_commands.is_empty()
    }

    /// Main-phase commands: one per build artifact, then `commands`.
    ///
    /// Build commands are shell snippets; in a direct-exec stage they are
    /// wrapped in an explicit `bash` invocation. Unknown artifact names are
    /// skipped here and rejected when the job specification is parsed.
    #[must_use]
    pub fn main_commands(&self) -> Vec<String> {
        let built = self.build_artifacts.iter().filter_map(|name| build_command(name)).map(|cmd| {
            if self.direct_exec {
                format!("{SHELL} {STRICT_BASH} -c {}", quote_word(&cmd))
            } else {
                cmd
            }
        });
        built.chain(self.commands.iter().cloned()).collect()
    }
}

/// The `cosa` command that builds artifact type `name`, if it is buildable.
///
/// `base` builds the OSTree commit and QEMU image; `finalize` merges build
/// metadata.
#[must_use]
pub fn build_command(name: &str) -> Option<String> {
    match name.to_ascii_lowercase().as_str() {
        "base" => Some("cosa fetch; cosa build".to_string()),
        target @ ("ostree" | "qemu") => Some(format!("cosa fetch; cosa build {target}")),
        "finalize" => Some("cosa meta --finalize".to_string()),
        target if target == "live" || artifacts::is_known(target) => {
            Some(format!("cosa buildextend-{target}"))
        }
        _ => None,
    }
}
