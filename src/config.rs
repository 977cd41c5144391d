//! Run configuration loaded from the process environment.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Every recognised option and the environment variable that sets it.
pub const ENV_TABLE: &[(&str, &str)] = &[
    ("jobspec_url", "COSA_JOBSPEC_URL"),
    ("jobspec_ref", "COSA_JOBSPEC_REF"),
    ("jobspec_file", "COSA_JOBSPEC_FILE"),
    ("cosa_cmds", "COSA_CMDS"),
    ("pod_name", "COSA_POD_NAME"),
    ("pod_ip", "COSA_POD_IP"),
    ("pod_namespace", "COSA_POD_NAMESPACE"),
    ("srv_dir", "COSA_SRV_DIR"),
    ("arch", "COSA_FORCE_ARCH"),
    ("source_archive", "COSA_SOURCE_ARCHIVE"),
    ("object_store_url", "COSA_OBJECT_STORE_URL"),
    ("max_concurrency", "COSA_MAX_CONCURRENCY"),
    ("work_root", "COSA_WORK_ROOT"),
];

/// Environment variable carrying a worker's JSON assignment.
pub const WORK_ASSIGNMENT_ENV: &str = "COSA_WORK_POD_JSON";
/// Environment variables carrying the per-run object store credentials.
pub const ACCESS_KEY_ENV: &str = "COSA_STORE_ACCESS_KEY";
/// See [`ACCESS_KEY_ENV`].
pub const SECRET_KEY_ENV: &str = "COSA_STORE_SECRET_KEY";

/// Default job specification file name under the build root.
pub const DEFAULT_JOBSPEC_FILE: &str = "jobspec.yaml";
/// Default shared build root.
pub const DEFAULT_SRV_DIR: &str = "/srv";

/// Plain configuration record for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Remote repository holding the job specification.
    pub jobspec_url: Option<String>,
    /// Ref to check out from `jobspec_url`.
    pub jobspec_ref: Option<String>,
    /// Job specification file name, relative to the build root or the clone.
    pub jobspec_file: String,
    /// Ad-hoc command string run as a synthetic stage.
    pub cosa_cmds: Option<String>,
    /// Name of the unit running the orchestrator.
    pub pod_name: Option<String>,
    /// Address of the unit running the orchestrator.
    pub pod_ip: Option<String>,
    /// Namespace of the unit running the orchestrator.
    pub pod_namespace: Option<String>,
    /// Shared build root; its top-level directories are the store's buckets.
    pub srv_dir: PathBuf,
    /// Build architecture.
    pub arch: String,
    /// Binary payload delivered alongside the job.
    pub source_archive: Option<PathBuf>,
    /// HTTP object store endpoint; the build root is used directly when unset.
    pub object_store_url: Option<String>,
    /// Cap on concurrently running commands in a concurrent stage.
    pub max_concurrency: Option<usize>,
    /// Parent directory for per-unit work directories.
    pub work_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobspec_url: None,
            jobspec_ref: None,
            jobspec_file: DEFAULT_JOBSPEC_FILE.to_string(),
            cosa_cmds: None,
            pod_name: None,
            pod_ip: None,
            pod_namespace: None,
            srv_dir: PathBuf::from(DEFAULT_SRV_DIR),
            arch: builder_arch(None),
            source_archive: None,
            object_store_url: None,
            max_concurrency: None,
            work_root: std::env::temp_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which maps an environment
    /// variable name to its value. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |option: &str| -> Option<String> {
            ENV_TABLE
                .iter()
                .find(|(name, _)| *name == option)
                .and_then(|(_, var)| lookup(var))
                .filter(|v| !v.trim().is_empty())
        };

        let defaults = Self::default();
        let max_concurrency = match get("max_concurrency") {
            None => None,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(Error::Config {
                        message: format!(
                            "COSA_MAX_CONCURRENCY must be a positive integer, got {raw:?}"
                        ),
                    })
                }
                Ok(n) => Some(n),
            },
        };

        Ok(Self {
            jobspec_url: get("jobspec_url"),
            jobspec_ref: get("jobspec_ref"),
            jobspec_file: get("jobspec_file").unwrap_or(defaults.jobspec_file),
            cosa_cmds: get("cosa_cmds"),
            pod_name: get("pod_name").or_else(|| lookup("HOSTNAME").filter(|h| !h.is_empty())),
            pod_ip: get("pod_ip"),
            pod_namespace: get("pod_namespace"),
            srv_dir: get("srv_dir").map_or(defaults.srv_dir, PathBuf::from),
            arch: builder_arch(get("arch").as_deref()),
            source_archive: get("source_archive").map(PathBuf::from),
            object_store_url: get("object_store_url"),
            max_concurrency,
            work_root: get("work_root").map_or(defaults.work_root, PathBuf::from),
        })
    }

    /// Environment handed to every command and worker.
    #[must_use]
    pub fn command_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("COSA_FORCE_ARCH".to_string(), self.arch.clone()),
            ("COSA_SRV_DIR".to_string(), self.srv_dir.display().to_string()),
        ];
        if let Some(name) = &self.pod_name {
            env.push(("COSA_POD_NAME".to_string(), name.clone()));
        }
        if let Some(url) = &self.object_store_url {
            env.push(("COSA_OBJECT_STORE_URL".to_string(), url.clone()));
        }
        env
    }
}

/// Returns the build architecture, honouring an override.
///
/// Go-style `amd64` and `arm64` names are translated to `x86_64` and `aarch64`.
#[must_use]
pub fn builder_arch(forced: Option<&str>) -> String {
    let arch = forced.unwrap_or(std::env::consts::ARCH);
    match arch {
        "amd64" => "x86_64".to_string(),
        "arm64" => "aarch64".to_string(),
        other => other.to_string(),
    }
}
