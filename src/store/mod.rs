//! Job specification store: loading the JobSpec and discovering implied stages.
//!
//! The specification is read from `<srv>/<jobspec_file>`, or from a shallow
//! clone of the configured repository when no local file exists. When strict
//! mode is off two synthetic stages may be appended, in this order:
//!
//! - `envVar`: the ad-hoc command string from `COSA_CMDS`
//! - `cosa.sh`: every `*.cosa.sh` script beside the specification

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::ports::shell::{quote_word, SHELL, STRICT_BASH};
use crate::shuttle::{RemoteFile, SOURCE_BUCKET};
use crate::spec::{JobSpec, Stage};

/// ID of the stage built from the ad-hoc command string.
pub const ENV_VAR_STAGE: &str = "envVar";
/// ID of the stage built from discovered scripts.
pub const SCRIPTS_STAGE: &str = "cosa.sh";
/// Suffix identifying discoverable scripts.
pub const SCRIPT_SUFFIX: &str = ".cosa.sh";

/// A loaded specification and the directory it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSpec {
    /// The parsed specification.
    pub spec: JobSpec,
    /// Directory holding the specification file; scripts are discovered here.
    pub dir: PathBuf,
}

/// A discovered script waiting to be copied into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUpload {
    /// Script on the local disk.
    pub local: PathBuf,
    /// Where units will find it.
    pub remote: RemoteFile,
}

/// Loads job specifications and applies stage discovery.
///
/// All file I/O goes through `ctx.fs` and clones through `ctx.git`.
pub struct JobSpecStore<'a> {
    ctx: &'a ServiceContext,
    config: &'a Config,
}

impl<'a> JobSpecStore<'a> {
    /// Creates a store over the given context and configuration.
    #[must_use]
    pub fn new(ctx: &'a ServiceContext, config: &'a Config) -> Self {
        Self { ctx, config }
    }

    /// Loads the job specification.
    ///
    /// `clone_dir` receives the checkout when the specification is remote.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobSpecNotFound`] when neither a local file nor a
    /// clonable remote exists, or [`Error::InvalidJobSpec`] if it fails to parse.
    pub fn load(&self, clone_dir: &Path) -> Result<LoadedSpec> {
        let local = self.config.srv_dir.join(&self.config.jobspec_file);
        if self.ctx.fs.exists(&local) {
            tracing::info!(path = %local.display(), "using local job specification");
            return self.read(&local, &self.config.srv_dir);
        }

        let Some(url) = &self.config.jobspec_url else {
            return Err(Error::JobSpecNotFound { path: local });
        };
        let git_ref = self.config.jobspec_ref.as_deref().unwrap_or_default();
        tracing::info!(url = %url, git_ref, "cloning job specification");
        if let Err(e) = self.ctx.git.clone_into(url, git_ref, clone_dir) {
            tracing::warn!(url = %url, error = %e, "job specification repository is not clonable");
            return Err(Error::JobSpecNotFound { path: local });
        }
        let remote = clone_dir.join(&self.config.jobspec_file);
        if !self.ctx.fs.exists(&remote) {
            return Err(Error::JobSpecNotFound { path: remote });
        }
        self.read(&remote, clone_dir)
    }

    fn read(&self, path: &Path, dir: &Path) -> Result<LoadedSpec> {
        let text = self
            .ctx
            .fs
            .read_to_string(path)
            .map_err(|e| Error::io(format!("read {}", path.display()), std::io::Error::other(e)))?;
        Ok(LoadedSpec { spec: JobSpec::from_yaml(&text)?, dir: dir.to_path_buf() })
    }

    /// Appends the implied stages to `spec` unless it is in strict mode.
    ///
    /// Returns the scripts that must be copied into the store before any unit
    /// runs the `cosa.sh` stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJobSpec`] if a synthetic stage id is already taken.
    pub fn discover(&self, spec: &mut JobSpec, scripts_dir: &Path) -> Result<Vec<ScriptUpload>> {
        if spec.job.strict_mode {
            tracing::info!("strict mode is set, skipping stage discovery");
            return Ok(Vec::new());
        }
        tracing::info!("strict mode is off: COSA_CMDS and *.cosa.sh files are implied stages");

        if let Some(cmds) = &self.config.cosa_cmds {
            spec.push_stage(Stage {
                id: ENV_VAR_STAGE.to_string(),
                description: "envVar defined commands".to_string(),
                direct_exec: true,
                commands: vec![format!("{SHELL} {STRICT_BASH} -c {}", quote_word(cmds))],
                ..Stage::default()
            })?;
        }

        let mut uploads = Vec::new();
        if self.ctx.fs.is_dir(scripts_dir) {
            let names = self.ctx.fs.list_dir(scripts_dir).map_err(|e| {
                Error::io(format!("list {}", scripts_dir.display()), std::io::Error::other(e))
            })?;
            for name in names.into_iter().filter(|n| n.ends_with(SCRIPT_SUFFIX)) {
                let local = scripts_dir.join(&name);
                if self.ctx.fs.is_dir(&local) {
                    continue;
                }
                uploads.push(ScriptUpload { local, remote: RemoteFile::new(SOURCE_BUCKET, &name) });
            }
        }
        if !uploads.is_empty() {
            let commands = uploads
                .iter()
                .map(|u| {
                    let path = format!("{}/{}", u.remote.bucket, u.remote.key);
                    format!("{SHELL} {STRICT_BASH} {}", quote_word(&path))
                })
                .collect();
            spec.push_stage(Stage {
                id: SCRIPTS_STAGE.to_string(),
                description: "*.cosa.sh scripts".to_string(),
                direct_exec: true,
                commands,
                ..Stage::default()
            })?;
        }
        Ok(uploads)
    }

    /// Copies discovered scripts into the store.
    ///
    /// # Errors
    ///
    /// Returns the store error of the first failed upload.
    pub async fn upload_scripts(&self, uploads: &[ScriptUpload]) -> Result<Vec<RemoteFile>> {
        self.ctx.store.ensure_bucket(SOURCE_BUCKET).await?;
        let mut files = Vec::with_capacity(uploads.len());
        for upload in uploads {
            self.ctx
                .store
                .put(&upload.remote.bucket, &upload.remote.key, &upload.local, true)
                .await?;
            files.push(upload.remote.clone());
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::git::GitRepo;

    /// Pretends to clone by writing a fixed job specification.
    struct FakeGit {
        spec: Option<&'static str>,
    }

    impl GitRepo for FakeGit {
        fn clone_into(
            &self,
            _url: &str,
            _git_ref: &str,
            dest: &Path,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let spec = self.spec.ok_or("repository not found")?;
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("jobspec.yaml"), spec)?;
            Ok(())
        }
    }

    const SPEC: &str = "job: {name: fcos}\nstages:\n  - id: build\n    commands: [cosa build]\n";

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, Config) {
        let srv = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(srv.path().join(name), body).unwrap();
        }
        let config = Config { srv_dir: srv.path().to_path_buf(), ..Config::default() };
        (srv, config)
    }

    #[test]
    fn loads_local_spec() {
        let (srv, config) = setup(&[("jobspec.yaml", SPEC)]);
        let ctx = ServiceContext::local(srv.path());
        let loaded = JobSpecStore::new(&ctx, &config).load(&srv.path().join("clone")).unwrap();
        assert_eq!(loaded.spec.job.build_name, "fcos");
        assert_eq!(loaded.dir, srv.path());
    }

    #[test]
    fn clones_remote_spec_when_no_local_file() {
        let (srv, mut config) = setup(&[]);
        config.jobspec_url = Some("https://example.com/jobs.git".into());
        let mut ctx = ServiceContext::local(srv.path());
        ctx.git = Box::new(FakeGit { spec: Some(SPEC) });
        let clone = srv.path().join("clone");
        let loaded = JobSpecStore::new(&ctx, &config).load(&clone).unwrap();
        assert_eq!(loaded.spec.stages[0].id, "build");
        assert_eq!(loaded.dir, clone);
    }

    #[test]
    fn missing_spec_is_not_found() {
        let (srv, mut config) = setup(&[]);
        let mut ctx = ServiceContext::local(srv.path());
        let store_err = JobSpecStore::new(&ctx, &config).load(&srv.path().join("c")).unwrap_err();
        assert!(matches!(store_err, Error::JobSpecNotFound { .. }));

        config.jobspec_url = Some("https://example.com/gone.git".into());
        ctx.git = Box::new(FakeGit { spec: None });
        let clone_err = JobSpecStore::new(&ctx, &config).load(&srv.path().join("c")).unwrap_err();
        assert!(matches!(clone_err, Error::JobSpecNotFound { .. }));
    }

    #[test]
    fn discovery_appends_env_then_scripts() {
        let (srv, mut config) = setup(&[
            ("b.cosa.sh", "cosa build"),
            ("a.cosa.sh", "cosa fetch"),
            ("notes.sh", "ignored"),
        ]);
        config.cosa_cmds = Some("cosa init 'https://x'".into());
        let ctx = ServiceContext::local(srv.path());
        let mut spec = JobSpec::from_yaml(SPEC).unwrap();

        let uploads = JobSpecStore::new(&ctx, &config).discover(&mut spec, srv.path()).unwrap();
        let ids: Vec<&str> = spec.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["build", "envVar", "cosa.sh"]);

        let env_stage = &spec.stages[1];
        assert!(env_stage.direct_exec);
        assert_eq!(
            crate::ports::shell::split_words(&env_stage.commands[0]).unwrap(),
            vec!["/bin/bash", "-xeu", "-o", "pipefail", "-c", "cosa init 'https://x'"]
        );

        let scripts = &spec.stages[2];
        assert_eq!(scripts.commands.len(), 2);
        let argv = crate::ports::shell::split_words(&scripts.commands[0]).unwrap();
        assert_eq!(argv.last().map(String::as_str), Some("source/a.cosa.sh"));
        let keys: Vec<&str> = uploads.iter().map(|u| u.remote.key.as_str()).collect();
        assert_eq!(keys, vec!["a.cosa.sh", "b.cosa.sh"]);
    }

    #[test]
    fn strict_mode_discovers_nothing() {
        let (srv, mut config) = setup(&[("a.cosa.sh", "cosa fetch")]);
        config.cosa_cmds = Some("cosa fetch".into());
        let ctx = ServiceContext::local(srv.path());
        let mut spec = JobSpec::from_yaml("job: {strict: true}\n").unwrap();
        let uploads = JobSpecStore::new(&ctx, &config).discover(&mut spec, srv.path()).unwrap();
        assert!(uploads.is_empty());
        assert!(spec.stages.is_empty());
    }

    #[tokio::test]
    async fn scripts_are_copied_into_source_bucket() {
        let (srv, config) = setup(&[("a.cosa.sh", "cosa fetch")]);
        let scripts = tempfile::tempdir().unwrap();
        std::fs::write(scripts.path().join("z.cosa.sh"), "echo z").unwrap();
        let ctx = ServiceContext::local(srv.path());
        let store = JobSpecStore::new(&ctx, &config);
        let mut spec = JobSpec::default();
        let uploads = store.discover(&mut spec, scripts.path()).unwrap();
        let files = store.upload_scripts(&uploads).await.unwrap();
        assert_eq!(files, vec![RemoteFile::new("source", "z.cosa.sh")]);
        assert_eq!(std::fs::read_to_string(srv.path().join("source/z.cosa.sh")).unwrap(), "echo z");
    }
}
