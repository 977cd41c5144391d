//! Service context bundling all port trait objects.

use std::sync::Arc;

use crate::adapters::live::http_store::Credentials;
use crate::config::{Config, ACCESS_KEY_ENV, SECRET_KEY_ENV};
use crate::ports::filesystem::FileSystem;
use crate::ports::git::GitRepo;
use crate::ports::id_gen::IdGenerator;
use crate::ports::object_store::ObjectStore;
use crate::ports::shell::ShellExecutor;

/// Bundles all port trait objects into a single context.
///
/// The process runner and object store are reference-counted because
/// concurrent stage commands and unit launchers hold them across tasks.
pub struct ServiceContext {
    /// Filesystem for job specifications and build manifests.
    pub fs: Box<dyn FileSystem>,
    /// Git for cloning remote job specifications.
    pub git: Box<dyn GitRepo>,
    /// Process runner for stage commands.
    pub shell: Arc<dyn ShellExecutor>,
    /// Shared bucket/key store.
    pub store: Arc<dyn ObjectStore>,
    /// Run ids and credentials.
    pub id_gen: Box<dyn IdGenerator>,
    /// Object store credentials for this run, when an HTTP store is used.
    pub credentials: Option<Credentials>,
}

impl ServiceContext {
    /// Creates a live context with real adapters.
    ///
    /// With an object store URL the HTTP store is used, authenticated by the
    /// credentials inherited from a parent run or else freshly generated.
    /// Without one the shared build root itself serves as the store.
    #[must_use]
    pub fn live(config: &Config) -> Self {
        use crate::adapters::live::dir_store::DirObjectStore;
        use crate::adapters::live::filesystem::LiveFileSystem;
        use crate::adapters::live::git::LiveGitRepo;
        use crate::adapters::live::http_store::HttpObjectStore;
        use crate::adapters::live::id_gen::LiveIdGenerator;
        use crate::adapters::live::shell::LiveShellExecutor;

        let id_gen = LiveIdGenerator;
        let (store, credentials): (Arc<dyn ObjectStore>, Option<Credentials>) =
            match &config.object_store_url {
                Some(url) => {
                    let creds = inherited_credentials().unwrap_or_else(|| Credentials {
                        access_key: id_gen.run_id(),
                        secret_key: id_gen.secret(),
                    });
                    (Arc::new(HttpObjectStore::new(url, creds.clone())), Some(creds))
                }
                None => (Arc::new(DirObjectStore::new(&config.srv_dir)), None),
            };

        Self {
            fs: Box::new(LiveFileSystem),
            git: Box::new(LiveGitRepo),
            shell: Arc::new(LiveShellExecutor),
            store,
            id_gen: Box::new(id_gen),
            credentials,
        }
    }

    /// Environment that lets a child process reach the same store.
    #[must_use]
    pub fn credential_env(&self) -> Vec<(String, String)> {
        self.credentials.as_ref().map_or_else(Vec::new, |c| {
            vec![
                (ACCESS_KEY_ENV.to_string(), c.access_key.clone()),
                (SECRET_KEY_ENV.to_string(), c.secret_key.clone()),
            ]
        })
    }
}

#[cfg(test)]
impl ServiceContext {
    /// Live adapters over a directory store rooted at `srv_dir`.
    pub(crate) fn local(srv_dir: &std::path::Path) -> Self {
        let config = Config { srv_dir: srv_dir.to_path_buf(), ..Config::default() };
        Self::live(&config)
    }
}

fn inherited_credentials() -> Option<Credentials> {
    let access_key = std::env::var(ACCESS_KEY_ENV).ok().filter(|v| !v.is_empty())?;
    let secret_key = std::env::var(SECRET_KEY_ENV).ok().filter(|v| !v.is_empty())?;
    Some(Credentials { access_key, secret_key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_store_needs_no_credentials() {
        let root = tempfile::tempdir().unwrap();
        let config = Config { srv_dir: root.path().to_path_buf(), ..Config::default() };
        let ctx = ServiceContext::live(&config);
        assert!(ctx.credentials.is_none());
        assert!(ctx.credential_env().is_empty());
    }

    #[test]
    fn http_store_carries_credentials_to_children() {
        let config = Config {
            object_store_url: Some("http://127.0.0.1:9000".into()),
            ..Config::default()
        };
        let ctx = ServiceContext::live(&config);
        let env = ctx.credential_env();
        assert_eq!(env.len(), 2);
        assert!(env.iter().all(|(_, v)| !v.is_empty()));
    }
}
