//! Live filesystem adapter using `std::fs`.

use std::path::Path;

use crate::ports::filesystem::FileSystem;

/// Reads the real disk.
pub struct LiveFileSystem;

impl FileSystem for LiveFileSystem {
    fn read_to_string(
        &self,
        path: &Path,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(
        &self,
        path: &Path,
    ) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
        let mut names = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_build_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("builds/42.7/x86_64");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("meta.json"), "{}").unwrap();
        std::fs::write(build.join("disk.qcow2"), "disk").unwrap();

        let fs = LiveFileSystem;
        assert!(fs.is_dir(&build));
        assert!(!fs.is_dir(&build.join("meta.json")));
        assert_eq!(fs.list_dir(&build).unwrap(), vec!["disk.qcow2", "meta.json"]);
        assert_eq!(fs.read_to_string(&build.join("meta.json")).unwrap(), "{}");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LiveFileSystem;
        assert!(!fs.exists(&dir.path().join("jobspec.yaml")));
        assert!(fs.read_to_string(&dir.path().join("jobspec.yaml")).is_err());
        assert!(fs.list_dir(&dir.path().join("builds")).is_err());
    }
}
