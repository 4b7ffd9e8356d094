//! The per-invocation install root.
//!
//! Each run gets a brand-new temporary directory, so nothing installed by a
//! previous run can leak into this one. The directory is removed when the
//! [`InstallRoot`] is dropped (best effort; a crash leaves it behind in the
//! system temp directory).
//!
//! ```text
//! runtests-XXXXXX/
//! ├── prefix/       install prefix handed to setup.py
//! ├── plugins/      bundled pytest plugin
//! └── bench-raw/    raw benchmark records written by the ranks
//! ```

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// A fresh, exclusively owned install tree.
#[derive(Debug)]
pub struct InstallRoot {
    dir: TempDir,
}

impl InstallRoot {
    /// Creates a new, empty install root under the system temp directory.
    pub fn create() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("runtests-").tempdir()?;
        debug!("Created install root {}", dir.path().display());

        let root = Self { dir };
        std::fs::create_dir_all(root.prefix())?;
        std::fs::create_dir_all(root.plugins_dir())?;
        std::fs::create_dir_all(root.bench_raw_dir())?;
        Ok(root)
    }

    /// The root directory itself.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Install prefix passed to `setup.py install --prefix`.
    pub fn prefix(&self) -> PathBuf {
        self.path().join("prefix")
    }

    /// Where the bundled pytest plugin is extracted.
    pub fn plugins_dir(&self) -> PathBuf {
        self.path().join("plugins")
    }

    /// Where ranks drop raw benchmark records.
    pub fn bench_raw_dir(&self) -> PathBuf {
        self.path().join("bench-raw")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_roots_are_fresh_and_distinct() {
        let first = InstallRoot::create().unwrap();
        std::fs::write(first.prefix().join("stray.py"), "x = 1").unwrap();

        let second = InstallRoot::create().unwrap();

        assert_ne!(first.path(), second.path());
        assert!(!second.prefix().join("stray.py").exists());
        assert_eq!(std::fs::read_dir(second.prefix()).unwrap().count(), 0);
    }

    #[test]
    fn test_layout_created() {
        let root = InstallRoot::create().unwrap();
        assert!(root.prefix().is_dir());
        assert!(root.plugins_dir().is_dir());
        assert!(root.bench_raw_dir().is_dir());
        assert!(
            root.path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("runtests-")
        );
    }

    #[test]
    fn test_removed_on_drop() {
        let root = InstallRoot::create().unwrap();
        let path = root.path().to_path_buf();
        drop(root);
        assert!(!path.exists());
    }
}
