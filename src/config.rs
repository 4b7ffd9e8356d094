//! Configuration loading for runtests.
//!
//! Project defaults live in an optional `runtests.toml` at the project root.
//! Command-line flags override anything set there.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "runtests.toml";

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// ```
/// use runtests::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [bench]
///     output_dir = "build/benchmarks"
/// "#)?;
/// assert!(config.bench.output_dir.is_some());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if it exists, otherwise returns the defaults.
///
/// A file that exists but fails to parse is still an error.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        debug!("No {} found, using defaults", path.display());
        Ok(Config::default())
    }
}

/// Expands `~` and environment variables in a configured path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();

        assert!(config.project.package.is_none());
        assert_eq!(config.project.python, "python");
        assert_eq!(config.project.build_dir, PathBuf::from("build"));
        assert_eq!(config.project.extra_path.len(), 4);
        assert_eq!(config.mpi.launcher, "mpirun -n {np}");
        assert_eq!(config.mpi.np, 4);
        assert!(config.mpi.enabled.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [project]
            package = "mypkg"
            python = "python3"
            project_files = ["mypkg/__init__.py"]
            extra_path = []

            [mpi]
            enabled = false
            launcher = "mpiexec -np {np}"
            np = 2

            [mpi.env]
            OMPI_MCA_btl = "self,vader"

            [bench]
            output_dir = "bench-out"
            "#,
        )
        .unwrap();

        assert_eq!(config.project.package.as_deref(), Some("mypkg"));
        assert_eq!(config.project.python, "python3");
        assert!(config.project.extra_path.is_empty());
        assert_eq!(config.mpi.enabled, Some(false));
        assert_eq!(config.mpi.env.get("OMPI_MCA_btl").unwrap(), "self,vader");
        assert_eq!(config.bench.output_dir, Some(PathBuf::from("bench-out")));
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(load_config_str("[mpi]\nnp = \"four\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_or_default(&dir.path().join(CONFIG_FILE)).unwrap();
        assert!(config.project.package.is_none());
    }

    #[test]
    fn test_existing_file_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[project]\npackage = \"pkg\"\n").unwrap();

        let config = load_config_or_default(&path).unwrap();
        assert_eq!(config.project.package.as_deref(), Some("pkg"));
    }

    #[test]
    fn test_expand_path_plain() {
        assert_eq!(expand_path(Path::new("build")), PathBuf::from("build"));
    }
}
