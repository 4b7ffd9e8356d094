//! The pytest plugin shipped inside the binary.
//!
//! `scripts/runtests_pytest.py` is embedded at compile time and written into
//! each install root, where the environment preparer puts it on
//! `PYTHONPATH`. Test processes load it with `-p runtests_pytest`.
//!
//! The plugin is the Python half of the orchestrator. It
//! - sorts collected items so every rank sees the same order,
//! - selects or deselects tests that use the `benchmark` fixture,
//! - records benchmark timings for [`crate::bench`],
//! - under MPI, buffers non-root output and aborts the world on failure.

use std::fs;
use std::path::Path;

use include_dir::{Dir, include_dir};

/// Embedded scripts directory.
static SCRIPTS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/scripts");

/// Module name of the plugin, as passed to `pytest -p`.
pub const PLUGIN_MODULE: &str = "runtests_pytest";

/// Result type for bundled plugin operations.
pub type BundledResult<T> = Result<T, BundledError>;

/// Errors that can occur while extracting the plugin.
#[derive(Debug, thiserror::Error)]
pub enum BundledError {
    /// The plugin is missing from the embedded directory.
    #[error("Bundled script not found: {0}")]
    ScriptNotFound(String),

    /// Failed to write a bundled file.
    #[error("Failed to extract '{name}': {source}")]
    ExtractionFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes every bundled Python file into `dir`.
///
/// # Errors
///
/// Fails if the plugin is not bundled or a file cannot be written.
pub fn extract_plugins(dir: &Path) -> BundledResult<()> {
    let plugin_file = format!("{}.py", PLUGIN_MODULE);
    if SCRIPTS_DIR.get_file(&plugin_file).is_none() {
        return Err(BundledError::ScriptNotFound(plugin_file));
    }

    for file in SCRIPTS_DIR.files() {
        let target_path = dir.join(file.path());

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BundledError::ExtractionFailed {
                name: file.path().display().to_string(),
                source: e,
            })?;
        }

        fs::write(&target_path, file.contents()).map_err(|e| BundledError::ExtractionFailed {
            name: file.path().display().to_string(),
            source: e,
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_writes_plugin() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        extract_plugins(dir.path())?;

        let plugin = dir.path().join("runtests_pytest.py");
        assert!(plugin.exists());

        let content = fs::read_to_string(plugin)?;
        assert!(content.contains("def pytest_collection_modifyitems"));
        assert!(content.contains("RUNTESTS_BENCH_RAW"));
        Ok(())
    }

    #[test]
    fn test_extract_is_repeatable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        extract_plugins(dir.path())?;
        extract_plugins(dir.path())?;
        assert!(dir.path().join("runtests_pytest.py").exists());
        Ok(())
    }
}
