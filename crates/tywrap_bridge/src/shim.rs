//! Embedded Python worker shim: materialization and interpreter resolution.
//!
//! The worker source is baked into the binary at compile time and
//! materialized to `~/.tywrap/shim/{version}/worker.py` at runtime, so a
//! single host binary runs from any location. Version changes land in a
//! fresh directory; stale cached copies are replaced.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Embedded worker source code.
const WORKER_SHIM_SOURCE: &str = include_str!("../shim/worker.py");

/// Crate version for shim cache path versioning.
const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Materialize the embedded worker shim to the filesystem.
///
/// Idempotent: an existing file with matching content is reused. Writes
/// go through a temp file plus atomic rename so concurrent bridges never
/// observe a half-written shim.
pub fn materialize_worker_shim() -> Result<PathBuf> {
    let shim_dir = tywrap_logging::shim_dir().join(CRATE_VERSION);
    let shim_path = shim_dir.join("worker.py");

    let up_to_date = shim_path.exists()
        && matches!(
            std::fs::read_to_string(&shim_path),
            Ok(existing) if existing == WORKER_SHIM_SOURCE
        );
    if up_to_date {
        debug!("Using cached worker shim: {}", shim_path.display());
        return Ok(shim_path);
    }

    std::fs::create_dir_all(&shim_dir)
        .with_context(|| format!("Failed to create shim directory: {}", shim_dir.display()))?;

    let temp_path = shim_dir.join(format!(".worker.py.{}.tmp", std::process::id()));
    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(WORKER_SHIM_SOURCE.as_bytes())
        .with_context(|| format!("Failed to write shim to: {}", temp_path.display()))?;
    file.sync_all().context("Failed to sync worker shim to disk")?;
    drop(file);

    match std::fs::rename(&temp_path, &shim_path) {
        Ok(()) => {
            info!("Materialized worker shim v{}: {}", CRATE_VERSION, shim_path.display());
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            if !shim_path.exists() {
                return Err(e).with_context(|| {
                    format!("Failed to rename temp shim to: {}", shim_path.display())
                });
            }
            debug!("Another process materialized the shim, using existing");
        }
    }

    Ok(shim_path)
}

/// Interpreter inside a virtual environment.
pub fn venv_interpreter(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// Resolve the Python interpreter for a bridge: an explicit venv wins,
/// then the configured path, consulting `PATH` for bare program names.
pub fn resolve_interpreter(python_path: &Path, virtual_env: Option<&Path>) -> Result<PathBuf> {
    if let Some(venv) = virtual_env {
        let interpreter = venv_interpreter(venv);
        if !interpreter.exists() {
            anyhow::bail!(
                "Virtual environment {} has no interpreter at {}",
                venv.display(),
                interpreter.display()
            );
        }
        return Ok(interpreter);
    }

    if python_path.components().count() > 1 {
        return Ok(python_path.to_path_buf());
    }

    which::which(python_path).with_context(|| {
        format!(
            "Python interpreter {:?} not found on PATH",
            python_path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_shim_not_empty() {
        assert!(!WORKER_SHIM_SOURCE.is_empty());
        assert!(WORKER_SHIM_SOURCE.contains("def serve()"));
        assert!(WORKER_SHIM_SOURCE.contains("tywrap/1"));
    }

    #[test]
    fn test_venv_interpreter_layout() {
        let path = venv_interpreter(Path::new("/venvs/demo"));
        let rendered = path.to_string_lossy();
        assert!(rendered.contains("demo"));
        assert!(rendered.contains("python"));
    }

    #[test]
    fn test_materialize_idempotent() {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("TYWRAP_HOME", home.path());

        let first = materialize_worker_shim().unwrap();
        assert!(first.exists());
        assert_eq!(std::fs::read_to_string(&first).unwrap(), WORKER_SHIM_SOURCE);

        let second = materialize_worker_shim().unwrap();
        assert_eq!(first, second);

        std::env::remove_var("TYWRAP_HOME");
    }

    #[test]
    fn test_missing_venv_interpreter_rejected() {
        let empty = tempfile::tempdir().unwrap();
        let result = resolve_interpreter(Path::new("python3"), Some(empty.path()));
        assert!(result.is_err());
    }
}
