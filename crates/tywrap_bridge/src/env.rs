//! Environment normalization for the spawned worker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Forces JSON fallback in the worker codec (never emit Arrow payloads).
pub const ENV_CODEC_FALLBACK: &str = "TYWRAP_CODEC_FALLBACK";

/// Overrides the stdout max-line length (positive integer, bytes).
pub const ENV_CODEC_MAX_BYTES: &str = "TYWRAP_CODEC_MAX_BYTES";

/// Merge override entries into a base environment.
///
/// Keys are matched case-insensitively against the base so Windows-style
/// `Path` and POSIX `PATH` collapse to a single entry under the base key.
/// An override of `None` unsets the variable; unset entries never reach
/// the spawned process.
pub fn merge_env(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();

    for (key, value) in overrides {
        let base_key = merged
            .keys()
            .find(|existing| existing.eq_ignore_ascii_case(key))
            .cloned();

        match (base_key, value) {
            (Some(existing), Some(value)) => {
                merged.insert(existing, value.clone());
            }
            (Some(existing), None) => {
                merged.remove(&existing);
            }
            (None, Some(value)) => {
                merged.insert(key.clone(), value.clone());
            }
            (None, None) => {}
        }
    }

    merged
}

/// Apply the worker-facing defaults on top of a merged environment:
/// UTF-8 forcing, codec fallback propagation, `PYTHONPATH` extension and
/// `VIRTUAL_ENV` for a configured venv.
pub fn apply_worker_defaults(
    env: &mut BTreeMap<String, String>,
    enable_json_fallback: bool,
    pythonpath_roots: &[PathBuf],
    virtual_env: Option<&Path>,
) {
    if !env.contains_key("PYTHONUTF8") {
        env.insert("PYTHONUTF8".to_string(), "1".to_string());
    }
    if !env.contains_key("PYTHONIOENCODING") {
        env.insert("PYTHONIOENCODING".to_string(), "UTF-8".to_string());
    }

    if enable_json_fallback {
        env.insert(ENV_CODEC_FALLBACK.to_string(), "json".to_string());
    }

    if !pythonpath_roots.is_empty() {
        let separator = if cfg!(windows) { ";" } else { ":" };
        let mut parts: Vec<String> = env
            .get("PYTHONPATH")
            .filter(|existing| !existing.is_empty())
            .map(|existing| vec![existing.clone()])
            .unwrap_or_default();
        for root in pythonpath_roots {
            parts.push(root.display().to_string());
        }
        env.insert("PYTHONPATH".to_string(), parts.join(separator));
    }

    if let Some(venv) = virtual_env {
        env.insert("VIRTUAL_ENV".to_string(), venv.display().to_string());
    }
}

/// Full worker environment: the host's environment, overrides merged
/// case-correctly, then the worker defaults.
pub fn build_worker_env(
    overrides: &BTreeMap<String, Option<String>>,
    enable_json_fallback: bool,
    pythonpath_roots: &[PathBuf],
    virtual_env: Option<&Path>,
) -> BTreeMap<String, String> {
    let base: BTreeMap<String, String> = std::env::vars().collect();
    let mut merged = merge_env(&base, overrides);
    apply_worker_defaults(&mut merged, enable_json_fallback, pythonpath_roots, virtual_env);
    merged
}

/// `TYWRAP_CODEC_MAX_BYTES` override, when set to a positive integer.
pub fn max_line_length_override() -> Option<usize> {
    let raw = std::env::var(ENV_CODEC_MAX_BYTES).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(
                "{} must be a positive integer, ignoring {:?}",
                ENV_CODEC_MAX_BYTES,
                raw
            );
            None
        }
    }
}
