use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Error, Result};
use crate::variables::Env;

/// Base compose-flow directory (`~/.compose-flow`).
pub fn app_root(process_env: &Env) -> Result<PathBuf> {
    let home = process_env.get("HOME").ok_or_else(|| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home).join(defaults::APP_DIR))
}

/// Global application config file, overridable with `CF_REMOTES_CONFIG_PATH`.
pub fn app_config(process_env: &Env) -> Result<PathBuf> {
    if let Some(path) = process_env.get("CF_REMOTES_CONFIG_PATH") {
        return Ok(expand(path, process_env));
    }
    Ok(app_root(process_env)?.join(defaults::APP_CONFIG_FILE))
}

/// Root of the local environment backend.
pub fn environments_root(configured: Option<&str>, process_env: &Env) -> Result<PathBuf> {
    match configured {
        Some(path) => Ok(expand(path, process_env)),
        None => Ok(app_root(process_env)?.join(defaults::ENVIRONMENTS_DIR)),
    }
}

/// Candidate project config files, most specific first.
pub fn project_config_candidates(cwd: &Path, process_env: &Env) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for var in ["CF_CONFIG_FILE", "DC_CONFIG_FILE"] {
        if let Some(path) = process_env.get(var) {
            candidates.push(cwd.join(expand(path, process_env)));
        }
    }
    candidates.push(
        cwd.join(defaults::PROJECT_CONFIG_DIR)
            .join(defaults::PROJECT_CONFIG_FILE),
    );
    candidates.push(cwd.join(defaults::PROJECT_CONFIG_FILE));
    candidates
}

fn expand(path: &str, process_env: &Env) -> PathBuf {
    let expanded = shellexpand::tilde_with_context(path, || process_env.get("HOME").cloned());
    PathBuf::from(expanded.as_ref())
}
