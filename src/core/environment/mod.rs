//! Resolved deployment environment and the backends it is stored in.

pub mod backend;
pub mod local;
pub mod secret;
pub mod swarm;

use std::collections::BTreeSet;

use crate::defaults;
use crate::error::{Error, Result};
use crate::variables::{self, Env};
use crate::version;

pub use backend::{open, Backend, BackendContext};

/// Values injected when the stored environment does not set them.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub environment: Option<String>,
    pub project: String,
    pub env_name: String,
}

/// Which resolution failures a command can live with.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tolerances {
    pub runtime_error_okay: bool,
    pub env_error_okay: bool,
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped;
/// a bare identifier declares an empty value.
pub fn parse(content: &str) -> Result<Env> {
    let mut env = Env::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match raw.split_once('=') {
            Some((key, value)) => {
                env.insert(key.trim().to_string(), value.to_string());
            }
            None if is_identifier(line) => {
                env.insert(line.to_string(), String::new());
            }
            None => return Err(Error::env_parse_failed(index + 1, raw)),
        }
    }
    Ok(env)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn serialize(env: &Env) -> String {
    env.iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    data: Env,
    originals: Env,
    persistable: BTreeSet<String>,
}

impl Environment {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses stored content and resolves runtime values and `${NAME}`
    /// references across it.
    pub fn load(raw: &str, process_env: &Env, tolerances: Tolerances) -> Result<Self> {
        let mut data = parse(raw)?;
        let persistable = data.keys().cloned().collect();
        let mut originals = Env::new();

        let runtime_missing = variables::resolve_runtime(&mut data, process_env, &mut originals);
        if !runtime_missing.is_empty() {
            let err = Error::env_runtime_missing(runtime_missing);
            if !tolerances.runtime_error_okay {
                return Err(err);
            }
            log_status!("env", "Warning: {}", err.message);
        }

        let substitution = variables::substitute_all(&mut data, &mut originals);
        if let Err(err) = substitution.into_result() {
            if !tolerances.env_error_okay {
                return Err(err);
            }
            log_status!("env", "Warning: {}", err.message);
        }

        Ok(Self {
            data,
            originals,
            persistable,
        })
    }

    /// Sets the identity variables that are not already present.
    pub fn inject_identity(&mut self, identity: &Identity) {
        let defaults = [
            (
                defaults::CF_ENV_VAR,
                identity.environment.clone().unwrap_or_default(),
            ),
            (defaults::CF_PROJECT_VAR, identity.project.clone()),
            (defaults::CF_ENV_NAME_VAR, identity.env_name.clone()),
        ];
        for (key, value) in defaults {
            self.data.entry(key.to_string()).or_insert(value);
        }
    }

    /// Overwrites `VERSION` and the tag of `DOCKER_IMAGE`; without a stored
    /// image, `fallback_image` is used. Both are persisted.
    pub fn apply_version(&mut self, version: &str, fallback_image: &str) {
        let image = match self.data.get(defaults::DOCKER_IMAGE_VAR) {
            Some(current) if !current.is_empty() => version::replace_tag(current, version),
            _ => fallback_image.to_string(),
        };

        for (key, value) in [
            (defaults::VERSION_VAR, version.to_string()),
            (defaults::DOCKER_IMAGE_VAR, image),
        ] {
            self.originals.remove(key);
            self.persistable.insert(key.to_string());
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn data(&self) -> &Env {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pre-resolution values of keys rewritten during loading.
    pub fn originals(&self) -> &Env {
        &self.originals
    }

    /// Stored keys with their unresolved values.
    pub fn persistable_data(&self) -> Env {
        self.persistable
            .iter()
            .filter_map(|key| {
                self.originals
                    .get(key)
                    .or_else(|| self.data.get(key))
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    /// Text written back to the backend, sorted by key.
    pub fn render_persistable(&self) -> String {
        serialize(&self.persistable_data())
    }

    /// Resolved values, sorted by key.
    pub fn render(&self) -> String {
        serialize(&self.data)
    }
}
