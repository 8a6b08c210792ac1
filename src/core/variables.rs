//! Flat `${NAME}` substitution.
//!
//! Placeholders may carry a `:default` or `?message` modifier, which is
//! stripped without being evaluated. Environment values can also be the
//! token `runtime://` (or `runtime://OTHER`), which is looked up in the
//! process environment before any placeholder substitution happens.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{Error, Result};

/// Ordered key/value environment.
pub type Env = BTreeMap<String, String>;

pub const RUNTIME_PREFIX: &str = "runtime://";

/// Text substituted for an unknown name in lenient rendering.
pub const MISSING_SENTINEL: &str = "MISSING";

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:?]*)(?:[:?][^}]*)?\}").expect("Invalid variable pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnMissing {
    Sentinel,
    Keep,
}

/// Result of rendering text: the output plus every name that was not found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub missing: Vec<String>,
}

impl Rendered {
    pub fn into_result(self) -> Result<String> {
        if self.missing.is_empty() {
            Ok(self.text)
        } else {
            Err(Error::env_missing_variables(self.missing))
        }
    }
}

fn substitute(content: &str, env: &Env, on_missing: OnMissing) -> Rendered {
    let mut missing: Vec<String> = Vec::new();

    let text = VARIABLE
        .replace_all(content, |caps: &Captures| {
            let name = &caps[1];
            match env.get(name) {
                Some(value) => value.clone(),
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    match on_missing {
                        OnMissing::Sentinel => MISSING_SENTINEL.to_string(),
                        OnMissing::Keep => caps[0].to_string(),
                    }
                }
            }
        })
        .into_owned();

    Rendered { text, missing }
}

/// Renders `content`, replacing unknown names with [`MISSING_SENTINEL`].
///
/// The missing names are still reported so the caller decides whether
/// a partial render is acceptable.
pub fn render_lenient(content: &str, env: &Env) -> Rendered {
    substitute(content, env, OnMissing::Sentinel)
}

/// Renders `content`, failing with every missing name at once.
pub fn render(content: &str, env: &Env) -> Result<String> {
    render_lenient(content, env).into_result()
}

/// Names referenced by placeholders in `content`, in order of appearance.
pub fn references(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in VARIABLE.captures_iter(content) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Replaces `runtime://` values from `process_env`.
///
/// Rewritten keys have their original value recorded in `originals`.
/// Returns a `KEY=value` entry for each runtime value that could not be
/// found; those keys keep their unresolved value.
pub fn resolve_runtime(data: &mut Env, process_env: &Env, originals: &mut Env) -> Vec<String> {
    let mut missing = Vec::new();

    for (key, value) in data.iter_mut() {
        let Some(reference) = value.strip_prefix(RUNTIME_PREFIX) else {
            continue;
        };
        let lookup = if reference.is_empty() { key.as_str() } else { reference };

        match process_env.get(lookup) {
            Some(resolved) => {
                originals
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
                *value = resolved.clone();
            }
            None => missing.push(format!("{}={}", key, value)),
        }
    }

    missing
}

/// Outcome of [`substitute_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    /// Referenced names absent from the environment.
    pub missing: Vec<String>,
    /// Keys whose values never stopped changing or still reference themselves.
    pub cyclic: Vec<String>,
}

impl Substitution {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.cyclic.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if !self.cyclic.is_empty() {
            return Err(Error::env_substitution_cycle(self.cyclic));
        }
        if !self.missing.is_empty() {
            return Err(Error::env_missing_variables(self.missing));
        }
        Ok(())
    }
}

/// Substitutes placeholders across every value until nothing changes.
///
/// Passes are capped at `len + 1`; a chain of N references converges in at
/// most N passes, so anything still changing after that is a cycle. Values
/// referencing missing names keep the placeholder text.
pub fn substitute_all(data: &mut Env, originals: &mut Env) -> Substitution {
    let keys: Vec<String> = data.keys().cloned().collect();
    let max_passes = keys.len() + 1;
    let mut changed_last_pass: Vec<String> = Vec::new();

    for _ in 0..max_passes {
        changed_last_pass.clear();

        for key in &keys {
            let current = data.get(key).cloned().unwrap_or_default();
            let rendered = substitute(&current, data, OnMissing::Keep).text;
            if rendered != current {
                originals.entry(key.clone()).or_insert(current);
                data.insert(key.clone(), rendered);
                changed_last_pass.push(key.clone());
            }
        }

        if changed_last_pass.is_empty() {
            break;
        }
    }

    let mut result = Substitution::default();
    for (key, value) in data.iter() {
        for name in references(value) {
            if data.contains_key(&name) {
                if !result.cyclic.contains(key) {
                    result.cyclic.push(key.clone());
                }
            } else if !result.missing.contains(&name) {
                result.missing.push(name);
            }
        }
    }
    for key in changed_last_pass {
        if !result.cyclic.contains(&key) {
            result.cyclic.push(key);
        }
    }

    result
}
