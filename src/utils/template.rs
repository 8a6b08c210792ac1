//! Jinja template rendering for Kubernetes manifests and Helm answers.
//!
//! Undefined names are errors. `b64encode` is registered alongside the
//! builtin filters.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Environment, UndefinedBehavior};

use crate::error::{Error, Result};

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut engine = Environment::new();
    engine.set_undefined_behavior(UndefinedBehavior::Strict);
    engine.set_keep_trailing_newline(true);
    engine.add_filter("b64encode", b64encode);
    engine
});

fn b64encode(value: String) -> String {
    STANDARD.encode(value.as_bytes())
}

pub fn render(name: &str, template: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    ENGINE
        .render_named_str(name, template, variables)
        .map_err(|e| {
            Error::config_invalid_value(
                "template",
                Some(name.to_string()),
                format!("Failed to render {}: {:#}", name, e),
            )
        })
}

pub fn is_present(template: &str) -> bool {
    ["{{", "{%", "{#"].iter().any(|open| template.contains(open))
}
