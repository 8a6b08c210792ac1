//! Policy checks over compiled compose files, Kubernetes manifests and Helm
//! answers.
//!
//! A [`Checker`] holds named check functions sharing a prefix. Every check
//! sees the whole document set plus the resolved environment and returns
//! findings; errors block the deploy, warnings are only logged.

use serde::{Deserialize, Serialize};
use serde_yml::Value;

use crate::compiler;
use crate::defaults;
use crate::error::{Error, Result};
use crate::variables::Env;

pub const COMPOSE_PREFIX: &str = "check_";
pub const MANIFEST_PREFIX: &str = "check_manifest_";
pub const ANSWERS_PREFIX: &str = "check_answers_";

/// Annotation vocabulary used to classify ingress resources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngressVocabulary {
    #[serde(default = "defaults::default_ingress_kind")]
    pub kind: String,
    /// `key: value` annotations meaning the platform manages exposure.
    #[serde(default = "defaults::default_platform_annotations")]
    pub platform_annotations: Vec<String>,
    #[serde(default = "defaults::default_internal_annotations")]
    pub internal_annotations: Vec<String>,
    #[serde(default = "defaults::default_external_annotations")]
    pub external_annotations: Vec<String>,
}

impl Default for IngressVocabulary {
    fn default() -> Self {
        Self {
            kind: defaults::default_ingress_kind(),
            platform_annotations: defaults::default_platform_annotations(),
            internal_annotations: defaults::default_internal_annotations(),
            external_annotations: defaults::default_external_annotations(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Input shared by every check.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub documents: &'a [Value],
    pub env: &'a Env,
    pub ingress: &'a IngressVocabulary,
}

pub type CheckFn = fn(&CheckContext<'_>) -> Vec<Finding>;

/// Aggregated outcome of a checker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Logs warnings; any error fails with one combined message.
    pub fn into_result(self) -> Result<Vec<String>> {
        for warning in &self.warnings {
            log_status!("check", "Warning: {}", warning);
        }
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(Error::policy_check_failed(self.errors))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Checker {
    prefix: &'static str,
    checks: Vec<(&'static str, CheckFn)>,
}

impl Checker {
    pub fn new(prefix: &'static str) -> Result<Self> {
        if prefix.is_empty() {
            return Err(Error::internal_unexpected(
                "checker defined without a check name prefix",
            ));
        }
        Ok(Self {
            prefix,
            checks: Vec::new(),
        })
    }

    pub fn register(mut self, name: &'static str, check: CheckFn) -> Result<Self> {
        if !name.starts_with(self.prefix) {
            return Err(Error::internal_unexpected(format!(
                "check {} does not start with prefix {}",
                name, self.prefix
            )));
        }
        self.checks.push((name, check));
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        self.prefix
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|(name, _)| *name).collect()
    }

    /// Narrows to the named checks, keeping registration order.
    pub fn select(&self, names: &[&str]) -> Result<Self> {
        for name in names {
            if !self.checks.iter().any(|(known, _)| known == name) {
                return Err(Error::validation_invalid_argument(
                    "check",
                    format!("unknown check (available: {})", self.names().join(", ")),
                    Some(name.to_string()),
                    None,
                ));
            }
        }
        Ok(Self {
            prefix: self.prefix,
            checks: self
                .checks
                .iter()
                .filter(|(name, _)| names.contains(name))
                .cloned()
                .collect(),
        })
    }

    pub fn check(&self, ctx: &CheckContext<'_>) -> CheckReport {
        let mut report = CheckReport::default();
        for (_, check) in &self.checks {
            for finding in check(ctx) {
                match finding.severity {
                    Severity::Error => report.errors.push(finding.message),
                    Severity::Warning => report.warnings.push(finding.message),
                }
            }
        }
        report
    }
}

/// Checks run against a compiled compose file.
pub fn compose() -> Result<Checker> {
    Checker::new(COMPOSE_PREFIX)?
        .register("check_env", check_env)?
        .register("check_constraints", check_constraints)?
        .register("check_resources", check_resources)
}

/// Checks run against rendered Kubernetes manifests.
pub fn manifests() -> Result<Checker> {
    Checker::new(MANIFEST_PREFIX)?
        .register("check_manifest_ingress", check_manifest_ingress)?
        .register("check_manifest_resources", check_manifest_resources)
}

/// Checks run against rendered Helm and Rancher answers.
pub fn answers() -> Result<Checker> {
    Checker::new(ANSWERS_PREFIX)?.register("check_answers_resources", check_answers_resources)
}

// ============================================================================
// Compose checks
// ============================================================================

fn services<'a>(ctx: &CheckContext<'a>) -> impl Iterator<Item = (&'a str, &'a Value)> {
    let documents: &'a [Value] = ctx.documents;
    documents
        .iter()
        .filter_map(|doc| doc.get("services").and_then(Value::as_mapping))
        .flat_map(|services| services.iter())
        .filter_map(|(name, service)| name.as_str().map(|name| (name, service)))
}

fn path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |current, key| current.get(*key))
}

/// Every bare environment reference must exist in the resolved environment.
pub fn check_env(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (name, service) in services(ctx) {
        for (key, value) in compiler::service_env(service) {
            if value.is_none() && !ctx.env.contains_key(&key) {
                findings.push(Finding::error(format!(
                    "{} not found in environment for service={}",
                    key, name
                )));
            }
        }
    }
    findings
}

/// Non-global services must be pinned with a `node.` placement constraint.
pub fn check_constraints(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (name, service) in services(ctx) {
        if path(service, &["deploy", "mode"]).and_then(Value::as_str) == Some("global") {
            continue;
        }

        let constraints: Vec<&str> = path(service, &["deploy", "placement", "constraints"])
            .and_then(Value::as_sequence)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if constraints.is_empty() {
            findings.push(Finding::error(format!(
                "constraints not found in service={}; please add node constraints to deploy.placement.constraints",
                name
            )));
        } else if !constraints.iter().any(|c| c.trim_start().starts_with("node.")) {
            findings.push(Finding::error(format!(
                "node constraints not found in service={}; please add node constraints to deploy.placement.constraints",
                name
            )));
        }
    }
    findings
}

/// Services must reserve and limit memory.
pub fn check_resources(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (name, service) in services(ctx) {
        let Some(resources) = path(service, &["deploy", "resources"]).filter(|r| !r.is_null())
        else {
            findings.push(Finding::error(format!(
                "resource constraints not found in service={}; please add reservations and limits to deploy.resources",
                name
            )));
            continue;
        };

        let has_memory = |side: &str| path(resources, &[side, "memory"]).is_some();
        if !has_memory("limits") || !has_memory("reservations") {
            findings.push(Finding::error(format!(
                "memory constraints not found in service={}; please add memory to deploy.resources.reservations and deploy.resources.limits",
                name
            )));
        }
    }
    findings
}

// ============================================================================
// Manifest checks
// ============================================================================

fn resource_label(doc: &Value) -> String {
    let kind = doc.get("kind").and_then(Value::as_str).unwrap_or("unknown");
    let name = path(doc, &["metadata", "name"])
        .and_then(Value::as_str)
        .unwrap_or("unnamed");
    format!("{}/{}", kind, name)
}

fn annotation_lines(doc: &Value) -> Vec<String> {
    path(doc, &["metadata", "annotations"])
        .and_then(Value::as_mapping)
        .map(|annotations| {
            annotations
                .iter()
                .filter_map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    k.as_str().map(|k| format!("{}: {}", k, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Where an ingress resource sends its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    PlatformManaged,
    Internal,
    External,
    Unclassified,
}

pub fn classify_ingress(doc: &Value, vocabulary: &IngressVocabulary) -> Exposure {
    let lines = annotation_lines(doc);
    let matches = |vocab: &[String]| {
        vocab
            .iter()
            .any(|entry| lines.iter().any(|line| line.contains(entry.as_str())))
    };

    if matches(&vocabulary.platform_annotations) {
        Exposure::PlatformManaged
    } else if matches(&vocabulary.internal_annotations) {
        Exposure::Internal
    } else if matches(&vocabulary.external_annotations) {
        Exposure::External
    } else {
        Exposure::Unclassified
    }
}

/// Ingress resources must declare whether they are internal or internet-facing.
pub fn check_manifest_ingress(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for doc in ctx.documents {
        if doc.get("kind").and_then(Value::as_str) != Some(ctx.ingress.kind.as_str()) {
            continue;
        }
        let label = resource_label(doc);
        match classify_ingress(doc, ctx.ingress) {
            Exposure::PlatformManaged | Exposure::Internal => {}
            Exposure::External => findings.push(Finding::warning(format!(
                "{} is internet-facing",
                label
            ))),
            Exposure::Unclassified => findings.push(Finding::error(format!(
                "{} has no scheme annotation; add one of: {}",
                label,
                ctx.ingress
                    .internal_annotations
                    .iter()
                    .chain(&ctx.ingress.external_annotations)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
    findings
}

fn containers(doc: &Value) -> Vec<&Value> {
    const POD_SPECS: &[&[&str]] = &[
        &["spec"],
        &["spec", "template", "spec"],
        &["spec", "jobTemplate", "spec", "template", "spec"],
    ];

    POD_SPECS
        .iter()
        .filter_map(|keys| path(doc, keys))
        .flat_map(|spec| {
            ["initContainers", "containers"]
                .into_iter()
                .filter_map(move |key| spec.get(key).and_then(Value::as_sequence))
                .flatten()
        })
        .collect()
}

/// Containers that declare resources must request and limit cpu and memory.
pub fn check_manifest_resources(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for doc in ctx.documents {
        for container in containers(doc) {
            let Some(resources) = container.get("resources") else {
                continue;
            };
            let name = container
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unnamed");

            let missing = missing_cpu_and_memory(resources);
            if !missing.is_empty() {
                findings.push(Finding::error(format!(
                    "container={} in {} is missing resources: {}",
                    name,
                    resource_label(doc),
                    missing.join(", ")
                )));
            }
        }
    }
    findings
}

fn missing_cpu_and_memory(resources: &Value) -> Vec<String> {
    let mut missing = Vec::new();
    for side in ["requests", "limits"] {
        for resource in ["cpu", "memory"] {
            if path(resources, &[side, resource]).map_or(true, Value::is_null) {
                missing.push(format!("{}.{}", side, resource));
            }
        }
    }
    missing
}

// ============================================================================
// Answers checks
// ============================================================================

fn collect_resources<'a>(value: &'a Value, at: &mut Vec<String>, found: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Mapping(mapping) => {
            for (key, child) in mapping {
                let Some(key) = key.as_str() else {
                    continue;
                };
                at.push(key.to_string());
                if key == "resources" && child.is_mapping() {
                    found.push((at.join("."), child));
                } else {
                    collect_resources(child, at, found);
                }
                at.pop();
            }
        }
        Value::Sequence(items) => {
            for (index, item) in items.iter().enumerate() {
                at.push(index.to_string());
                collect_resources(item, at, found);
                at.pop();
            }
        }
        _ => {}
    }
}

/// Every `resources` mapping in an answers file must request and limit cpu and memory.
pub fn check_answers_resources(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for doc in ctx.documents {
        let mut found = Vec::new();
        collect_resources(doc, &mut Vec::new(), &mut found);

        for (location, resources) in found {
            let missing = missing_cpu_and_memory(resources);
            if !missing.is_empty() {
                findings.push(Finding::error(format!(
                    "{} is missing resources: {}",
                    location,
                    missing.join(", ")
                )));
            }
        }
    }
    findings
}
