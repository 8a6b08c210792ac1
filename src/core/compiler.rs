//! Compose manifest compilation.
//!
//! Applied in order to the merged document: environment copies between
//! services, `compose_flow.expand` replication, identity variables, memory
//! limit/reservation matching. The `compose_flow` section is stripped from
//! the output.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yml::{Mapping, Value};

use crate::config;
use crate::defaults;
use crate::error::{Error, Result};

// ============================================================================
// Directives
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Directives {
    #[serde(default)]
    expand: BTreeMap<String, ExpandSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpandSpec {
    #[serde(default)]
    increment: Option<IncrementSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IncrementSpec {
    /// Integer variables bumped by the replica index.
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    ports: Option<PortIncrement>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
struct PortIncrement {
    #[serde(default)]
    source_port: bool,
    #[serde(default)]
    destination_port: bool,
}

fn take_directives(document: &mut Value) -> Result<Directives> {
    let Some(root) = document.as_mapping_mut() else {
        return Ok(Directives::default());
    };
    match root.shift_remove(defaults::DIRECTIVES_SECTION) {
        None | Some(Value::Null) => Ok(Directives::default()),
        Some(section) => serde_yml::from_value(section).map_err(|e| {
            Error::config_invalid_value(
                defaults::DIRECTIVES_SECTION,
                None,
                format!("unsupported {} directive: {}", defaults::DIRECTIVES_SECTION, e),
            )
        }),
    }
}

// ============================================================================
// Environment entries
// ============================================================================

/// `(key, value)` pairs; `None` is a bare reference such as `- FOO`.
type EnvEntries = Vec<(String, Option<String>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvShape {
    List,
    Mapping,
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => config::to_yaml(other).ok().map(|s| s.trim_end().to_string()),
    }
}

fn split_entry(item: &str) -> (String, Option<String>) {
    match item.split_once('=') {
        Some((key, value)) => (key.to_string(), Some(value.to_string())),
        None => (item.to_string(), None),
    }
}

/// Environment entries of a compose service in declaration order.
pub(crate) fn service_env(service: &Value) -> EnvEntries {
    read_env(service).0
}

fn read_env(service: &Value) -> (EnvEntries, EnvShape) {
    match service.get("environment") {
        Some(Value::Sequence(items)) => (
            items
                .iter()
                .filter_map(scalar_to_string)
                .map(|item| split_entry(&item))
                .collect(),
            EnvShape::List,
        ),
        Some(Value::Mapping(map)) => (
            map.iter()
                .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), scalar_to_string(v))))
                .collect(),
            EnvShape::Mapping,
        ),
        _ => (Vec::new(), EnvShape::List),
    }
}

fn write_env(service: &mut Value, entries: &EnvEntries, shape: EnvShape) {
    let Some(map) = service.as_mapping_mut() else {
        return;
    };
    let value = match shape {
        EnvShape::List => Value::Sequence(
            entries
                .iter()
                .map(|(k, v)| match v {
                    Some(v) => Value::String(format!("{}={}", k, v)),
                    None => Value::String(k.clone()),
                })
                .collect(),
        ),
        EnvShape::Mapping => {
            let mut out = Mapping::new();
            for (k, v) in entries {
                let v = v.clone().map(Value::String).unwrap_or(Value::Null);
                out.insert(Value::String(k.clone()), v);
            }
            Value::Mapping(out)
        }
    };
    map.insert(Value::from("environment"), value);
}

fn service_name(key: &Value) -> Result<&str> {
    key.as_str().ok_or_else(|| {
        Error::config_invalid_value("services", None, "service names must be strings")
    })
}

// ============================================================================
// Steps
// ============================================================================

/// Resolves `CF_COPY_ENV_FROM=<service>` entries.
///
/// The source service's declared environment is appended after the
/// requesting service's own entries, which win on conflicting keys.
fn copy_environment(services: &mut Mapping) -> Result<()> {
    let mut declared: BTreeMap<String, EnvEntries> = BTreeMap::new();
    for (key, service) in services.iter() {
        declared.insert(service_name(key)?.to_string(), service_env(service));
    }

    for (key, service) in services.iter_mut() {
        let name = service_name(key)?.to_string();
        let (entries, shape) = read_env(service);

        let sources: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k == defaults::COPY_ENV_VAR)
            .filter_map(|(_, v)| v.clone())
            .collect();
        if sources.is_empty() {
            continue;
        }

        let mut merged: EnvEntries = entries
            .into_iter()
            .filter(|(k, _)| k != defaults::COPY_ENV_VAR)
            .collect();

        for source in sources {
            let copied = declared.get(&source).ok_or_else(|| {
                Error::config_invalid_value(
                    defaults::COPY_ENV_VAR,
                    Some(source.clone()),
                    format!(
                        "Unable to find val={} to copy into service_name={}",
                        source, name
                    ),
                )
            })?;
            for (k, v) in copied {
                if k == defaults::COPY_ENV_VAR || merged.iter().any(|(existing, _)| existing == k) {
                    continue;
                }
                merged.push((k.clone(), v.clone()));
            }
        }

        write_env(service, &merged, shape);
    }

    Ok(())
}

fn replica_count(name: &str, service: &Value) -> Result<u64> {
    service
        .get("deploy")
        .and_then(|deploy| deploy.get("replicas"))
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            Error::config_missing_key(
                format!("services.{}.deploy.replicas", name),
                Some(defaults::DIRECTIVES_SECTION.to_string()),
            )
        })
}

fn bump(part: &str, index: u64, enabled: bool, spec: &str) -> Result<String> {
    if !enabled {
        return Ok(part.to_string());
    }
    let port: u64 = part.parse().map_err(|_| {
        Error::config_invalid_value("ports", Some(spec.to_string()), "port is not an integer")
    })?;
    Ok(offset_port(port, index, spec)?.to_string())
}

/// `port + index`, which must stay a valid port number.
fn offset_port(port: u64, index: u64, spec: &str) -> Result<u64> {
    port.checked_add(index)
        .filter(|bumped| *bumped <= u64::from(u16::MAX))
        .ok_or_else(|| {
            Error::config_invalid_value(
                "ports",
                Some(spec.to_string()),
                format!("port {} incremented by {} is out of range", port, index),
            )
        })
}

/// Increments a `[ip:]source:destination[/proto]` mapping.
fn increment_port_spec(spec: &str, index: u64, inc: PortIncrement) -> Result<String> {
    let (body, proto) = match spec.split_once('/') {
        Some((body, proto)) => (body, Some(proto)),
        None => (spec, None),
    };

    let mut parts: Vec<String> = body.split(':').map(str::to_string).collect();
    let last = parts.len() - 1;
    parts[last] = bump(&parts[last], index, inc.destination_port, spec)?;
    if last >= 1 {
        parts[last - 1] = bump(&parts[last - 1], index, inc.source_port, spec)?;
    }

    let mut out = parts.join(":");
    if let Some(proto) = proto {
        out.push('/');
        out.push_str(proto);
    }
    Ok(out)
}

fn increment_port_number(value: &Value, index: u64, enabled: bool) -> Result<Value> {
    if !enabled {
        return Ok(value.clone());
    }
    match value {
        Value::Number(n) => {
            let port = n.as_u64().ok_or_else(|| {
                Error::config_invalid_value("ports", Some(n.to_string()), "port is not an integer")
            })?;
            Ok(Value::Number(offset_port(port, index, &n.to_string())?.into()))
        }
        Value::String(s) => Ok(Value::String(bump(s, index, true, s)?)),
        other => Ok(other.clone()),
    }
}

fn increment_port(entry: &Value, index: u64, inc: PortIncrement) -> Result<Value> {
    match entry {
        Value::String(spec) => Ok(Value::String(increment_port_spec(spec, index, inc)?)),
        Value::Number(_) => increment_port_number(entry, index, inc.destination_port),
        Value::Mapping(long) => {
            let mut long = long.clone();
            if let Some(published) = long.get_mut("published") {
                *published = increment_port_number(published, index, inc.source_port)?;
            }
            if let Some(target) = long.get_mut("target") {
                *target = increment_port_number(target, index, inc.destination_port)?;
            }
            Ok(Value::Mapping(long))
        }
        other => Err(Error::config_invalid_value(
            "ports",
            scalar_to_string(other),
            "unsupported port entry",
        )),
    }
}

fn increment_env(name: &str, service: &mut Value, index: u64, keys: &[String]) -> Result<()> {
    let (entries, shape) = read_env(service);
    if entries.is_empty() {
        return Ok(());
    }
    if shape == EnvShape::Mapping {
        return Err(Error::config_invalid_value(
            format!("services.{}.environment", name),
            None,
            "environment dictionary is not supported, use list format",
        ));
    }

    let mut bumped = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let value = match value {
            Some(v) if keys.contains(&key) => {
                let base: i64 = v.parse().map_err(|_| {
                    Error::config_invalid_value(
                        key.clone(),
                        Some(v.clone()),
                        "incremented environment values must be integers",
                    )
                })?;
                let bumped = i64::try_from(index)
                    .ok()
                    .and_then(|index| base.checked_add(index))
                    .ok_or_else(|| {
                        Error::config_invalid_value(
                            key.clone(),
                            Some(v.clone()),
                            format!("{} incremented by {} overflows", v, index),
                        )
                    })?;
                Some(bumped.to_string())
            }
            other => other,
        };
        bumped.push((key, value));
    }

    write_env(service, &bumped, shape);
    Ok(())
}

fn expanded_copy(name: &str, base: &Value, index: u64, spec: &ExpandSpec) -> Result<Value> {
    let mut service = base.clone();

    if let Some(deploy) = service.get_mut("deploy").and_then(Value::as_mapping_mut) {
        deploy.shift_remove("replicas");
    }

    if let Some(increment) = &spec.increment {
        if !increment.env.is_empty() {
            increment_env(name, &mut service, index, &increment.env)?;
        }
        if let Some(ports) = increment.ports {
            if let Some(Value::Sequence(entries)) = service.get("ports") {
                let bumped = entries
                    .iter()
                    .map(|entry| increment_port(entry, index, ports))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(map) = service.as_mapping_mut() {
                    map.insert(Value::from("ports"), Value::Sequence(bumped));
                }
            }
        }
    }

    Ok(service)
}

/// Replaces each service named under `compose_flow.expand` with
/// `<name>1..<name>N` copies at the same position.
fn expand_services(services: &mut Mapping, expand: &BTreeMap<String, ExpandSpec>) -> Result<()> {
    for name in expand.keys() {
        if !services.contains_key(name.as_str()) {
            return Err(Error::config_invalid_value(
                format!("{}.expand", defaults::DIRECTIVES_SECTION),
                Some(name.clone()),
                format!("cannot expand unknown service {}", name),
            ));
        }
    }

    let original = std::mem::take(services);
    for (key, service) in original {
        let Some(spec) = key.as_str().and_then(|name| expand.get(name)) else {
            services.insert(key, service);
            continue;
        };
        let name = service_name(&key)?.to_string();
        let replicas = replica_count(&name, &service)?;
        for index in 0..replicas {
            let copy = expanded_copy(&name, &service, index, spec)?;
            services.insert(Value::String(format!("{}{}", name, index + 1)), copy);
        }
    }

    Ok(())
}

/// Adds `DOCKER_SERVICE` and `DOCKER_STACK` unless already declared.
fn inject_identity(name: &str, service: &mut Value, stack_name: &str) {
    let (mut entries, shape) = read_env(service);
    for (key, value) in [
        (defaults::DOCKER_SERVICE_VAR, name),
        (defaults::DOCKER_STACK_VAR, stack_name),
    ] {
        if !entries.iter().any(|(k, _)| k == key) {
            entries.push((key.to_string(), Some(value.to_string())));
        }
    }
    write_env(service, &entries, shape);
}

/// Copies a lone memory limit or reservation to the other side.
fn normalize_resources(name: &str, service: &mut Value) {
    let Some(resources) = service
        .get_mut("deploy")
        .and_then(|deploy| deploy.get_mut("resources"))
        .and_then(Value::as_mapping_mut)
    else {
        return;
    };

    let memory = |resources: &Mapping, side: &str| {
        resources
            .get(side)
            .and_then(|s| s.get("memory"))
            .cloned()
    };

    for (side, opposite) in [("limits", "reservations"), ("reservations", "limits")] {
        let Some(value) = memory(resources, side) else {
            continue;
        };
        if memory(resources, opposite).is_some() {
            continue;
        }

        log_status!(
            "profile",
            "Warning: matching {} with {} for service {}",
            opposite,
            side,
            name
        );

        let key = Value::from(opposite);
        if !matches!(resources.get(opposite), Some(Value::Mapping(_))) {
            resources.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        if let Some(Value::Mapping(target)) = resources.get_mut(opposite) {
            target.insert(Value::from("memory"), value);
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Transforms a parsed compose document.
pub fn compile_document(mut document: Value, stack_name: &str) -> Result<Value> {
    let directives = take_directives(&mut document)?;

    let Some(services) = document
        .get_mut("services")
        .and_then(Value::as_mapping_mut)
    else {
        return Ok(document);
    };

    copy_environment(services)?;

    if !directives.expand.is_empty() {
        expand_services(services, &directives.expand)?;
    }

    for (key, service) in services.iter_mut() {
        let name = service_name(key)?.to_string();
        inject_identity(&name, service, stack_name);
        normalize_resources(&name, service);
    }

    Ok(document)
}

/// Compiles merged compose text; blank input passes through untouched.
pub fn compile(content: &str, stack_name: &str) -> Result<String> {
    if content.trim().is_empty() {
        return Ok(content.to_string());
    }
    let document = config::parse_document(content, "profile")?;
    config::to_yaml(&compile_document(document, stack_name)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(content: &str) -> Value {
        serde_yml::from_str(content).unwrap()
    }

    fn compiled(content: &str) -> Value {
        compile_document(yaml(content), "dev-app").unwrap()
    }

    fn service_names(doc: &Value) -> Vec<String> {
        doc["services"]
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn identity_variables_are_injected_without_clobbering() {
        let doc = compiled(
            "services:\n  web:\n    environment:\n      - FOO\n      - DOCKER_STACK=custom\n",
        );
        assert_eq!(
            doc["services"]["web"]["environment"],
            yaml("[FOO, DOCKER_STACK=custom, DOCKER_SERVICE=web]")
        );
    }

    #[test]
    fn identity_injection_keeps_mapping_shape() {
        let doc = compiled("services:\n  web:\n    environment:\n      FOO: bar\n");
        assert_eq!(
            doc["services"]["web"]["environment"],
            yaml("{FOO: bar, DOCKER_SERVICE: web, DOCKER_STACK: dev-app}")
        );
    }

    #[test]
    fn services_without_environment_get_identity_list() {
        let doc = compiled("services:\n  web:\n    image: web\n");
        assert_eq!(
            doc["services"]["web"]["environment"],
            yaml("[DOCKER_SERVICE=web, DOCKER_STACK=dev-app]")
        );
    }

    #[test]
    fn copy_env_appends_source_entries_declared_win() {
        let doc = compiled(
            r#"
services:
  web:
    environment:
      - DB_URL=postgres://db
      - SHARED=web
  worker:
    environment:
      - CF_COPY_ENV_FROM=web
      - SHARED=worker
"#,
        );
        assert_eq!(
            doc["services"]["worker"]["environment"],
            yaml("[SHARED=worker, DB_URL=postgres://db, DOCKER_SERVICE=worker, DOCKER_STACK=dev-app]")
        );
    }

    #[test]
    fn copy_env_from_unknown_service_names_both() {
        let err = compile_document(
            yaml("services:\n  worker:\n    environment: [CF_COPY_ENV_FROM=web]\n"),
            "dev-app",
        )
        .unwrap_err();
        assert!(err.message.contains("val=web"));
        assert!(err.message.contains("service_name=worker"));
    }

    #[test]
    fn expansion_replaces_service_in_place() {
        let doc = compiled(
            r#"
compose_flow:
  expand:
    worker: {}
services:
  web:
    image: web
  worker:
    image: worker
    deploy:
      replicas: 3
  db:
    image: pg
"#,
        );

        assert_eq!(
            service_names(&doc),
            vec!["web", "worker1", "worker2", "worker3", "db"]
        );
        for name in ["worker1", "worker2", "worker3"] {
            assert!(doc["services"][name]["deploy"].get("replicas").is_none());
        }
        assert!(doc.get("compose_flow").is_none());
    }

    #[test]
    fn expansion_increments_ports() {
        let doc = compiled(
            r#"
compose_flow:
  expand:
    app:
      increment:
        ports:
          source_port: true
          destination_port: true
services:
  app:
    ports: ["8000:8000"]
    deploy:
      replicas: 3
"#,
        );

        let ports: Vec<Value> = ["app1", "app2", "app3"]
            .iter()
            .map(|name| doc["services"][*name]["ports"][0].clone())
            .collect();
        assert_eq!(
            ports,
            vec![yaml("'8000:8000'"), yaml("'8001:8001'"), yaml("'8002:8002'")]
        );
    }

    #[test]
    fn port_increment_respects_flags_and_protocol() {
        let source_only = PortIncrement {
            source_port: true,
            destination_port: false,
        };
        assert_eq!(
            increment_port_spec("127.0.0.1:9000:80/udp", 2, source_only).unwrap(),
            "127.0.0.1:9002:80/udp"
        );
        let dest_only = PortIncrement {
            source_port: false,
            destination_port: true,
        };
        assert_eq!(increment_port_spec("80", 1, dest_only).unwrap(), "81");
    }

    #[test]
    fn expansion_increments_env_values() {
        let doc = compiled(
            r#"
compose_flow:
  expand:
    worker:
      increment:
        env: [WORKER_ID]
services:
  worker:
    environment:
      - WORKER_ID=10
      - QUEUE=jobs
    deploy:
      replicas: 2
"#,
        );
        assert_eq!(doc["services"]["worker2"]["environment"][0], yaml("WORKER_ID=11"));
        assert_eq!(doc["services"]["worker2"]["environment"][1], yaml("QUEUE=jobs"));
        assert_eq!(
            doc["services"]["worker2"]["environment"][2],
            yaml("DOCKER_SERVICE=worker2")
        );
    }

    #[test]
    fn env_increment_overflow_is_a_config_error() {
        let err = compile_document(
            yaml(
                r#"
compose_flow:
  expand:
    worker:
      increment:
        env: [N]
services:
  worker:
    environment:
      - N=9223372036854775807
    deploy:
      replicas: 2
"#,
            ),
            "dev-app",
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalidValue);
        assert!(err.message.contains("overflows"));
    }

    #[test]
    fn port_increment_past_the_port_range_is_rejected() {
        let both = PortIncrement {
            source_port: true,
            destination_port: true,
        };
        assert_eq!(
            increment_port_spec("65535:80", 1, both).unwrap_err().code,
            crate::error::ErrorCode::ConfigInvalidValue
        );
        assert!(increment_port_spec("18446744073709551615", 1, both).is_err());
        assert!(increment_port_number(&yaml("65535"), 1, true).is_err());
        assert_eq!(increment_port_number(&yaml("65534"), 1, true).unwrap(), yaml("65535"));
    }

    #[test]
    fn env_increment_rejects_mapping_environment() {
        let err = compile_document(
            yaml(
                r#"
compose_flow:
  expand:
    worker:
      increment:
        env: [WORKER_ID]
services:
  worker:
    environment:
      WORKER_ID: 1
    deploy:
      replicas: 2
"#,
            ),
            "dev-app",
        )
        .unwrap_err();
        assert!(err.message.contains("use list format"));
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let err = compile_document(
            yaml("compose_flow:\n  shrink: {}\nservices: {}\n"),
            "dev-app",
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalidValue);
    }

    #[test]
    fn recompiling_expanded_output_is_a_no_op() {
        let source = r#"
compose_flow:
  expand:
    worker: {}
services:
  worker:
    image: worker
    deploy:
      replicas: 2
"#;
        let once = compile(source, "dev-app").unwrap();
        let twice = compile(&once, "dev-app").unwrap();
        assert_eq!(yaml(&once), yaml(&twice));
    }

    #[test]
    fn lone_memory_limit_is_mirrored() {
        let doc = compiled(
            "services:\n  web:\n    deploy:\n      resources:\n        limits:\n          memory: 100M\n",
        );
        assert_eq!(
            doc["services"]["web"]["deploy"]["resources"]["reservations"]["memory"],
            yaml("100M")
        );
    }

    #[test]
    fn differing_memory_values_are_left_alone() {
        let doc = compiled(
            r#"
services:
  web:
    deploy:
      resources:
        limits: {memory: 200M}
        reservations: {memory: 100M}
"#,
        );
        let resources = &doc["services"]["web"]["deploy"]["resources"];
        assert_eq!(resources["limits"]["memory"], yaml("200M"));
        assert_eq!(resources["reservations"]["memory"], yaml("100M"));
    }

    #[test]
    fn blank_content_passes_through() {
        assert_eq!(compile("  \n", "dev-app").unwrap(), "  \n");
    }
}
