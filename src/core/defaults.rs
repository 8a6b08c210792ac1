//! Conventional names and built-in defaults.

/// Directory holding the project configuration, relative to the repository.
pub const PROJECT_CONFIG_DIR: &str = "compose";
pub const PROJECT_CONFIG_FILE: &str = "compose-flow.yml";

/// Base compose file used when a profile resolves to nothing.
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

pub const APP_DIR: &str = ".compose-flow";
pub const APP_CONFIG_FILE: &str = "config.yml";
pub const ENVIRONMENTS_DIR: &str = "environments";

/// Process variables forwarded to subprocesses next to the resolved environment.
pub const OS_ENV_INCLUDES: &[&str] = &["DOCKER_HOST", "HOME", "PATH"];

pub const VERSION_VAR: &str = "VERSION";
pub const DOCKER_IMAGE_VAR: &str = "DOCKER_IMAGE";
pub const CF_ENV_VAR: &str = "CF_ENV";
pub const CF_PROJECT_VAR: &str = "CF_PROJECT";
pub const CF_ENV_NAME_VAR: &str = "CF_ENV_NAME";
pub const DOCKER_SERVICE_VAR: &str = "DOCKER_SERVICE";
pub const DOCKER_STACK_VAR: &str = "DOCKER_STACK";

/// Environment entry marking a service whose environment is copied from another.
pub const COPY_ENV_VAR: &str = "CF_COPY_ENV_FROM";

/// Top-level compose section holding compiler directives.
pub const DIRECTIVES_SECTION: &str = "compose_flow";

pub const TAG_VERSION_COMMAND: &str = "tag-version";

pub fn default_ingress_kind() -> String {
    "Ingress".to_string()
}

pub fn default_platform_annotations() -> Vec<String> {
    vec!["kubernetes.io/ingress.class: nginx".to_string()]
}

pub fn default_internal_annotations() -> Vec<String> {
    vec!["scheme: internal".to_string()]
}

pub fn default_external_annotations() -> Vec<String> {
    vec!["scheme: internet-facing".to_string()]
}

pub fn default_editor() -> String {
    "vi".to_string()
}
