use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidYaml,
    ConfigInvalidValue,
    ProfileNotFound,
    TaskNotFound,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    EnvMissingVariable,
    EnvRuntimeMissing,
    EnvParseFailed,
    EnvSubstitutionCycle,

    BackendConfigNotFound,
    BackendNotConnected,
    KubeContextMissing,
    KubeInvalidTargetCluster,
    KubeMissingManifest,

    PolicyCheckFailed,

    VersionTagFailed,

    CommandNotFound,
    CommandFailed,

    InternalIoError,
    InternalYamlError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ProfileNotFound => "profile.not_found",
            ErrorCode::TaskNotFound => "task.not_found",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::EnvMissingVariable => "env.missing_variable",
            ErrorCode::EnvRuntimeMissing => "env.runtime_missing",
            ErrorCode::EnvParseFailed => "env.parse_failed",
            ErrorCode::EnvSubstitutionCycle => "env.substitution_cycle",

            ErrorCode::BackendConfigNotFound => "backend.config_not_found",
            ErrorCode::BackendNotConnected => "backend.not_connected",
            ErrorCode::KubeContextMissing => "kube.context_missing",
            ErrorCode::KubeInvalidTargetCluster => "kube.invalid_target_cluster",
            ErrorCode::KubeMissingManifest => "kube.missing_manifest",

            ErrorCode::PolicyCheckFailed => "policy.check_failed",

            ErrorCode::VersionTagFailed => "version.tag_failed",

            ErrorCode::CommandNotFound => "command.not_found",
            ErrorCode::CommandFailed => "command.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalYamlError => "internal.yaml_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidYamlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingVariablesDetails {
    pub variables: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvParseDetails {
    pub line_number: usize,
    pub line: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheckDetails {
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionTagDetails {
    pub cause: String,
    pub fallback_version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key '{}'", key),
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            format!("Invalid YAML in {}: {}", path, err),
            to_details(ConfigInvalidYamlDetails {
                path,
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            problem.clone(),
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem,
            }),
        )
    }

    pub fn profile_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ProfileNotFound,
            format!("profile={} not found", name),
            to_details(NotFoundDetails { id: name }),
        )
        .with_hint("Add the profile under `profiles` in compose-flow.yml")
    }

    pub fn task_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::TaskNotFound,
            format!("task name={} not found", name),
            to_details(NotFoundDetails { id: name }),
        )
        .with_hint("Add the task under `tasks` in compose-flow.yml")
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            format!("Missing required argument: {}", args.join(", ")),
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            problem.clone(),
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem,
                id,
                tried,
            }),
        )
    }

    pub fn env_missing_variables(variables: Vec<String>) -> Self {
        let message = variables
            .iter()
            .map(|name| format!("{} not found in environment", name))
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(
            ErrorCode::EnvMissingVariable,
            message,
            to_details(MissingVariablesDetails { variables }),
        )
    }

    pub fn env_runtime_missing(variables: Vec<String>) -> Self {
        let message = variables
            .iter()
            .map(|name| format!("runtime substitution for {} not found", name))
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(
            ErrorCode::EnvRuntimeMissing,
            message,
            to_details(MissingVariablesDetails { variables }),
        )
        .with_hint("Export the referenced variables before running this command")
    }

    pub fn env_parse_failed(line_number: usize, line: impl Into<String>) -> Self {
        let line = line.into();
        Self::new(
            ErrorCode::EnvParseFailed,
            format!(
                "unable to parse line number {}, edit your env: {}",
                line_number, line
            ),
            to_details(EnvParseDetails { line_number, line }),
        )
    }

    pub fn env_substitution_cycle(variables: Vec<String>) -> Self {
        Self::new(
            ErrorCode::EnvSubstitutionCycle,
            format!(
                "substitution did not converge for: {}",
                variables.join(", ")
            ),
            to_details(MissingVariablesDetails { variables }),
        )
    }

    pub fn backend_config_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::BackendConfigNotFound,
            format!("config name={} not found", name),
            to_details(NotFoundDetails { id: name }),
        )
        .with_hint("Run 'compose-flow env edit --force' to create it")
    }

    pub fn backend_not_connected(backend: &str, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::BackendNotConnected,
            format!("unable to connect to the {} backend", backend),
            to_details(InternalErrorDetails {
                error: error.into(),
                context: Some(backend.to_string()),
            }),
        )
    }

    pub fn kube_context_missing() -> Self {
        Self::new(
            ErrorCode::KubeContextMissing,
            "No current context configured in kubectl!",
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Set one with 'kubectl config use-context <name>'")
    }

    pub fn kube_invalid_target_cluster(profile: impl Into<String>) -> Self {
        let profile = profile.into();
        Self::new(
            ErrorCode::KubeInvalidTargetCluster,
            format!(
                "Invalid profile '{}' for default cluster logic - please specify an explicit cluster mapping in compose-flow.yml and use a profile other than '{}'",
                profile, profile
            ),
            to_details(NotFoundDetails { id: profile }),
        )
    }

    pub fn kube_missing_manifest(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::KubeMissingManifest,
            format!("Missing manifest at path: {}", path),
            to_details(NotFoundDetails { id: path }),
        )
    }

    pub fn policy_check_failed(errors: Vec<String>) -> Self {
        Self::new(
            ErrorCode::PolicyCheckFailed,
            errors.join("\n"),
            to_details(PolicyCheckDetails { errors }),
        )
    }

    pub fn version_tag_failed(cause: impl Into<String>, fallback_version: impl Into<String>) -> Self {
        let cause = cause.into();
        Self::new(
            ErrorCode::VersionTagFailed,
            format!("unable to run tag-version ({})", cause),
            to_details(VersionTagDetails {
                cause,
                fallback_version: fallback_version.into(),
            }),
        )
        .with_hint("Commit your changes, pass --dirty, or set options.<env>.dirty_working_copy_okay")
    }

    pub fn command_not_found(program: impl Into<String>) -> Self {
        let program = program.into();
        Self::new(
            ErrorCode::CommandNotFound,
            format!("{} not found on PATH", program),
            to_details(NotFoundDetails { id: program }),
        )
    }

    pub fn command_failed(details: CommandFailedDetails) -> Self {
        let message = if details.stderr.trim().is_empty() {
            format!("{} failed", details.command)
        } else {
            format!("{} failed: {}", details.command, details.stderr.trim())
        };
        Self::new(ErrorCode::CommandFailed, message, to_details(details))
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_yaml(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalYamlError,
            format!("YAML error: {}", error),
            to_details(InternalErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::BackendConfigNotFound
    }

    pub fn is_env_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::EnvMissingVariable | ErrorCode::EnvRuntimeMissing
        )
    }

    /// Fallback version carried by a `version.tag_failed` error.
    pub fn fallback_version(&self) -> Option<&str> {
        if self.code != ErrorCode::VersionTagFailed {
            return None;
        }
        self.details.get("fallbackVersion").and_then(Value::as_str)
    }

    /// Exit code of the failed child process, if any.
    pub fn exit_code(&self) -> Option<i32> {
        if self.code != ErrorCode::CommandFailed {
            return None;
        }
        self.details
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
    }
}
