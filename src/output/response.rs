//! CLI response formatting and output.
//!
//! Provides JSON envelope, printing, and exit code mapping.

use compose_flow::error::Hint;
use compose_flow::{Error, ErrorCode, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
                retryable: err.retryable,
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

pub fn print_result<T: Serialize>(result: Result<T>) -> Result<()> {
    match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(&err);
            (Err(err), exit_code)
        }
    }
}

/// A failed child's own exit code wins over the error kind.
pub fn exit_code_for_error(err: &Error) -> i32 {
    if let Some(code) = err.exit_code().filter(|code| *code != 0) {
        return code;
    }

    match err.code {
        ErrorCode::ConfigMissingKey
        | ErrorCode::ConfigInvalidYaml
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument => 2,

        ErrorCode::EnvMissingVariable
        | ErrorCode::EnvRuntimeMissing
        | ErrorCode::EnvParseFailed
        | ErrorCode::EnvSubstitutionCycle => 3,

        ErrorCode::ProfileNotFound
        | ErrorCode::TaskNotFound
        | ErrorCode::BackendConfigNotFound
        | ErrorCode::KubeMissingManifest
        | ErrorCode::CommandNotFound => 4,

        ErrorCode::PolicyCheckFailed => 5,

        ErrorCode::VersionTagFailed => 6,

        ErrorCode::BackendNotConnected
        | ErrorCode::KubeContextMissing
        | ErrorCode::KubeInvalidTargetCluster => 10,

        ErrorCode::CommandFailed => 20,

        ErrorCode::InternalIoError
        | ErrorCode::InternalYamlError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}

pub fn print_json_result(result: Result<serde_json::Value>) -> Result<()> {
    print_result(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compose_flow::error::CommandFailedDetails;

    #[test]
    fn policy_failures_exit_five() {
        let err = Error::policy_check_failed(vec!["FOO not found in environment for service=app".to_string()]);
        let (result, code) = map_cmd_result_to_json::<()>(Err(err));
        assert!(result.is_err());
        assert_eq!(code, 5);
    }

    #[test]
    fn child_exit_code_is_propagated() {
        let err = Error::command_failed(CommandFailedDetails {
            command: "docker push app:1.0".to_string(),
            exit_code: Some(42),
            stdout: String::new(),
            stderr: String::new(),
        });
        assert_eq!(exit_code_for_error(&err), 42);
    }

    #[test]
    fn error_envelope_carries_code_and_hints() {
        let err = Error::backend_config_not_found("dev-app");
        let json = serde_json::to_value(CliResponse::<()>::from_error(&err)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "backend.config_not_found");
        assert!(json["error"]["hints"].is_array());
    }
}
