//! Subprocess execution behind a swappable runner.
//!
//! Every external tool (docker, kubectl, helm, rancher, tag-version, the
//! editor) is reached through [`Runner`], with the child environment spelled
//! out on each [`Invocation`] instead of being set on the parent process.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::Serialize;

use crate::error::{CommandFailedDetails, Error, Result};
use crate::utils::shell;

/// One external program call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Builds an invocation from a prefix such as `["rancher", "kubectl"]`.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<Self> {
        let (program, rest) = parts.split_first().ok_or_else(|| {
            Error::internal_unexpected("cannot build a command from an empty prefix")
        })?;
        Ok(Self::new(program.as_ref()).args(rest.iter().map(|p| p.as_ref())))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Shell-quoted command line, used for logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        shell::quote_args(&parts)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: Some(0),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code: Some(exit_code),
        }
    }

    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> &str {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        }
    }

    pub fn into_error(self, invocation: &Invocation) -> Error {
        Error::command_failed(CommandFailedDetails {
            command: invocation.display(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code(),
        }
    }
}

pub trait Runner {
    /// Runs to completion with stdout and stderr captured.
    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Runs attached to the terminal and returns the exit code.
    fn foreground(&self, invocation: &Invocation) -> Result<i32>;

    /// Captures output and turns a non-zero exit into `command.failed`.
    fn run(&self, invocation: &Invocation) -> Result<String> {
        let output = self.capture(invocation)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(output.into_error(invocation))
        }
    }
}

/// Runs real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).envs(&invocation.env);
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(invocation: &Invocation, err: std::io::Error) -> Error {
        if err.kind() == ErrorKind::NotFound {
            Error::command_not_found(&invocation.program)
        } else {
            Error::internal_io(err.to_string(), Some(invocation.display()))
        }
    }
}

impl Runner for SystemRunner {
    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput> {
        Self::command(invocation)
            .stdin(Stdio::null())
            .output()
            .map(CommandOutput::from)
            .map_err(|e| Self::spawn_error(invocation, e))
    }

    fn foreground(&self, invocation: &Invocation) -> Result<i32> {
        let status = Self::command(invocation)
            .status()
            .map_err(|e| Self::spawn_error(invocation, e))?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Replays canned outputs and records every invocation.
///
/// Responses are matched by command-line prefix; the most recently
/// registered match wins and unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: RefCell<Vec<(String, CommandOutput)>>,
    calls: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        self.responses.borrow_mut().push((prefix.into(), output));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Command lines seen so far, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Invocation::display).collect()
    }

    fn respond(&self, invocation: &Invocation) -> CommandOutput {
        self.calls.borrow_mut().push(invocation.clone());
        let line = invocation.display();
        self.responses
            .borrow()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""))
    }
}

impl Runner for ScriptedRunner {
    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput> {
        Ok(self.respond(invocation))
    }

    fn foreground(&self, invocation: &Invocation) -> Result<i32> {
        Ok(self.respond(invocation).exit_code.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_runner_captures_stdout() {
        let out = SystemRunner.capture(&Invocation::new("echo").arg("hello")).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn system_runner_passes_explicit_env() {
        let mut env = BTreeMap::new();
        env.insert("CF_TEST_VALUE".to_string(), "from-map".to_string());
        let invocation = Invocation::new("sh")
            .args(["-c", "printf %s \"$CF_TEST_VALUE\""])
            .envs(&env);

        assert_eq!(SystemRunner.run(&invocation).unwrap(), "from-map");
        assert!(std::env::var("CF_TEST_VALUE").is_err());
    }

    #[test]
    fn missing_program_is_command_not_found() {
        let err = SystemRunner
            .capture(&Invocation::new("nonexistent_command_xyz"))
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::CommandNotFound);
    }

    #[test]
    fn run_fails_on_non_zero_exit() {
        let err = SystemRunner.run(&Invocation::new("false")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::CommandFailed);
    }

    #[test]
    fn error_text_falls_back_to_stdout() {
        let output = CommandOutput {
            stdout: "stdout content\n".to_string(),
            stderr: " ".to_string(),
            success: false,
            exit_code: Some(1),
        };
        assert_eq!(output.error_text(), "stdout content");
    }

    #[test]
    fn scripted_runner_prefers_latest_matching_response() {
        let runner = ScriptedRunner::new();
        runner
            .on("docker config", CommandOutput::ok("first"))
            .on("docker config ls", CommandOutput::ok("second"));

        let ls = Invocation::new("docker").args(["config", "ls"]);
        let rm = Invocation::new("docker").args(["config", "rm", "x"]);
        assert_eq!(runner.run(&ls).unwrap(), "second");
        assert_eq!(runner.run(&rm).unwrap(), "first");
        assert_eq!(
            runner.command_lines(),
            vec!["docker config ls", "docker config rm x"]
        );
    }

    #[test]
    fn display_quotes_arguments() {
        let invocation = Invocation::new("kubectl")
            .args(["patch", "--patch", "{\"data\": 1}"]);
        assert_eq!(invocation.display(), "kubectl patch --patch '{\"data\": 1}'");
    }
}
