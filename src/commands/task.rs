use clap::{Args, Parser};
use serde::Serialize;

use compose_flow::utils::shell;
use compose_flow::{CommandPolicy, Workflow};

use super::{CmdResult, GlobalArgs};

/// First word every task command must start with.
const PROGRAM: &str = "compose-flow";

#[derive(Args)]
pub struct TaskArgs {
    /// Task name under `tasks` in compose-flow.yml
    pub name: String,

    /// Extra arguments appended to the task command
    #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskOutput {
    pub name: String,
    pub command: String,
    pub result: serde_json::Value,
}

pub fn policy(_args: &TaskArgs) -> CommandPolicy {
    CommandPolicy {
        updates_version_vars: true,
        ..CommandPolicy::default()
    }
}

pub fn run(args: TaskArgs, global: &GlobalArgs) -> CmdResult<TaskOutput> {
    super::run_in_workflow(global, policy(&args), |wf| execute(args, wf))
}

/// Splits a task command into the words of a compose-flow invocation.
pub fn task_words(name: &str, command: &str, extra: &[String]) -> compose_flow::Result<Vec<String>> {
    let mut words = shell::split(command)?;
    if words.first().map(String::as_str) != Some(PROGRAM) {
        return Err(compose_flow::Error::validation_invalid_argument(
            "task",
            format!("task {} must start with {}: {}", name, PROGRAM, command),
            Some(name.to_string()),
            None,
        ));
    }
    words.extend(extra.iter().cloned());
    Ok(words)
}

pub fn execute(args: TaskArgs, workflow: &mut Workflow<'_>) -> CmdResult<TaskOutput> {
    let command = workflow.project().config.task(&args.name)?.command.clone();
    let words = task_words(&args.name, &command, &args.args)?;

    let cli = crate::Cli::try_parse_from(&words).map_err(|e| {
        compose_flow::Error::validation_invalid_argument(
            "task",
            format!("task {} is not a valid command: {}", args.name, e),
            Some(args.name.clone()),
            None,
        )
    })?;

    let (result, exit_code) = super::run_nested(cli.command, workflow)?;
    Ok((
        TaskOutput {
            name: args.name,
            command: shell::quote_args(&words),
            result,
        },
        exit_code,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_words_append_extra_args() {
        let words = task_words(
            "migrate",
            "compose-flow compose run --rm app 'manage.py migrate'",
            &["--noinput".to_string()],
        )
        .unwrap();
        assert_eq!(
            words,
            vec!["compose-flow", "compose", "run", "--rm", "app", "manage.py migrate", "--noinput"]
        );
    }

    #[test]
    fn task_must_invoke_compose_flow() {
        let err = task_words("shell", "docker ps", &[]).unwrap_err();
        assert_eq!(err.code, compose_flow::ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn task_command_parses_as_subcommand() {
        let words = task_words("migrate", "compose-flow compose run --rm app migrate", &[]).unwrap();
        let cli = crate::Cli::try_parse_from(&words).unwrap();
        assert!(matches!(cli.command, crate::Commands::Compose(_)));
    }
}
