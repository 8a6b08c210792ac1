use clap::Args;
use serde::Serialize;

use compose_flow::local_files;
use compose_flow::utils::command::SystemRunner;
use compose_flow::variables::Env;
use compose_flow::{CommandPolicy, Overrides, Settings, Workflow};

pub type CmdResult<T> = compose_flow::Result<(T, i32)>;

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Environment to operate on
    #[arg(short = 'e', long, global = true)]
    pub environment: Option<String>,

    /// Profile to compile (defaults to the environment)
    #[arg(short = 'p', long, global = true)]
    pub profile: Option<String>,

    /// Project name (defaults to the current directory name)
    #[arg(short = 'n', long = "project-name", global = true)]
    pub project_name: Option<String>,

    /// Stored environment name (defaults to <environment>-<project>)
    #[arg(short = 'c', long = "config-name", global = true)]
    pub config_name: Option<String>,

    /// Remote to use (defaults to the environment)
    #[arg(short = 'r', long, global = true)]
    pub remote: Option<String>,

    /// Use this version instead of running tag-version
    #[arg(long = "tag-version", global = true)]
    pub tag_version: Option<String>,

    /// Allow an unclean working copy for this run
    #[arg(long, global = true)]
    pub dirty: bool,

    /// Print commands instead of running them
    #[arg(long = "dry-run", visible_alias = "noop", global = true)]
    pub dry_run: bool,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            environment: self.environment.clone(),
            profile: self.profile.clone(),
            project_name: self.project_name.clone(),
            config_name: self.config_name.clone(),
            remote: self.remote.clone(),
            tag_version: self.tag_version.clone(),
            dirty: self.dirty,
            dry_run: self.dry_run,
        }
    }
}

pub mod build;
pub mod deploy;
pub mod env;
pub mod passthrough;
pub mod profile;
pub mod publish;
pub mod task;

/// Builds the run's workflow from the process state and runs `f` under `policy`.
pub(crate) fn run_in_workflow<T, F>(global: &GlobalArgs, policy: CommandPolicy, f: F) -> CmdResult<T>
where
    F: FnOnce(&mut Workflow<'_>) -> CmdResult<T>,
{
    let runner = SystemRunner;
    let fs = local_files::local();
    let process_env: Env = std::env::vars().collect();
    let cwd = std::env::current_dir().map_err(|e| {
        compose_flow::Error::internal_io(e.to_string(), Some("read current directory".to_string()))
    })?;

    let settings = Settings::resolve(global.overrides(), &cwd)?;
    let mut workflow = Workflow::load(settings, &cwd, process_env, &runner, &fs)?;
    execute_with_policy(&mut workflow, policy, f)
}

/// Applies `policy`, prepares the profile, runs `f`, then persists the
/// environment if the command succeeded and the policy asks for it.
pub(crate) fn execute_with_policy<T, F>(
    workflow: &mut Workflow<'_>,
    policy: CommandPolicy,
    f: F,
) -> CmdResult<T>
where
    F: FnOnce(&mut Workflow<'_>) -> CmdResult<T>,
{
    workflow.set_policy(policy);
    workflow.prepare()?;
    let (output, exit_code) = f(workflow)?;
    if exit_code == 0 {
        workflow.finish()?;
    }
    Ok((output, exit_code))
}

/// Environment name, required by commands that read or write a stored environment.
pub(crate) fn require_environment(workflow: &Workflow<'_>) -> compose_flow::Result<String> {
    workflow
        .settings()
        .environment
        .clone()
        .ok_or_else(|| compose_flow::Error::validation_missing_argument(vec!["--environment".to_string()]))
}

fn to_json<T: Serialize>(result: CmdResult<T>) -> CmdResult<serde_json::Value> {
    let (output, exit_code) = result?;
    let value = serde_json::to_value(output).map_err(|e| {
        compose_flow::Error::internal_json(e.to_string(), Some("serialize response".to_string()))
    })?;
    Ok((value, exit_code))
}

/// Runs `command` inside an existing workflow, as tasks do. Version variables
/// are refreshed and nothing is persisted.
pub(crate) fn run_nested(
    command: crate::Commands,
    workflow: &mut Workflow<'_>,
) -> CmdResult<serde_json::Value> {
    fn nested(mut policy: CommandPolicy) -> CommandPolicy {
        policy.updates_version_vars = true;
        policy.persist_environment = false;
        policy
    }

    match command {
        crate::Commands::Env(args) => to_json(execute_with_policy(
            workflow,
            nested(env::policy(&args)),
            |wf| env::execute(args, wf),
        )),
        crate::Commands::Profile(args) => to_json(execute_with_policy(
            workflow,
            nested(profile::policy(&args)),
            |wf| profile::execute(args, wf),
        )),
        crate::Commands::Build(args) => to_json(execute_with_policy(
            workflow,
            nested(build::policy(&args)),
            |wf| build::execute(args, wf),
        )),
        crate::Commands::Publish(args) => to_json(execute_with_policy(
            workflow,
            nested(publish::policy(&args)),
            |wf| publish::execute(args, wf),
        )),
        crate::Commands::Deploy(args) => to_json(execute_with_policy(
            workflow,
            nested(deploy::policy(&args)),
            |wf| deploy::execute(args, wf),
        )),
        crate::Commands::Compose(args) => to_json(execute_with_policy(
            workflow,
            nested(passthrough::policy(passthrough::Tool::Compose)),
            |wf| passthrough::execute(passthrough::Tool::Compose, args, wf),
        )),
        crate::Commands::Kubectl(args) => to_json(execute_with_policy(
            workflow,
            nested(passthrough::policy(passthrough::Tool::Kubectl)),
            |wf| passthrough::execute(passthrough::Tool::Kubectl, args, wf),
        )),
        crate::Commands::Helm(args) => to_json(execute_with_policy(
            workflow,
            nested(passthrough::policy(passthrough::Tool::Helm)),
            |wf| passthrough::execute(passthrough::Tool::Helm, args, wf),
        )),
        crate::Commands::Rancher(args) => to_json(execute_with_policy(
            workflow,
            nested(passthrough::policy(passthrough::Tool::Rancher)),
            |wf| passthrough::execute(passthrough::Tool::Rancher, args, wf),
        )),
        crate::Commands::Task(args) => Err(compose_flow::Error::validation_invalid_argument(
            "task",
            format!("task {} cannot run another task", args.name),
            Some(args.name),
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
    ($tool:expr, $args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($tool, $args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (compose_flow::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Env(args) => dispatch!(args, global, env),
        crate::Commands::Profile(args) => dispatch!(args, global, profile),
        crate::Commands::Build(args) => dispatch!(args, global, build),
        crate::Commands::Publish(args) => dispatch!(args, global, publish),
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Task(args) => dispatch!(args, global, task),
        crate::Commands::Compose(args) => {
            dispatch!(passthrough::Tool::Compose, args, global, passthrough)
        }
        crate::Commands::Kubectl(args) => {
            dispatch!(passthrough::Tool::Kubectl, args, global, passthrough)
        }
        crate::Commands::Helm(args) => dispatch!(passthrough::Tool::Helm, args, global, passthrough),
        crate::Commands::Rancher(args) => {
            dispatch!(passthrough::Tool::Rancher, args, global, passthrough)
        }
    }
}

/// Commands whose product is plain text on stdout.
pub(crate) fn run_text(
    command: crate::Commands,
    global: &GlobalArgs,
) -> compose_flow::Result<(String, i32)> {
    match command {
        crate::Commands::Env(args) => env::run_text(args, global),
        crate::Commands::Profile(args) => profile::run_text(args, global),
        _ => Err(compose_flow::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support text output",
            None,
            None,
        )),
    }
}
