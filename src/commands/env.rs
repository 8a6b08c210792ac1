use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use compose_flow::defaults;
use compose_flow::utils::command::Invocation;
use compose_flow::utils::shell;
use compose_flow::{CommandPolicy, Workflow};

use super::{require_environment, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct EnvArgs {
    #[command(subcommand)]
    pub command: EnvCommand,
}

#[derive(Subcommand)]
pub enum EnvCommand {
    /// Print the resolved environment
    Cat {
        /// Print stored values before substitution
        #[arg(long)]
        variables: bool,
    },
    /// Edit the stored environment in $EDITOR
    Edit {
        /// Start from an empty environment when none is stored
        #[arg(long)]
        force: bool,
    },
    /// Store the contents of a file as the environment
    Push {
        /// File to upload
        path: PathBuf,
    },
    /// Remove the stored environment
    Rm,
    /// List stored environments
    Ls,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EnvOutput {
    Cat {
        config_name: String,
        content: String,
    },
    Edit {
        config_name: String,
        backend: String,
        changed: bool,
    },
    Push {
        config_name: String,
        backend: String,
        path: String,
    },
    Rm {
        config_name: String,
        backend: String,
    },
    Ls {
        backend: String,
        names: Vec<String>,
    },
}

pub fn policy(args: &EnvArgs) -> CommandPolicy {
    let base = CommandPolicy {
        dirty_working_copy_okay: true,
        ..CommandPolicy::default()
    };
    match &args.command {
        EnvCommand::Cat { .. } => CommandPolicy {
            env_error_okay: true,
            runtime_error_okay: true,
            ..base
        },
        EnvCommand::Edit { force } => CommandPolicy {
            env_error_okay: true,
            runtime_error_okay: true,
            missing_config_okay: *force,
            ..base
        },
        EnvCommand::Push { .. } | EnvCommand::Rm | EnvCommand::Ls => base,
    }
}

pub fn run(args: EnvArgs, global: &GlobalArgs) -> CmdResult<EnvOutput> {
    super::run_in_workflow(global, policy(&args), |wf| execute(args, wf))
}

pub fn run_text(args: EnvArgs, global: &GlobalArgs) -> compose_flow::Result<(String, i32)> {
    let (output, exit_code) = run(args, global)?;
    match output {
        EnvOutput::Cat { content, .. } => Ok((content, exit_code)),
        _ => Err(compose_flow::Error::validation_invalid_argument(
            "output_mode",
            "Only 'env cat' prints text",
            None,
            None,
        )),
    }
}

pub fn execute(args: EnvArgs, workflow: &mut Workflow<'_>) -> CmdResult<EnvOutput> {
    let config_name = workflow.settings().config_name.clone();
    let backend = workflow.backend_kind().as_str().to_string();

    match args.command {
        EnvCommand::Cat { variables } => {
            require_environment(workflow)?;
            let environment = workflow.environment()?;
            let content = if variables {
                environment.render_persistable()
            } else {
                environment.render()
            };
            Ok((
                EnvOutput::Cat {
                    config_name,
                    content,
                },
                0,
            ))
        }
        EnvCommand::Edit { .. } => {
            require_environment(workflow)?;
            let (changed, exit_code) = edit(workflow)?;
            Ok((
                EnvOutput::Edit {
                    config_name,
                    backend,
                    changed,
                },
                exit_code,
            ))
        }
        EnvCommand::Push { path } => {
            require_environment(workflow)?;
            if !workflow.fs().is_file(&path) {
                return Err(compose_flow::Error::validation_invalid_argument(
                    "path",
                    format!("{} is not a file", path.display()),
                    None,
                    None,
                ));
            }
            workflow.push_file(&path)?;
            Ok((
                EnvOutput::Push {
                    config_name,
                    backend,
                    path: path.display().to_string(),
                },
                0,
            ))
        }
        EnvCommand::Rm => {
            require_environment(workflow)?;
            workflow.backend()?.remove(&config_name)?;
            Ok((
                EnvOutput::Rm {
                    config_name,
                    backend,
                },
                0,
            ))
        }
        EnvCommand::Ls => {
            let names = workflow.backend()?.list()?;
            Ok((EnvOutput::Ls { backend, names }, 0))
        }
    }
}

/// Opens the stored values in the editor and pushes the result when it changed.
fn edit(workflow: &mut Workflow<'_>) -> compose_flow::Result<(bool, i32)> {
    let original = workflow.environment()?.render_persistable();

    let file = tempfile::Builder::new()
        .prefix("compose-flow-env-")
        .tempfile()
        .map_err(|e| {
            compose_flow::Error::internal_io(e.to_string(), Some("create temp file".to_string()))
        })?;
    let fs = workflow.fs();
    fs.write(file.path(), &original)?;

    let editor = workflow
        .process_env()
        .get("EDITOR")
        .cloned()
        .filter(|editor| !editor.trim().is_empty())
        .unwrap_or_else(defaults::default_editor);
    let invocation = Invocation::from_parts(&shell::split(&editor)?)?
        .arg(file.path().display().to_string())
        .envs(workflow.process_env());

    let exit_code = workflow.run_command(&invocation)?;
    if exit_code != 0 {
        return Ok((false, exit_code));
    }

    let edited = fs.read(file.path())?;
    if edited == original {
        compose_flow::log_status!("env", "No changes to {}", workflow.settings().config_name);
        return Ok((false, 0));
    }

    compose_flow::environment::parse(&edited)?;
    if workflow.settings().dry_run {
        return Ok((true, 0));
    }
    workflow.push_file(file.path())?;
    Ok((true, 0))
}
