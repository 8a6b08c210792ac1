use clap::{Args, Subcommand};
use serde::Serialize;

use compose_flow::{CommandPolicy, ProfileChecks, Workflow};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand)]
pub enum ProfileCommand {
    /// Print the compiled compose file
    Cat,
    /// Check the compiled compose file against the environment
    Check {
        /// Run every compose check, not only the environment check
        #[arg(long)]
        all: bool,
    },
    /// Write the compiled compose file
    Write,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProfileOutput {
    Cat {
        profile: Option<String>,
        content: String,
        missing: Vec<String>,
    },
    Check {
        profile: Option<String>,
        checks: Vec<&'static str>,
        warnings: Vec<String>,
    },
    Write {
        profile: Option<String>,
        path: String,
    },
}

pub fn policy(args: &ProfileArgs) -> CommandPolicy {
    match args.command {
        ProfileCommand::Cat => CommandPolicy {
            env_error_okay: true,
            runtime_error_okay: true,
            dirty_working_copy_okay: true,
            ..CommandPolicy::default()
        },
        ProfileCommand::Check { .. } => CommandPolicy {
            dirty_working_copy_okay: true,
            ..CommandPolicy::default()
        },
        ProfileCommand::Write => CommandPolicy {
            setup_profile: true,
            ..CommandPolicy::default()
        },
    }
}

pub fn run(args: ProfileArgs, global: &GlobalArgs) -> CmdResult<ProfileOutput> {
    super::run_in_workflow(global, policy(&args), |wf| execute(args, wf))
}

pub fn run_text(args: ProfileArgs, global: &GlobalArgs) -> compose_flow::Result<(String, i32)> {
    let (output, exit_code) = run(args, global)?;
    match output {
        ProfileOutput::Cat { content, .. } => Ok((content, exit_code)),
        _ => Err(compose_flow::Error::validation_invalid_argument(
            "output_mode",
            "Only 'profile cat' prints text",
            None,
            None,
        )),
    }
}

pub fn execute(args: ProfileArgs, workflow: &mut Workflow<'_>) -> CmdResult<ProfileOutput> {
    let profile = workflow.settings().profile.clone();

    match args.command {
        ProfileCommand::Cat => {
            let env = workflow.env_data()?;
            let fs = workflow.fs();
            let rendered = workflow.profile()?.render_lenient(&env, fs)?;
            Ok((
                ProfileOutput::Cat {
                    profile,
                    content: rendered.text,
                    missing: rendered.missing,
                },
                0,
            ))
        }
        ProfileCommand::Check { all } => {
            let (selection, checks) = if all {
                (ProfileChecks::All, compose_flow::checks::compose()?.names())
            } else {
                (ProfileChecks::Env, vec!["check_env"])
            };
            let warnings = workflow.check_profile(selection)?;
            Ok((
                ProfileOutput::Check {
                    profile,
                    checks,
                    warnings,
                },
                0,
            ))
        }
        ProfileCommand::Write => {
            let path = workflow.write_profile()?;
            Ok((
                ProfileOutput::Write {
                    profile,
                    path: path.display().to_string(),
                },
                0,
            ))
        }
    }
}
