use clap::Args;
use serde::Serialize;

use compose_flow::{CommandPolicy, Workflow};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct BuildArgs {}

#[derive(Debug, Serialize)]
pub struct BuildOutput {
    pub command: String,
    pub version: Option<String>,
}

pub fn policy(_args: &BuildArgs) -> CommandPolicy {
    CommandPolicy {
        updates_version_vars: true,
        setup_profile: true,
        ..CommandPolicy::default()
    }
}

pub fn run(args: BuildArgs, global: &GlobalArgs) -> CmdResult<BuildOutput> {
    super::run_in_workflow(global, policy(&args), |wf| execute(args, wf))
}

/// `docker-compose ... build --pull` against the compiled profile.
pub fn execute(_args: BuildArgs, workflow: &mut Workflow<'_>) -> CmdResult<BuildOutput> {
    let invocation = workflow.compose_invocation(["build", "--pull"])?;
    let exit_code = workflow.run_command(&invocation)?;
    let version = workflow.environment()?.get("VERSION").map(str::to_string);

    Ok((
        BuildOutput {
            command: invocation.display(),
            version,
        },
        exit_code,
    ))
}
