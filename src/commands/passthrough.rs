//! Orchestration CLIs run with the resolved environment and context.

use clap::Args;
use serde::Serialize;

use compose_flow::kube::{ContextSwitcher, KubeContext, RancherContext};
use compose_flow::utils::command::Invocation;
use compose_flow::{CommandPolicy, ProfileChecks, Workflow};

use super::{CmdResult, GlobalArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Compose,
    Kubectl,
    Helm,
    Rancher,
}

#[derive(Args)]
pub struct PassthroughArgs {
    /// Arguments handed to the tool unchanged
    #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PassthroughOutput {
    pub tool: Tool,
    pub command: String,
}

pub fn policy(tool: Tool) -> CommandPolicy {
    match tool {
        Tool::Compose => CommandPolicy {
            setup_profile: true,
            profile_checks: ProfileChecks::Env,
            ..CommandPolicy::default()
        },
        Tool::Kubectl | Tool::Helm | Tool::Rancher => CommandPolicy {
            missing_config_okay: true,
            dirty_working_copy_okay: true,
            ..CommandPolicy::default()
        },
    }
}

pub fn run(tool: Tool, args: PassthroughArgs, global: &GlobalArgs) -> CmdResult<PassthroughOutput> {
    super::run_in_workflow(global, policy(tool), |wf| execute(tool, args, wf))
}

pub fn execute(
    tool: Tool,
    args: PassthroughArgs,
    workflow: &mut Workflow<'_>,
) -> CmdResult<PassthroughOutput> {
    let invocation = match tool {
        Tool::Compose => workflow.compose_invocation(args.args)?,
        Tool::Kubectl | Tool::Helm => {
            let env = workflow.subprocess_env()?;
            KubeContext::from_config(&workflow.project().config).switch(workflow.runner(), &env)?;
            let program = if tool == Tool::Kubectl { "kubectl" } else { "helm" };
            Invocation::new(program)
                .args(args.args)
                .envs(&env)
                .current_dir(workflow.root())
        }
        Tool::Rancher => {
            let env = workflow.subprocess_env()?;
            let profile = workflow.settings().profile.clone();
            RancherContext::new(workflow.project().config.rancher()?, profile.as_deref())?
                .switch(workflow.runner(), &env)?;
            Invocation::new("rancher")
                .args(args.args)
                .envs(&env)
                .current_dir(workflow.root())
        }
    };

    let exit_code = workflow.run_command(&invocation)?;
    Ok((
        PassthroughOutput {
            tool,
            command: invocation.display(),
        },
        exit_code,
    ))
}
