use clap::{Args, ValueEnum};
use serde::Serialize;

use compose_flow::checks;
use compose_flow::config::{AppSpec, ManifestSpec};
use compose_flow::kube::{self, AppTool, ContextSwitcher, KubeContext, RancherContext, Renderer};
use compose_flow::utils::command::Invocation;
use compose_flow::variables::Env;
use compose_flow::{CommandPolicy, ProfileChecks, Workflow};

use super::{CmdResult, GlobalArgs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployTarget {
    /// `docker stack deploy` with the compiled profile
    #[default]
    Docker,
    /// `kubectl apply` of the configured manifests
    Kubectl,
    /// Helm releases for the configured apps
    Helm,
    /// Rancher apps and manifests
    Rancher,
}

#[derive(Args)]
pub struct DeployArgs {
    /// Where to deploy
    #[arg(value_enum, default_value_t = DeployTarget::Docker)]
    pub target: DeployTarget,
}

#[derive(Debug, Serialize)]
pub struct DeployOutput {
    pub target: DeployTarget,
    pub config_name: String,
    pub version: Option<String>,
    pub commands: Vec<String>,
}

pub fn policy(args: &DeployArgs) -> CommandPolicy {
    let base = CommandPolicy {
        updates_version_vars: true,
        persist_environment: true,
        ..CommandPolicy::default()
    };
    match args.target {
        DeployTarget::Docker => CommandPolicy {
            setup_profile: true,
            profile_checks: ProfileChecks::All,
            ..base
        },
        DeployTarget::Kubectl | DeployTarget::Helm | DeployTarget::Rancher => base,
    }
}

pub fn run(args: DeployArgs, global: &GlobalArgs) -> CmdResult<DeployOutput> {
    super::run_in_workflow(global, policy(&args), |wf| execute(args, wf))
}

pub fn execute(args: DeployArgs, workflow: &mut Workflow<'_>) -> CmdResult<DeployOutput> {
    let env = workflow.subprocess_env()?;
    let (commands, exit_code) = match args.target {
        DeployTarget::Docker => deploy_stack(workflow, &env)?,
        DeployTarget::Kubectl => {
            KubeContext::from_config(&workflow.project().config).switch(workflow.runner(), &env)?;
            let manifests = workflow.project().config.kubectl.manifests.clone();
            deploy_manifests(workflow, &env, &["kubectl"], &manifests)?
        }
        DeployTarget::Helm => {
            KubeContext::from_config(&workflow.project().config).switch(workflow.runner(), &env)?;
            let apps = workflow.project().config.helm.clone();
            deploy_apps(workflow, &env, AppTool::Helm, &apps)?
        }
        DeployTarget::Rancher => {
            let profile = workflow.settings().profile.clone();
            let rancher = workflow.project().config.rancher()?.clone();
            RancherContext::new(&rancher, profile.as_deref())?.switch(workflow.runner(), &env)?;

            let (mut commands, exit_code) = deploy_apps(
                workflow,
                &env,
                AppTool::Rancher,
                &rancher.apps_for(profile.as_deref()),
            )?;
            if exit_code != 0 {
                (commands, exit_code)
            } else {
                let (more, exit_code) = deploy_manifests(
                    workflow,
                    &env,
                    &["rancher", "kubectl"],
                    &rancher.manifests_for(profile.as_deref()),
                )?;
                commands.extend(more);
                (commands, exit_code)
            }
        }
    };

    Ok((
        DeployOutput {
            target: args.target,
            config_name: workflow.settings().config_name.clone(),
            version: env.get("VERSION").cloned(),
            commands,
        },
        exit_code,
    ))
}

/// `docker stack deploy --prune --with-registry-auth --compose-file <artifact> <config-name>`.
fn deploy_stack(
    workflow: &mut Workflow<'_>,
    env: &Env,
) -> compose_flow::Result<(Vec<String>, i32)> {
    let artifact = workflow.write_profile()?;
    let invocation = Invocation::new("docker")
        .args(["stack", "deploy", "--prune", "--with-registry-auth", "--compose-file"])
        .arg(artifact.display().to_string())
        .arg(workflow.settings().config_name.clone())
        .envs(env)
        .current_dir(workflow.root());

    let exit_code = workflow.run_command(&invocation)?;
    Ok((vec![invocation.display()], exit_code))
}

fn renderer<'w>(workflow: &'w Workflow<'_>, env: &'w Env, cluster: &'w str) -> Renderer<'w> {
    Renderer {
        root: workflow.root(),
        cluster,
        env,
        ingress: workflow.ingress(),
        fs: workflow.fs(),
    }
}

fn cluster(workflow: &Workflow<'_>) -> compose_flow::Result<String> {
    kube::cluster_name(
        workflow.project().config.rancher.as_ref(),
        workflow.settings().profile.as_deref(),
    )
}

/// Renders, checks and applies each manifest, stopping at the first failure.
fn deploy_manifests(
    workflow: &Workflow<'_>,
    env: &Env,
    kubectl: &[&str],
    manifests: &[ManifestSpec],
) -> compose_flow::Result<(Vec<String>, i32)> {
    let cluster = cluster(workflow)?;
    let renderer = renderer(workflow, env, &cluster);
    let checker = checks::manifests()?;

    let mut commands = Vec::new();
    for manifest in manifests {
        let rendered = renderer.render_manifest(&manifest.path, &checker)?;
        let invocation = kube::apply_command(kubectl, manifest, &rendered)?
            .envs(env)
            .current_dir(workflow.root());
        commands.push(invocation.display());

        let exit_code = workflow.run_command(&invocation)?;
        if exit_code != 0 {
            return Ok((commands, exit_code));
        }
    }
    Ok((commands, 0))
}

/// Renders each app's answers and installs or upgrades it.
fn deploy_apps(
    workflow: &Workflow<'_>,
    env: &Env,
    tool: AppTool,
    apps: &[AppSpec],
) -> compose_flow::Result<(Vec<String>, i32)> {
    if apps.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let cluster = cluster(workflow)?;
    let renderer = renderer(workflow, env, &cluster);
    let checker = checks::answers()?;
    let installed = tool.installed(workflow.runner(), env)?;

    let mut commands = Vec::new();
    for app in apps {
        let answers = renderer.render_answers(app, &checker)?;
        let invocation = tool
            .deploy_command(app, &answers, &installed)
            .envs(env)
            .current_dir(workflow.root());
        commands.push(invocation.display());

        let exit_code = workflow.run_command(&invocation)?;
        if exit_code != 0 {
            return Ok((commands, exit_code));
        }
    }
    Ok((commands, 0))
}
