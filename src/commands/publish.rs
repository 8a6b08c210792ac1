use std::collections::BTreeSet;

use clap::Args;
use serde::Serialize;

use compose_flow::utils::command::Invocation;
use compose_flow::version::DockerImage;
use compose_flow::{CommandPolicy, Workflow};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PublishArgs {
    /// Also push MAJOR and MAJOR.MINOR tags for an official release
    #[arg(long)]
    pub auto_tag: bool,
}

#[derive(Debug, Serialize)]
pub struct PublishOutput {
    pub images: Vec<String>,
    pub pushed: Vec<String>,
}

pub fn policy(_args: &PublishArgs) -> CommandPolicy {
    CommandPolicy {
        updates_version_vars: true,
        setup_profile: true,
        ..CommandPolicy::default()
    }
}

pub fn run(args: PublishArgs, global: &GlobalArgs) -> CmdResult<PublishOutput> {
    super::run_in_workflow(global, policy(&args), |wf| execute(args, wf))
}

/// Images of every service the profile builds, sorted and de-duplicated.
fn built_images(workflow: &mut Workflow<'_>) -> compose_flow::Result<Vec<String>> {
    let env = workflow.env_data()?;
    let fs = workflow.fs();
    let document = workflow.profile()?.document(&env, fs)?;

    let mut images = BTreeSet::new();
    if let Some(services) = document.get("services").and_then(|s| s.as_mapping()) {
        for (name, service) in services {
            if service.get("build").is_none() {
                continue;
            }
            match service.get("image").and_then(|image| image.as_str()) {
                Some(image) => {
                    images.insert(image.to_string());
                }
                None => compose_flow::log_status!(
                    "publish",
                    "Skipping service {}: build without image",
                    name.as_str().unwrap_or_default()
                ),
            }
        }
    }
    Ok(images.into_iter().collect())
}

pub fn execute(args: PublishArgs, workflow: &mut Workflow<'_>) -> CmdResult<PublishOutput> {
    let images = built_images(workflow)?;

    let mut tags = Vec::new();
    for image in &images {
        tags.push((image.clone(), image.clone()));
        if args.auto_tag {
            for tag in DockerImage::parse(image).auto_tags()? {
                tags.push((image.clone(), tag));
            }
        }
    }

    let build = workflow.compose_invocation(["build"])?;
    let exit_code = workflow.run_command(&build)?;
    if exit_code != 0 {
        return Ok((
            PublishOutput {
                images,
                pushed: Vec::new(),
            },
            exit_code,
        ));
    }

    let env = workflow.subprocess_env()?;
    let mut pushed = Vec::new();
    for (source, target) in tags {
        if source != target {
            let tag = Invocation::new("docker")
                .args(["tag", source.as_str(), target.as_str()])
                .envs(&env);
            let exit_code = workflow.run_command(&tag)?;
            if exit_code != 0 {
                return Ok((PublishOutput { images, pushed }, exit_code));
            }
        }

        let push = Invocation::new("docker")
            .args(["push", target.as_str()])
            .envs(&env);
        let exit_code = workflow.run_command(&push)?;
        if exit_code != 0 {
            return Ok((PublishOutput { images, pushed }, exit_code));
        }
        pushed.push(target);
    }

    Ok((PublishOutput { images, pushed }, 0))
}
