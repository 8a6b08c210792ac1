//! Storage for named environment blobs.

use std::path::{Path, PathBuf};

use crate::config::{BackendKind, ProjectConfig};
use crate::error::{Error, Result};
use crate::kube::{ContextSwitcher, KubeContext, RancherContext};
use crate::local_files::FileSystem;
use crate::utils::command::Runner;
use crate::variables::Env;

use super::local::LocalBackend;
use super::secret::SecretBackend;
use super::swarm::SwarmBackend;

pub trait Backend {
    fn kind(&self) -> BackendKind;

    fn list(&self) -> Result<Vec<String>>;

    /// Blob stored under `name`; `backend.config_not_found` when absent.
    fn read(&self, name: &str) -> Result<String>;

    /// Stores the contents of the file at `path` under `name`, replacing it.
    fn write(&self, name: &str, path: &Path) -> Result<()>;

    /// Removing an absent blob is not an error.
    fn remove(&self, name: &str) -> Result<()>;
}

/// What backends need from the running invocation.
#[derive(Clone, Copy)]
pub struct BackendContext<'a> {
    pub runner: &'a dyn Runner,
    pub fs: &'a dyn FileSystem,
    /// Environment handed to backend subprocesses.
    pub env: &'a Env,
    pub project: &'a ProjectConfig,
    pub project_name: &'a str,
    pub profile: Option<&'a str>,
    pub environments_root: &'a Path,
}

/// Opens the backend of `kind`, switching cluster context where needed.
pub fn open<'a>(kind: BackendKind, ctx: BackendContext<'a>) -> Result<Box<dyn Backend + 'a>> {
    match kind {
        BackendKind::Local => Ok(Box::new(LocalBackend::new(
            PathBuf::from(ctx.environments_root),
            ctx.fs,
        ))),
        BackendKind::Swarm => Ok(Box::new(SwarmBackend::new(ctx.runner, ctx.env))),
        BackendKind::Kube => {
            let profile = ctx.profile.ok_or_else(|| {
                Error::validation_missing_argument(vec!["--profile".to_string()])
            })?;
            KubeContext::from_config(ctx.project).switch(ctx.runner, ctx.env)?;
            let backend = SecretBackend::kube(ctx.runner, ctx.fs, ctx.env, profile);
            backend.check_context()?;
            Ok(Box::new(backend))
        }
        BackendKind::Rancher => {
            RancherContext::new(ctx.project.rancher()?, ctx.profile)?
                .switch(ctx.runner, ctx.env)?;
            Ok(Box::new(SecretBackend::rancher(
                ctx.runner,
                ctx.fs,
                ctx.env,
                ctx.project_name,
            )))
        }
    }
}
