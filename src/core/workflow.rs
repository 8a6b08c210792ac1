//! Per-invocation state shared by every subcommand.
//!
//! A [`Workflow`] owns the settings resolved from the command line, both
//! configuration files and the once-computed values a run needs: the
//! release version, the resolved environment and the compiled profile.
//! Each value is computed on first use and dropped by [`Workflow::reset`].

use std::path::{Path, PathBuf};

use crate::checks::{self, Checker, IngressVocabulary};
use crate::config::{self, AppConfig, BackendKind, LoadedProject, OverlayRef};
use crate::defaults;
use crate::environment::{self, Backend, BackendContext, Environment, Identity, Tolerances};
use crate::error::{Error, ErrorCode, Result};
use crate::local_files::FileSystem;
use crate::paths;
use crate::profile::Profile;
use crate::utils::command::{Invocation, Runner};
use crate::variables::Env;
use crate::version;

/// Values given on the command line, with their defaults applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub environment: Option<String>,
    pub profile: Option<String>,
    pub project_name: String,
    pub config_name: String,
    pub remote: Option<String>,
    pub tag_version: Option<String>,
    pub dirty: bool,
    pub dry_run: bool,
}

/// Raw global flags before defaults are applied.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub environment: Option<String>,
    pub profile: Option<String>,
    pub project_name: Option<String>,
    pub config_name: Option<String>,
    pub remote: Option<String>,
    pub tag_version: Option<String>,
    pub dirty: bool,
    pub dry_run: bool,
}

impl Settings {
    /// Profile and remote default to the environment; the project name to
    /// the basename of `cwd`.
    pub fn resolve(overrides: Overrides, cwd: &Path) -> Result<Self> {
        let project_name = match overrides.project_name {
            Some(name) => name,
            None => cwd
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| {
                    Error::validation_missing_argument(vec!["--project-name".to_string()])
                })?,
        };

        let environment = overrides.environment;
        let config_name = overrides.config_name.unwrap_or_else(|| {
            match &environment {
                Some(env) => format!("{}-{}", env, project_name),
                None => project_name.clone(),
            }
        });

        Ok(Self {
            profile: overrides.profile.or_else(|| environment.clone()),
            remote: overrides.remote.or_else(|| environment.clone()),
            environment,
            project_name,
            config_name,
            tag_version: overrides.tag_version,
            dirty: overrides.dirty,
            dry_run: overrides.dry_run,
        })
    }

    /// `<environment>-<project>`, used as the compose project and legacy
    /// environment name.
    pub fn env_name(&self) -> String {
        match &self.environment {
            Some(env) => format!("{}-{}", env, self.project_name),
            None => self.project_name.clone(),
        }
    }
}

/// Which compose checks run before a command touches the profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfileChecks {
    #[default]
    None,
    /// Only `check_env`.
    Env,
    All,
}

/// What a subcommand needs from the run and which failures it tolerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandPolicy {
    pub updates_version_vars: bool,
    pub persist_environment: bool,
    pub setup_profile: bool,
    pub profile_checks: ProfileChecks,
    pub missing_config_okay: bool,
    pub env_error_okay: bool,
    pub runtime_error_okay: bool,
    pub missing_profile_okay: bool,
    pub dirty_working_copy_okay: bool,
}

pub struct Workflow<'a> {
    settings: Settings,
    policy: CommandPolicy,
    project: LoadedProject,
    app: AppConfig,
    process_env: Env,
    base_env: Env,
    environments_root: PathBuf,
    runner: &'a dyn Runner,
    fs: &'a dyn FileSystem,
    version: Option<String>,
    environment: Option<Environment>,
    profile: Option<Profile>,
}

impl<'a> Workflow<'a> {
    pub fn new(
        settings: Settings,
        project: LoadedProject,
        app: AppConfig,
        process_env: Env,
        runner: &'a dyn Runner,
        fs: &'a dyn FileSystem,
    ) -> Result<Self> {
        let environments_root =
            paths::environments_root(app.environments_root.as_deref(), &process_env)?;

        let mut base_env: Env = defaults::OS_ENV_INCLUDES
            .iter()
            .filter_map(|key| {
                process_env
                    .get(*key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();
        if let Some(host) = config::docker_host(settings.remote.as_deref(), &project.config, &app) {
            base_env.insert("DOCKER_HOST".to_string(), host.to_string());
        }

        Ok(Self {
            settings,
            policy: CommandPolicy::default(),
            project,
            app,
            process_env,
            base_env,
            environments_root,
            runner,
            fs,
            version: None,
            environment: None,
            profile: None,
        })
    }

    /// Loads the project and application configuration for `cwd`.
    pub fn load(
        settings: Settings,
        cwd: &Path,
        process_env: Env,
        runner: &'a dyn Runner,
        fs: &'a dyn FileSystem,
    ) -> Result<Self> {
        let project = config::load_project(cwd, &process_env, fs)?;
        let app = config::load_app(&process_env, fs)?;
        Self::new(settings, project, app, process_env, runner, fs)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn policy(&self) -> CommandPolicy {
        self.policy
    }

    /// Switches policy; memoized values computed under the old one are dropped.
    pub fn set_policy(&mut self, policy: CommandPolicy) {
        if self.policy != policy {
            self.policy = policy;
            self.reset();
        }
    }

    pub fn project(&self) -> &LoadedProject {
        &self.project
    }

    pub fn root(&self) -> &Path {
        &self.project.root
    }

    pub fn process_env(&self) -> &Env {
        &self.process_env
    }

    pub fn runner(&self) -> &'a dyn Runner {
        self.runner
    }

    pub fn fs(&self) -> &'a dyn FileSystem {
        self.fs
    }

    pub fn ingress(&self) -> &IngressVocabulary {
        &self.project.config.checks.ingress
    }

    pub fn backend_kind(&self) -> BackendKind {
        config::select_backend(self.settings.remote.as_deref(), &self.project.config, &self.app)
    }

    pub fn environments_root(&self) -> &Path {
        &self.environments_root
    }

    /// Opens the environment backend for the selected remote.
    pub fn backend(&self) -> Result<Box<dyn Backend + '_>> {
        environment::open(
            self.backend_kind(),
            BackendContext {
                runner: self.runner,
                fs: self.fs,
                env: &self.base_env,
                project: &self.project.config,
                project_name: &self.settings.project_name,
                profile: self.settings.profile.as_deref(),
                environments_root: &self.environments_root,
            },
        )
    }

    /// Drops the memoized version, environment and profile.
    pub fn reset(&mut self) {
        self.version = None;
        self.environment = None;
        self.profile = None;
    }

    fn version_error_okay(&self) -> bool {
        self.policy.dirty_working_copy_okay
            || self.settings.dirty
            || self
                .project
                .config
                .dirty_working_copy_okay(self.settings.environment.as_deref())
    }

    /// Release version, from `--tag-version` or the `tag-version` utility.
    pub fn version(&mut self) -> Result<String> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }

        let version = match &self.settings.tag_version {
            Some(version) => version.clone(),
            None => match version::detect(
                self.runner,
                &self.base_env,
                &self.project.root,
                self.settings.environment.as_deref(),
            ) {
                Ok(version) => version,
                Err(err) => match err.fallback_version().map(str::to_string) {
                    Some(fallback) if self.version_error_okay() => {
                        log_status!(
                            "version",
                            "Warning: {}, using version {}",
                            err.message,
                            fallback
                        );
                        fallback
                    }
                    _ => return Err(err),
                },
            },
        };

        self.version = Some(version.clone());
        Ok(version)
    }

    /// Resolved environment. Without `--environment` it is empty and no
    /// backend is contacted.
    pub fn environment(&mut self) -> Result<&Environment> {
        let environment = match self.environment.take() {
            Some(environment) => environment,
            None => self.load_environment()?,
        };
        Ok(&*self.environment.insert(environment))
    }

    fn load_environment(&mut self) -> Result<Environment> {
        let Some(name) = self.settings.environment.clone() else {
            return Ok(Environment::empty());
        };

        let read = self.backend()?.read(&self.settings.config_name);
        let raw = match read {
            Ok(raw) => raw,
            Err(err) if err.is_not_found() && self.policy.missing_config_okay => {
                log_status!(
                    "env",
                    "No stored environment named {}, starting empty",
                    self.settings.config_name
                );
                String::new()
            }
            Err(err) => return Err(err),
        };

        let mut loaded = Environment::load(
            &raw,
            &self.process_env,
            Tolerances {
                runtime_error_okay: self.policy.runtime_error_okay,
                env_error_okay: self.policy.env_error_okay,
            },
        )?;

        loaded.inject_identity(&Identity {
            environment: Some(name),
            project: self.settings.project_name.clone(),
            env_name: self.settings.env_name(),
        });

        if self.policy.updates_version_vars {
            let version = self.version()?;
            let fallback = version::default_image(
                config::image_prefix(&self.project.config, &self.app),
                &self.settings.project_name,
                &version,
            );
            loaded.apply_version(&version, &fallback);
        }

        Ok(loaded)
    }

    /// Resolved environment values.
    pub fn env_data(&mut self) -> Result<Env> {
        Ok(self.environment()?.data().clone())
    }

    /// Compiled profile for the selected profile name.
    pub fn profile(&mut self) -> Result<&mut Profile> {
        let profile = match self.profile.take() {
            Some(profile) => profile,
            None => self.load_profile()?,
        };
        Ok(self.profile.insert(profile))
    }

    fn load_profile(&self) -> Result<Profile> {
        let name = self.settings.profile.as_deref();
        let stack_name = self.settings.config_name.clone();
        match Profile::new(name, &self.project.config, &self.project.root, stack_name.clone()) {
            Err(err)
                if err.code == ErrorCode::ProfileNotFound && self.policy.missing_profile_okay =>
            {
                log_status!(
                    "profile",
                    "Warning: {}, using {}",
                    err.message,
                    defaults::DEFAULT_COMPOSE_FILE
                );
                Ok(Profile::from_refs(
                    name,
                    vec![OverlayRef::Name(defaults::DEFAULT_COMPOSE_FILE.to_string())],
                    &self.project.root,
                    stack_name,
                ))
            }
            other => other,
        }
    }

    /// Writes the rendered compose artifact once per run.
    pub fn write_profile(&mut self) -> Result<PathBuf> {
        let env = self.env_data()?;
        let fs = self.fs;
        self.profile()?.write(&env, fs)
    }

    /// Runs the selected compose checks against the compiled profile.
    pub fn check_profile(&mut self, selection: ProfileChecks) -> Result<Vec<String>> {
        let checker = match selection {
            ProfileChecks::None => return Ok(Vec::new()),
            ProfileChecks::Env => checks::compose()?.select(&["check_env"])?,
            ProfileChecks::All => checks::compose()?,
        };
        self.run_checks(&checker)
    }

    fn run_checks(&mut self, checker: &Checker) -> Result<Vec<String>> {
        let env = self.env_data()?;
        let ingress = self.ingress().clone();
        let fs = self.fs;
        self.profile()?
            .check(checker, &env, &ingress, fs)?
            .into_result()
    }

    /// Applies the profile part of the policy: checks, then the artifact.
    pub fn prepare(&mut self) -> Result<()> {
        if self.policy.profile_checks != ProfileChecks::None {
            self.check_profile(self.policy.profile_checks)?;
        }
        if self.policy.setup_profile {
            self.write_profile()?;
        }
        Ok(())
    }

    /// Writes the persistable environment back when the policy asks for it.
    pub fn finish(&mut self) -> Result<()> {
        if self.policy.persist_environment {
            self.persist_environment()?;
        }
        Ok(())
    }

    /// Stores the persistable environment under the config name.
    pub fn persist_environment(&mut self) -> Result<()> {
        if self.settings.environment.is_none() {
            return Ok(());
        }
        let content = self.environment()?.render_persistable();
        if self.settings.dry_run {
            log_status!(
                "env",
                "Dry run: not persisting {}",
                self.settings.config_name
            );
            return Ok(());
        }

        let file = tempfile::NamedTempFile::new().map_err(|e| {
            Error::internal_io(e.to_string(), Some("create temp file".to_string()))
        })?;
        self.fs.write(file.path(), &content)?;
        self.push_file(file.path())
    }

    /// Stores the file at `path` under the config name.
    pub fn push_file(&self, path: &Path) -> Result<()> {
        log_status!(
            "env",
            "Writing {} to the {} backend",
            self.settings.config_name,
            self.backend_kind().as_str()
        );
        self.backend()?.write(&self.settings.config_name, path)
    }

    /// Environment handed to subprocesses: forwarded process variables,
    /// then the resolved environment, then the remote's `DOCKER_HOST`.
    pub fn subprocess_env(&mut self) -> Result<Env> {
        let mut env: Env = defaults::OS_ENV_INCLUDES
            .iter()
            .filter_map(|key| {
                self.process_env
                    .get(*key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();
        env.extend(self.env_data()?);
        if let Some(host) = self.base_env.get("DOCKER_HOST") {
            env.insert("DOCKER_HOST".to_string(), host.clone());
        }
        Ok(env)
    }

    /// Runs `invocation` in the foreground; in a dry run it is only echoed.
    pub fn run_command(&self, invocation: &Invocation) -> Result<i32> {
        if self.settings.dry_run {
            log_status!("dry-run", "{}", invocation.display());
            return Ok(0);
        }
        log_status!("run", "{}", invocation.display());
        self.runner.foreground(invocation)
    }

    /// `docker-compose --project-name <env-name> -f <artifact> <args...>`.
    pub fn compose_invocation<I, S>(&mut self, args: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let artifact = self.write_profile()?;
        let env = self.subprocess_env()?;
        Ok(Invocation::new("docker-compose")
            .arg("--project-name")
            .arg(self.settings.env_name())
            .arg("-f")
            .arg(artifact.display().to_string())
            .args(args)
            .envs(&env)
            .current_dir(&self.project.root))
    }
}
