//! Cluster context switching and Kubernetes/Helm artifact rendering.

use std::path::{Path, PathBuf};

use crate::checks::{CheckContext, Checker, IngressVocabulary};
use crate::config::{self, AppSpec, ManifestSpec, ProjectConfig, RancherConfig};
use crate::error::{Error, Result};
use crate::local_files::FileSystem;
use crate::utils::command::{Invocation, Runner};
use crate::utils::template;
use crate::variables::{self, Env};

/// Profiles that never name a real cluster.
const EXCLUDED_PROFILES: &[&str] = &["local"];

const CLUSTER_LS_FORMAT: &str = "{{.Cluster.Name}}: {{.Cluster.ID}}";
const MULTIPLE_PROJECTS: &str = "Multiple resources of type project found for name";
/// Noise the Rancher CLI mixes into `cluster ls` output.
const NONFATAL_OUTPUT: &[&str] = &["strconv.ParseFloat: parsing \""];

// ============================================================================
// Context switching
// ============================================================================

/// Points a CLI at the target cluster before anything is run against it.
pub trait ContextSwitcher {
    fn switch(&self, runner: &dyn Runner, env: &Env) -> Result<()>;
}

/// `kubectl config use-context` when the project names a context.
#[derive(Debug, Clone, Default)]
pub struct KubeContext {
    pub context: Option<String>,
}

impl KubeContext {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            context: config.kubectl.context.clone(),
        }
    }
}

impl ContextSwitcher for KubeContext {
    fn switch(&self, runner: &dyn Runner, env: &Env) -> Result<()> {
        let Some(context) = &self.context else {
            return Ok(());
        };
        log_status!("kube", "Switching kubectl context to {}", context);
        runner.run(
            &Invocation::new("kubectl")
                .args(["config", "use-context", context.as_str()])
                .envs(env),
        )?;
        Ok(())
    }
}

/// Cluster a profile deploys to: the `rancher.clusters` mapping, else the
/// profile name itself.
pub fn cluster_name(rancher: Option<&RancherConfig>, profile: Option<&str>) -> Result<String> {
    let profile = profile.ok_or_else(|| Error::kube_invalid_target_cluster("<none>"))?;
    if EXCLUDED_PROFILES.contains(&profile) {
        return Err(Error::kube_invalid_target_cluster(profile));
    }
    Ok(rancher
        .and_then(|r| r.clusters.get(profile))
        .cloned()
        .unwrap_or_else(|| profile.to_string()))
}

/// `rancher context switch <project>`, disambiguated by cluster id when the
/// project name exists on several clusters.
#[derive(Debug, Clone)]
pub struct RancherContext {
    pub project: String,
    pub cluster: String,
}

impl RancherContext {
    pub fn new(config: &RancherConfig, profile: Option<&str>) -> Result<Self> {
        let project = config
            .project
            .clone()
            .ok_or_else(|| Error::config_missing_key("rancher.project", None))?;
        Ok(Self {
            project,
            cluster: cluster_name(Some(config), profile)?,
        })
    }

    fn switch_command(target: &str, env: &Env) -> Invocation {
        Invocation::new("rancher")
            .args(["context", "switch", target])
            .envs(env)
    }

    fn cluster_id(&self, runner: &dyn Runner, env: &Env) -> Result<String> {
        let mut listing = runner.run(
            &Invocation::new("rancher")
                .args(["cluster", "ls", "--format", CLUSTER_LS_FORMAT])
                .envs(env),
        )?;
        for noise in NONFATAL_OUTPUT {
            listing = listing.replace(noise, "");
        }

        listing
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim() == self.cluster)
            .map(|(_, id)| id.trim().to_string())
            .ok_or_else(|| Error::kube_invalid_target_cluster(self.cluster.clone()))
    }
}

/// Candidate project ids listed between brackets in a Rancher error.
fn project_options(stderr: &str) -> Vec<&str> {
    let (Some(start), Some(end)) = (stderr.find('['), stderr.find(']')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    stderr[start + 1..end].split_whitespace().collect()
}

impl ContextSwitcher for RancherContext {
    fn switch(&self, runner: &dyn Runner, env: &Env) -> Result<()> {
        log_status!("rancher", "Switching context to project {}", self.project);
        let invocation = Self::switch_command(&self.project, env);
        let output = runner.capture(&invocation)?;
        if output.success {
            return Ok(());
        }
        if !output.stderr.contains(MULTIPLE_PROJECTS) {
            return Err(output.into_error(&invocation));
        }

        log_status!(
            "rancher",
            "Multiple clusters have a project called {}, switching by project id",
            self.project
        );
        let cluster_id = self.cluster_id(runner, env)?;
        let target = project_options(&output.stderr)
            .into_iter()
            .find(|option| option.contains(cluster_id.as_str()))
            .ok_or_else(|| Error::kube_invalid_target_cluster(self.cluster.clone()))?;

        runner.run(&Self::switch_command(target, env))?;
        Ok(())
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Flattens a manifest path into a file name fragment.
pub fn escape_path(path: &str) -> String {
    path.replace("../", "")
        .replace("./", "")
        .replace('/', "-")
        .replace(".yaml", ".yml")
        .trim_end_matches('-')
        .to_string()
}

/// A rendered manifest ready for `kubectl apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedManifest {
    pub path: PathBuf,
    pub recursive: bool,
}

/// Renders manifests and answers files against the resolved environment.
pub struct Renderer<'a> {
    pub root: &'a Path,
    pub cluster: &'a str,
    pub env: &'a Env,
    pub ingress: &'a IngressVocabulary,
    pub fs: &'a dyn FileSystem,
}

impl Renderer<'_> {
    pub fn manifest_filename(&self, path: &str) -> String {
        format!("compose-flow-{}-manifest-{}", self.cluster, escape_path(path))
    }

    pub fn answers_filename(&self, app: &str) -> String {
        format!("compose-flow-{}-{}-answers.yml", self.cluster, app)
    }

    /// `${NAME}` substitution, then the Jinja pass when template syntax is present.
    pub fn render_text(&self, name: &str, content: &str) -> Result<String> {
        let rendered = variables::render(content, self.env)?;
        if template::is_present(&rendered) {
            template::render(name, &rendered, self.env)
        } else {
            Ok(rendered)
        }
    }

    /// Renders one file, runs `checker` over its documents, then writes it.
    pub fn render_file(&self, input: &Path, output: &Path, checker: &Checker) -> Result<()> {
        log_status!(
            "kube",
            "Rendering {} to {}",
            input.display(),
            output.display()
        );
        let rendered = self.render_text(&input.display().to_string(), &self.fs.read(input)?)?;

        let documents = config::parse_documents(&rendered, &input.display().to_string())?;
        checker
            .check(&CheckContext {
                documents: &documents,
                env: self.env,
                ingress: self.ingress,
            })
            .into_result()?;

        self.fs.write(output, &rendered)
    }

    pub fn render_manifest(&self, path: &str, checker: &Checker) -> Result<RenderedManifest> {
        let source = self.root.join(path);
        let target = self.root.join(self.manifest_filename(path));

        if self.fs.is_dir(&source) {
            self.render_directory(&source, &target, checker)?;
            Ok(RenderedManifest {
                path: target,
                recursive: true,
            })
        } else if self.fs.is_file(&source) {
            self.render_file(&source, &target, checker)?;
            Ok(RenderedManifest {
                path: target,
                recursive: false,
            })
        } else {
            Err(Error::kube_missing_manifest(path))
        }
    }

    fn render_directory(&self, source: &Path, target: &Path, checker: &Checker) -> Result<()> {
        let pattern = source.join("**").join("*.y*ml");
        let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
            Error::internal_unexpected(format!("invalid manifest pattern: {}", e))
        })?;

        for entry in entries {
            let file = entry.map_err(|e| {
                Error::internal_io(e.to_string(), Some("list manifests".to_string()))
            })?;
            let relative = file.strip_prefix(source).unwrap_or(file.as_path());
            self.render_file(&file, &target.join(relative), checker)?;
        }
        Ok(())
    }

    pub fn render_answers(&self, app: &AppSpec, checker: &Checker) -> Result<PathBuf> {
        let source = self.root.join(&app.answers);
        if !self.fs.is_file(&source) {
            return Err(Error::kube_missing_manifest(&app.answers));
        }
        let target = self.root.join(self.answers_filename(&app.name));
        self.render_file(&source, &target, checker)?;
        Ok(target)
    }
}

// ============================================================================
// Deploy commands
// ============================================================================

/// `<kubectl> [--namespace N] apply [-l deploy=L --prune] --validate -f <path> [--recursive]`.
pub fn apply_command(
    kubectl: &[&str],
    manifest: &ManifestSpec,
    rendered: &RenderedManifest,
) -> Result<Invocation> {
    let mut invocation = Invocation::from_parts(kubectl)?;
    if let Some(namespace) = &manifest.namespace {
        invocation = invocation.args(["--namespace", namespace.as_str()]);
    }
    invocation = invocation.arg("apply");
    if let Some(label) = &manifest.label {
        invocation = invocation
            .arg("-l")
            .arg(format!("deploy={}", label))
            .arg("--prune");
    }
    invocation = invocation
        .args(["--validate", "-f"])
        .arg(rendered.path.display().to_string());
    if rendered.recursive {
        invocation = invocation.arg("--recursive");
    }
    Ok(invocation)
}

/// Tool that installs catalog apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTool {
    Helm,
    Rancher,
}

impl AppTool {
    pub fn list_command(&self) -> Invocation {
        match self {
            AppTool::Helm => Invocation::new("helm").args(["ls", "-q", "--all"]),
            AppTool::Rancher => {
                Invocation::new("rancher").args(["apps", "ls", "--format", "{{.App.Name}}"])
            }
        }
    }

    pub fn installed(&self, runner: &dyn Runner, env: &Env) -> Result<Vec<String>> {
        let stdout = runner.run(&self.list_command().envs(env))?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Upgrade when `installed` lists the app, install otherwise.
    pub fn deploy_command(&self, app: &AppSpec, answers: &Path, installed: &[String]) -> Invocation {
        let answers = answers.display().to_string();
        let upgrade = installed.iter().any(|name| name == &app.name);

        match (self, upgrade) {
            (AppTool::Helm, true) => Invocation::new("helm").args([
                "upgrade",
                app.name.as_str(),
                app.chart.as_str(),
                "-f",
                answers.as_str(),
                "--version",
                app.version.as_str(),
            ]),
            (AppTool::Helm, false) => Invocation::new("helm").args([
                "install",
                "--name",
                app.name.as_str(),
                "-f",
                answers.as_str(),
                "--namespace",
                app.namespace.as_str(),
                "--version",
                app.version.as_str(),
                app.chart.as_str(),
            ]),
            (AppTool::Rancher, true) => Invocation::new("rancher").args([
                "apps",
                "upgrade",
                "--answers",
                answers.as_str(),
                app.name.as_str(),
                app.version.as_str(),
            ]),
            (AppTool::Rancher, false) => Invocation::new("rancher").args([
                "apps",
                "install",
                "--answers",
                answers.as_str(),
                "--namespace",
                app.namespace.as_str(),
                "--version",
                app.version.as_str(),
                app.chart.as_str(),
                app.name.as_str(),
            ]),
        }
    }
}
