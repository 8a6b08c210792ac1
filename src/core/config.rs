//! Project (`compose-flow.yml`) and application (`~/.compose-flow/config.yml`)
//! configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checks::IngressVocabulary;
use crate::error::{Error, Result};
use crate::local_files::FileSystem;
use crate::paths;
use crate::variables::Env;

// ============================================================================
// YAML Parsing Utilities (internal)
// ============================================================================

/// Parse YAML into a typed value; blank input yields the type's default.
pub(crate) fn from_yaml<T: DeserializeOwned + Default>(content: &str, source: &str) -> Result<T> {
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yml::from_str(content).map_err(|e| Error::config_invalid_yaml(source, e))
}

/// Parse a YAML document into an untyped, order-preserving value.
pub(crate) fn parse_document(content: &str, source: &str) -> Result<serde_yml::Value> {
    if content.trim().is_empty() {
        return Ok(serde_yml::Value::Null);
    }
    serde_yml::from_str(content).map_err(|e| Error::config_invalid_yaml(source, e))
}

/// Parse every document of a multi-document stream, skipping empty ones.
pub(crate) fn parse_documents(content: &str, source: &str) -> Result<Vec<serde_yml::Value>> {
    let mut documents = Vec::new();
    for document in serde_yml::Deserializer::from_str(content) {
        let value = serde_yml::Value::deserialize(document)
            .map_err(|e| Error::config_invalid_yaml(source, e))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

pub(crate) fn to_yaml<T: Serialize>(data: &T) -> Result<String> {
    serde_yml::to_string(data)
        .map_err(|e| Error::internal_yaml(e.to_string(), Some("serialize yaml".to_string())))
}

// ============================================================================
// Project configuration
// ============================================================================

/// One entry of a profile: a bare overlay name or a name under a directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OverlayRef {
    Name(String),
    Located {
        name: String,
        #[serde(default)]
        path: Option<String>,
    },
}

impl OverlayRef {
    pub fn name(&self) -> &str {
        match self {
            OverlayRef::Name(name) | OverlayRef::Located { name, .. } => name,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            OverlayRef::Name(_) => None,
            OverlayRef::Located { path, .. } => path.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Swarm,
    Kube,
    Rancher,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Swarm => "swarm",
            BackendKind::Kube => "kube",
            BackendKind::Rancher => "rancher",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub backend: Option<BackendKind>,
    /// Forwarded to subprocesses as `DOCKER_HOST`.
    #[serde(default)]
    pub docker_host: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnvironmentOptions {
    #[serde(default)]
    pub dirty_working_copy_okay: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    pub command: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub image_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ManifestEntry {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        namespace: Option<String>,
    },
}

/// A Kubernetes manifest file or directory to render and apply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "ManifestEntry")]
pub struct ManifestSpec {
    pub path: String,
    pub label: Option<String>,
    pub namespace: Option<String>,
}

impl From<ManifestEntry> for ManifestSpec {
    fn from(entry: ManifestEntry) -> Self {
        match entry {
            ManifestEntry::Path(path) => Self {
                path,
                label: None,
                namespace: None,
            },
            ManifestEntry::Detailed {
                path,
                label,
                namespace,
            } => Self {
                path,
                label,
                namespace,
            },
        }
    }
}

/// A Helm chart (or Rancher catalog app) with its answers file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppSpec {
    pub name: String,
    pub chart: String,
    pub version: String,
    pub namespace: String,
    pub answers: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KubectlConfig {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub manifests: Vec<ManifestSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RancherExtras {
    #[serde(default)]
    pub apps: Vec<AppSpec>,
    #[serde(default)]
    pub manifests: Vec<ManifestSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RancherConfig {
    #[serde(default)]
    pub project: Option<String>,
    /// Profile name to cluster name.
    #[serde(default)]
    pub clusters: BTreeMap<String, String>,
    #[serde(default)]
    pub apps: Vec<AppSpec>,
    #[serde(default)]
    pub manifests: Vec<ManifestSpec>,
    /// Per-profile additions.
    #[serde(default)]
    pub extras: BTreeMap<String, RancherExtras>,
}

impl RancherConfig {
    pub fn apps_for(&self, profile: Option<&str>) -> Vec<AppSpec> {
        let mut apps = self.apps.clone();
        if let Some(extra) = profile.and_then(|p| self.extras.get(p)) {
            apps.extend(extra.apps.iter().cloned());
        }
        apps
    }

    pub fn manifests_for(&self, profile: Option<&str>) -> Vec<ManifestSpec> {
        let mut manifests = self.manifests.clone();
        if let Some(extra) = profile.and_then(|p| self.extras.get(p)) {
            manifests.extend(extra.manifests.iter().cloned());
        }
        manifests
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChecksConfig {
    #[serde(default)]
    pub ingress: IngressVocabulary,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, Vec<OverlayRef>>,
    #[serde(default)]
    pub options: BTreeMap<String, EnvironmentOptions>,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub kubectl: KubectlConfig,
    #[serde(default)]
    pub helm: Vec<AppSpec>,
    #[serde(default)]
    pub rancher: Option<RancherConfig>,
    #[serde(default)]
    pub checks: ChecksConfig,
}

impl ProjectConfig {
    pub fn profile(&self, name: &str) -> Result<&[OverlayRef]> {
        self.profiles
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::profile_not_found(name))
    }

    pub fn task(&self, name: &str) -> Result<&TaskConfig> {
        self.tasks
            .get(name)
            .ok_or_else(|| Error::task_not_found(name))
    }

    pub fn dirty_working_copy_okay(&self, environment: Option<&str>) -> bool {
        environment
            .and_then(|env| self.options.get(env))
            .is_some_and(|options| options.dirty_working_copy_okay)
    }

    pub fn rancher(&self) -> Result<&RancherConfig> {
        self.rancher
            .as_ref()
            .ok_or_else(|| Error::config_missing_key("rancher", None))
    }
}

/// Project configuration plus where it was found.
#[derive(Debug, Clone, Default)]
pub struct LoadedProject {
    pub config: ProjectConfig,
    /// Directory overlays and artifacts are resolved against.
    pub root: PathBuf,
    pub path: Option<PathBuf>,
}

/// Loads the first existing project config; none found yields defaults rooted at `cwd`.
pub fn load_project(cwd: &Path, process_env: &Env, fs: &dyn FileSystem) -> Result<LoadedProject> {
    let Some(path) = paths::project_config_candidates(cwd, process_env)
        .into_iter()
        .find(|candidate| fs.is_file(candidate))
    else {
        return Ok(LoadedProject {
            config: ProjectConfig::default(),
            root: cwd.to_path_buf(),
            path: None,
        });
    };

    let content = fs.read(&path)?;
    let config = from_yaml(&content, &path.display().to_string())?;
    let root = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf());

    Ok(LoadedProject {
        config,
        root,
        path: Some(path),
    })
}

// ============================================================================
// Application configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub environments_root: Option<String>,
}

pub fn load_app(process_env: &Env, fs: &dyn FileSystem) -> Result<AppConfig> {
    let path = paths::app_config(process_env)?;
    if !fs.is_file(&path) {
        return Ok(AppConfig::default());
    }
    let content = fs.read(&path)?;
    from_yaml(&content, &path.display().to_string())
}

// ============================================================================
// Lookups across both configs
// ============================================================================

/// Backend for a remote: project config, then app config, then local.
pub fn select_backend(remote: Option<&str>, project: &ProjectConfig, app: &AppConfig) -> BackendKind {
    let Some(remote) = remote else {
        return BackendKind::Local;
    };

    project
        .remotes
        .get(remote)
        .and_then(|r| r.backend)
        .or_else(|| app.remotes.get(remote).and_then(|r| r.backend))
        .unwrap_or(BackendKind::Local)
}

/// `DOCKER_HOST` configured for a remote, project config first.
pub fn docker_host<'a>(
    remote: Option<&str>,
    project: &'a ProjectConfig,
    app: &'a AppConfig,
) -> Option<&'a str> {
    let remote = remote?;
    project
        .remotes
        .get(remote)
        .and_then(|r| r.docker_host.as_deref())
        .or_else(|| app.remotes.get(remote).and_then(|r| r.docker_host.as_deref()))
}

/// Registry prefix for derived image names, project config first.
pub fn image_prefix<'a>(project: &'a ProjectConfig, app: &'a AppConfig) -> Option<&'a str> {
    project
        .build
        .image_prefix
        .as_deref()
        .or(app.build.image_prefix.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_files;
    use tempfile::tempdir;

    const PROJECT: &str = r#"
profiles:
  dev:
    - docker-compose.yml
    - dev
    - name: extra
      path: overlays
options:
  dev:
    dirty_working_copy_okay: true
remotes:
  prod:
    backend: kube
tasks:
  migrate:
    command: compose-flow compose run --rm app migrate
kubectl:
  manifests:
    - k8s/app.yml
    - path: k8s/jobs
      label: jobs
rancher:
  project: web
  manifests:
    - k8s/base.yml
  extras:
    prod:
      manifests:
        - k8s/prod.yml
"#;

    fn project() -> ProjectConfig {
        from_yaml(PROJECT, "compose-flow.yml").unwrap()
    }

    #[test]
    fn parses_profiles_with_both_ref_shapes() {
        let config = project();
        let refs = config.profile("dev").unwrap();
        assert_eq!(refs[0], OverlayRef::Name("docker-compose.yml".to_string()));
        assert_eq!(refs[2].name(), "extra");
        assert_eq!(refs[2].path(), Some("overlays"));
    }

    #[test]
    fn unknown_profile_and_task_are_not_found() {
        let config = project();
        assert_eq!(
            config.profile("qa").unwrap_err().code,
            crate::error::ErrorCode::ProfileNotFound
        );
        assert_eq!(
            config.task("nope").unwrap_err().code,
            crate::error::ErrorCode::TaskNotFound
        );
    }

    #[test]
    fn manifests_accept_strings_and_mappings() {
        let config = project();
        assert_eq!(config.kubectl.manifests[0].path, "k8s/app.yml");
        assert_eq!(config.kubectl.manifests[1].label.as_deref(), Some("jobs"));
    }

    #[test]
    fn rancher_extras_are_appended_for_profile() {
        let config = project();
        let rancher = config.rancher().unwrap();
        let paths: Vec<_> = rancher
            .manifests_for(Some("prod"))
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(paths, vec!["k8s/base.yml", "k8s/prod.yml"]);
        assert_eq!(rancher.manifests_for(Some("dev")).len(), 1);
    }

    #[test]
    fn dirty_option_is_per_environment() {
        let config = project();
        assert!(config.dirty_working_copy_okay(Some("dev")));
        assert!(!config.dirty_working_copy_okay(Some("prod")));
        assert!(!config.dirty_working_copy_okay(None));
    }

    #[test]
    fn backend_selection_precedence() {
        let config = project();
        let mut app = AppConfig::default();
        app.remotes.insert(
            "prod".to_string(),
            RemoteConfig {
                backend: Some(BackendKind::Swarm),
                docker_host: None,
            },
        );
        app.remotes.insert(
            "stage".to_string(),
            RemoteConfig {
                backend: Some(BackendKind::Swarm),
                docker_host: Some("tcp://stage:2375".to_string()),
            },
        );

        assert_eq!(select_backend(Some("prod"), &config, &app), BackendKind::Kube);
        assert_eq!(select_backend(Some("stage"), &config, &app), BackendKind::Swarm);
        assert_eq!(select_backend(Some("dev"), &config, &app), BackendKind::Local);
        assert_eq!(select_backend(None, &config, &app), BackendKind::Local);
        assert_eq!(
            docker_host(Some("stage"), &config, &app),
            Some("tcp://stage:2375")
        );
    }

    #[test]
    fn multi_document_streams_are_split() {
        let documents =
            parse_documents("kind: Service\n---\nkind: Deployment\n---\n", "k8s.yml").unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1]["kind"], serde_yml::Value::from("Deployment"));
    }

    #[test]
    fn blank_config_is_default() {
        let config: ProjectConfig = from_yaml("\n", "compose-flow.yml").unwrap();
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = from_yaml::<ProjectConfig>("profiles: [", "compose-flow.yml").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalidYaml);
    }

    #[test]
    fn load_project_roots_at_config_dir() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join("compose");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("compose-flow.yml"), PROJECT).unwrap();

        let loaded = load_project(dir.path(), &Env::new(), &local_files::local()).unwrap();
        assert_eq!(loaded.root, config_dir);
        assert!(loaded.config.profiles.contains_key("dev"));
    }

    #[test]
    fn load_project_without_file_uses_cwd() {
        let dir = tempdir().unwrap();
        let loaded = load_project(dir.path(), &Env::new(), &local_files::local()).unwrap();
        assert_eq!(loaded.root, dir.path());
        assert!(loaded.path.is_none());
    }
}
