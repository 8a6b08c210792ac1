//! A profile compiled into the compose artifact handed to docker.

use std::path::{Path, PathBuf};

use serde_yml::Value;

use crate::checks::{CheckContext, CheckReport, Checker, IngressVocabulary};
use crate::compiler;
use crate::config::{self, OverlayRef, ProjectConfig};
use crate::defaults;
use crate::error::Result;
use crate::local_files::FileSystem;
use crate::overlay;
use crate::variables::{self, Env, Rendered};

#[derive(Debug, Clone)]
pub struct Profile {
    name: Option<String>,
    refs: Vec<OverlayRef>,
    root: PathBuf,
    stack_name: String,
    compiled: Option<String>,
    written: Option<PathBuf>,
}

impl Profile {
    /// Looks up `name` in the project config. No name means the default
    /// compose file alone.
    pub fn new(
        name: Option<&str>,
        config: &ProjectConfig,
        root: &Path,
        stack_name: impl Into<String>,
    ) -> Result<Self> {
        let refs = match name {
            Some(name) => config.profile(name)?.to_vec(),
            None => vec![OverlayRef::Name(defaults::DEFAULT_COMPOSE_FILE.to_string())],
        };
        Ok(Self::from_refs(name, refs, root, stack_name))
    }

    pub fn from_refs(
        name: Option<&str>,
        refs: Vec<OverlayRef>,
        root: &Path,
        stack_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.map(str::to_string),
            refs,
            root: root.to_path_buf(),
            stack_name: stack_name.into(),
            compiled: None,
            written: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `compose-flow-<profile>.yml`.
    pub fn filename(&self) -> String {
        format!("compose-flow-{}.yml", self.name.as_deref().unwrap_or("default"))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(self.filename())
    }

    pub fn files(&self, fs: &dyn FileSystem) -> Vec<PathBuf> {
        overlay::resolve(&self.refs, &self.root, fs)
    }

    /// Merged and compiled text, computed once until [`Profile::reset`].
    pub fn compiled(&mut self, fs: &dyn FileSystem) -> Result<&str> {
        if self.compiled.is_none() {
            let merged = overlay::merge_files(&self.files(fs), fs)?;
            self.compiled = Some(compiler::compile(&merged, &self.stack_name)?);
        }
        Ok(self.compiled.as_deref().unwrap_or_default())
    }

    /// Renders with every `${NAME}` resolved; any missing name is an error.
    pub fn render(&mut self, env: &Env, fs: &dyn FileSystem) -> Result<String> {
        variables::render(self.compiled(fs)?, env)
    }

    /// Renders for display; missing names become `MISSING`.
    pub fn render_lenient(&mut self, env: &Env, fs: &dyn FileSystem) -> Result<Rendered> {
        Ok(variables::render_lenient(self.compiled(fs)?, env))
    }

    pub fn document(&mut self, env: &Env, fs: &dyn FileSystem) -> Result<Value> {
        let rendered = self.render_lenient(env, fs)?;
        config::parse_document(&rendered.text, &self.filename())
    }

    pub fn check(
        &mut self,
        checker: &Checker,
        env: &Env,
        ingress: &IngressVocabulary,
        fs: &dyn FileSystem,
    ) -> Result<CheckReport> {
        let documents = [self.document(env, fs)?];
        Ok(checker.check(&CheckContext {
            documents: &documents,
            env,
            ingress,
        }))
    }

    /// Writes the rendered artifact; later calls return the same path
    /// without touching the file again.
    pub fn write(&mut self, env: &Env, fs: &dyn FileSystem) -> Result<PathBuf> {
        if let Some(path) = &self.written {
            return Ok(path.clone());
        }

        let rendered = self.render(env, fs)?;
        let path = self.artifact_path();
        fs.write(&path, &rendered)?;
        log_status!("profile", "Wrote {}", path.display());

        self.written = Some(path.clone());
        Ok(path)
    }

    /// Drops the compiled text so the next access recompiles.
    pub fn reset(&mut self) {
        self.compiled = None;
        self.written = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks;
    use crate::local_files;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> ProjectConfig {
        std::fs::write(
            dir.join("docker-compose.yml"),
            "services:\n  app:\n    image: ${DOCKER_IMAGE}\n    environment:\n      - FOO\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("docker-compose.dev.yml"),
            "services:\n  app:\n    environment:\n      - DEBUG=1\n",
        )
        .unwrap();
        config::from_yaml(
            "profiles:\n  dev:\n    - docker-compose.yml\n    - dev\n",
            "compose-flow.yml",
        )
        .unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn artifact_is_named_after_profile() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let profile = Profile::new(Some("dev"), &config, dir.path(), "dev-app").unwrap();
        assert_eq!(profile.artifact_path(), dir.path().join("compose-flow-dev.yml"));

        let default = Profile::new(None, &config, dir.path(), "app").unwrap();
        assert_eq!(default.filename(), "compose-flow-default.yml");
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let err = Profile::new(Some("qa"), &config, dir.path(), "qa-app").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ProfileNotFound);
    }

    #[test]
    fn compiles_merged_overlays() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let mut profile = Profile::new(Some("dev"), &config, dir.path(), "dev-app").unwrap();

        let doc = profile
            .document(&env(&[("DOCKER_IMAGE", "app:1.0")]), &local_files::local())
            .unwrap();
        assert_eq!(doc["services"]["app"]["image"], Value::from("app:1.0"));
        assert_eq!(
            doc["services"]["app"]["environment"],
            serde_yml::from_str::<Value>(
                "[FOO, DEBUG=1, DOCKER_SERVICE=app, DOCKER_STACK=dev-app]"
            )
            .unwrap()
        );
    }

    #[test]
    fn strict_render_reports_missing_names() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let mut profile = Profile::new(Some("dev"), &config, dir.path(), "dev-app").unwrap();
        let fs = local_files::local();

        let err = profile.render(&Env::new(), &fs).unwrap_err();
        assert!(err.message.contains("DOCKER_IMAGE"));

        let lenient = profile.render_lenient(&Env::new(), &fs).unwrap();
        assert!(lenient.text.contains("image: MISSING"));
        assert_eq!(lenient.missing, vec!["DOCKER_IMAGE".to_string()]);
    }

    #[test]
    fn env_check_sees_compiled_references() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let mut profile = Profile::new(Some("dev"), &config, dir.path(), "dev-app").unwrap();
        let checker = checks::compose().unwrap().select(&["check_env"]).unwrap();

        let report = profile
            .check(
                &checker,
                &env(&[("DOCKER_IMAGE", "app")]),
                &IngressVocabulary::default(),
                &local_files::local(),
            )
            .unwrap();
        assert_eq!(
            report.errors,
            vec!["FOO not found in environment for service=app".to_string()]
        );
    }

    #[test]
    fn artifact_is_written_once() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let mut profile = Profile::new(Some("dev"), &config, dir.path(), "dev-app").unwrap();
        let fs = local_files::local();
        let vars = env(&[("DOCKER_IMAGE", "app:1.0")]);

        let path = profile.write(&vars, &fs).unwrap();
        std::fs::write(&path, "sentinel").unwrap();

        assert_eq!(profile.write(&vars, &fs).unwrap(), path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "sentinel");

        profile.reset();
        profile.write(&vars, &fs).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("app:1.0"));
    }

    #[test]
    fn compiled_text_is_memoized() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let mut profile = Profile::new(Some("dev"), &config, dir.path(), "dev-app").unwrap();
        let fs = local_files::local();

        let first = profile.compiled(&fs).unwrap().to_string();
        std::fs::write(dir.path().join("docker-compose.dev.yml"), "services: {}\n").unwrap();
        assert_eq!(profile.compiled(&fs).unwrap(), first);
    }
}
