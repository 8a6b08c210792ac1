//! Environment blobs kept in a Kubernetes secret, reached through `kubectl`
//! directly or through `rancher kubectl`.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::config::{self, BackendKind};
use crate::error::{Error, Result};
use crate::local_files::FileSystem;
use crate::utils::command::{CommandOutput, Invocation, Runner};
use crate::variables::Env;

use super::backend::Backend;

/// Key inside the secret's `data` holding the encoded blob.
pub const ENV_KEY: &str = "_env";

const NOT_CONNECTED: &[&str] = &[
    "Unable to connect to the server",
    "The connection to the server",
];

pub struct SecretBackend<'a> {
    kind: BackendKind,
    runner: &'a dyn Runner,
    fs: &'a dyn FileSystem,
    env: &'a Env,
    kubectl: &'static [&'static str],
    namespace: String,
}

impl<'a> SecretBackend<'a> {
    /// Secrets in `<profile>-compose-flow` through the current kube context.
    pub fn kube(runner: &'a dyn Runner, fs: &'a dyn FileSystem, env: &'a Env, profile: &str) -> Self {
        Self {
            kind: BackendKind::Kube,
            runner,
            fs,
            env,
            kubectl: &["kubectl"],
            namespace: format!("{}-compose-flow", profile),
        }
    }

    /// Secrets in `compose-flow-<project>` through the Rancher CLI.
    pub fn rancher(
        runner: &'a dyn Runner,
        fs: &'a dyn FileSystem,
        env: &'a Env,
        project_name: &str,
    ) -> Self {
        Self {
            kind: BackendKind::Rancher,
            runner,
            fs,
            env,
            kubectl: &["rancher", "kubectl"],
            namespace: format!("compose-flow-{}", project_name.to_lowercase()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn kubectl<I, S>(&self, args: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Invocation::from_parts(self.kubectl)?
            .args(args)
            .envs(self.env))
    }

    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.runner.capture(invocation)
    }

    fn failure(&self, output: CommandOutput, invocation: &Invocation) -> Error {
        let text = output.error_text().to_string();
        if NOT_CONNECTED.iter().any(|signal| text.contains(signal)) {
            Error::backend_not_connected(self.kind.as_str(), text)
        } else {
            output.into_error(invocation)
        }
    }

    fn run(&self, invocation: &Invocation) -> Result<String> {
        let output = self.capture(invocation)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(self.failure(output, invocation))
        }
    }

    /// Fails with `kube.context_missing` when kubectl has no current context.
    pub fn check_context(&self) -> Result<()> {
        let invocation = self.kubectl(["config", "current-context"])?;
        let output = self.capture(&invocation)?;
        if output.success {
            return Ok(());
        }
        if output
            .error_text()
            .to_lowercase()
            .contains("current-context is not set")
        {
            return Err(Error::kube_context_missing());
        }
        Err(self.failure(output, &invocation))
    }

    /// Creates the namespace when `kubectl get namespace` reports it missing.
    pub fn ensure_namespace(&self) -> Result<()> {
        let invocation = self.kubectl(["get", "namespace", self.namespace.as_str()])?;
        let output = self.capture(&invocation)?;
        if output.success {
            return Ok(());
        }
        if !output.error_text().to_lowercase().contains("not found") {
            return Err(self.failure(output, &invocation));
        }

        log_status!(
            "env",
            "Namespace '{}' not found, creating it",
            self.namespace
        );
        self.run(&self.kubectl(["create", "namespace", self.namespace.as_str()])?)?;
        Ok(())
    }

    fn secret_missing(&self, name: &str, output: &CommandOutput) -> bool {
        output
            .error_text()
            .to_lowercase()
            .contains(&format!("secrets \"{}\" not found", name.to_lowercase()))
    }

    fn decode(&self, name: &str, raw: &str) -> Result<String> {
        let secret = config::parse_document(raw, &format!("secret {}", name))?;
        let encoded = secret
            .get("data")
            .and_then(|data| data.get(ENV_KEY))
            .and_then(|value| value.as_str())
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                Error::backend_config_not_found(name).with_hint(format!(
                    "Secret {} exists but has no {} data",
                    name, ENV_KEY
                ))
            })?;

        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            Error::internal_unexpected(format!("secret {} is not valid base64: {}", name, e))
        })?;
        String::from_utf8(bytes).map_err(|e| {
            Error::internal_unexpected(format!("secret {} is not valid UTF-8: {}", name, e))
        })
    }
}

impl Backend for SecretBackend<'_> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn list(&self) -> Result<Vec<String>> {
        let stdout = self.run(&self.kubectl([
            "get",
            "secrets",
            "--namespace",
            self.namespace.as_str(),
            "-o",
            "name",
        ])?)?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.trim_start_matches("secret/").to_string())
            .collect())
    }

    fn read(&self, name: &str) -> Result<String> {
        let invocation = self.kubectl([
            "get",
            "secrets",
            "--namespace",
            self.namespace.as_str(),
            "-o",
            "yaml",
            name,
        ])?;
        let output = self.capture(&invocation)?;
        if !output.success {
            if self.secret_missing(name, &output) {
                return Err(Error::backend_config_not_found(name));
            }
            return Err(self.failure(output, &invocation));
        }
        self.decode(name, &output.stdout)
    }

    fn write(&self, name: &str, path: &Path) -> Result<()> {
        let encoded = STANDARD.encode(self.fs.read(path)?.as_bytes());

        self.ensure_namespace()?;

        let create = self.kubectl([
            "create",
            "secret",
            "generic",
            "--namespace",
            self.namespace.as_str(),
            name,
        ])?;
        let output = self.capture(&create)?;
        if !output.success
            && !output
                .error_text()
                .to_lowercase()
                .contains(&format!("secrets \"{}\" already exists", name.to_lowercase()))
        {
            return Err(self.failure(output, &create));
        }

        let patch = serde_json::json!({ "data": { ENV_KEY: encoded } }).to_string();
        self.run(&self.kubectl([
            "patch",
            "secrets",
            "--namespace",
            self.namespace.as_str(),
            name,
            "--patch",
            patch.as_str(),
        ])?)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let invocation = self.kubectl([
            "delete",
            "secrets",
            "--namespace",
            self.namespace.as_str(),
            name,
        ])?;
        let output = self.capture(&invocation)?;
        if output.success || self.secret_missing(name, &output) {
            Ok(())
        } else {
            Err(self.failure(output, &invocation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::local_files;
    use crate::utils::command::ScriptedRunner;
    use tempfile::tempdir;

    fn secret_yaml(content: &str) -> String {
        format!(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: dev-app\ndata:\n  _env: {}\n",
            STANDARD.encode(content)
        )
    }

    #[test]
    fn written_blob_reads_back_identically() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("env");
        let content = "A=1\nPASSWORD=s3cr=t\n";
        std::fs::write(&source, content).unwrap();

        let runner = ScriptedRunner::new();
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");
        backend.write("dev-app", &source).unwrap();

        let patch = runner
            .calls()
            .into_iter()
            .find(|call| call.args.first().map(String::as_str) == Some("patch"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(patch.args.last().unwrap()).unwrap();
        let stored = body["data"][ENV_KEY].as_str().unwrap().to_string();

        runner.on(
            "kubectl get secrets --namespace dev-compose-flow -o yaml dev-app",
            CommandOutput::ok(format!(
                "data:\n  _env: {}\n",
                stored
            )),
        );
        assert_eq!(backend.read("dev-app").unwrap(), content);
    }

    #[test]
    fn write_creates_missing_namespace_and_tolerates_existing_secret() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("env");
        std::fs::write(&source, "A=1\n").unwrap();

        let runner = ScriptedRunner::new();
        runner
            .on(
                "kubectl get namespace",
                CommandOutput::failed(1, "Error from server (NotFound): namespaces \"dev-compose-flow\" not found"),
            )
            .on(
                "kubectl create secret",
                CommandOutput::failed(1, "Error from server (AlreadyExists): secrets \"dev-app\" already exists"),
            );
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");
        backend.write("dev-app", &source).unwrap();

        let lines = runner.command_lines();
        assert_eq!(lines[1], "kubectl create namespace dev-compose-flow");
        assert!(lines[3].starts_with("kubectl patch secrets --namespace dev-compose-flow dev-app --patch"));
    }

    #[test]
    fn missing_and_empty_secrets_are_not_found() {
        let runner = ScriptedRunner::new();
        runner
            .on(
                "kubectl get secrets --namespace dev-compose-flow -o yaml gone",
                CommandOutput::failed(1, "Error from server (NotFound): secrets \"gone\" not found"),
            )
            .on(
                "kubectl get secrets --namespace dev-compose-flow -o yaml empty",
                CommandOutput::ok("kind: Secret\nmetadata:\n  name: empty\n"),
            );
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");

        assert!(backend.read("gone").unwrap_err().is_not_found());
        assert!(backend.read("empty").unwrap_err().is_not_found());
    }

    #[test]
    fn unreachable_cluster_is_not_connected() {
        let runner = ScriptedRunner::new();
        runner.on(
            "kubectl get secrets",
            CommandOutput::failed(1, "Unable to connect to the server: dial tcp 10.0.0.1:6443: i/o timeout"),
        );
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");

        assert_eq!(backend.read("dev-app").unwrap_err().code, ErrorCode::BackendNotConnected);
        assert_eq!(backend.list().unwrap_err().code, ErrorCode::BackendNotConnected);
    }

    #[test]
    fn other_failures_propagate() {
        let runner = ScriptedRunner::new();
        runner.on(
            "kubectl get secrets",
            CommandOutput::failed(1, "error: You must be logged in to the server (Unauthorized)"),
        );
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");

        let err = backend.read("dev-app").unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandFailed);
    }

    #[test]
    fn unset_context_is_reported() {
        let runner = ScriptedRunner::new();
        runner.on(
            "kubectl config current-context",
            CommandOutput::failed(1, "error: current-context is not set"),
        );
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");

        assert_eq!(
            backend.check_context().unwrap_err().code,
            ErrorCode::KubeContextMissing
        );
    }

    #[test]
    fn rancher_variant_uses_project_namespace() {
        let runner = ScriptedRunner::new();
        runner.on("rancher kubectl get secrets", CommandOutput::ok("secret/dev-app\n"));
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::rancher(&runner, &fs, &env, "MyApp");

        assert_eq!(backend.namespace(), "compose-flow-myapp");
        assert_eq!(backend.list().unwrap(), vec!["dev-app".to_string()]);
        assert_eq!(backend.kind(), BackendKind::Rancher);
        assert_eq!(
            runner.command_lines()[0],
            "rancher kubectl get secrets --namespace compose-flow-myapp -o name"
        );
    }

    #[test]
    fn secret_yaml_helper_decodes() {
        let runner = ScriptedRunner::new();
        let fs = local_files::local();
        let env = Env::new();
        let backend = SecretBackend::kube(&runner, &fs, &env, "dev");
        assert_eq!(backend.decode("dev-app", &secret_yaml("X=1\n")).unwrap(), "X=1\n");
    }
}
