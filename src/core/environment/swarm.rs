use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;

use crate::config::BackendKind;
use crate::error::{Error, Result};
use crate::utils::command::{CommandOutput, Invocation, Runner};
use crate::variables::Env;

use super::backend::Backend;

const NOT_FOUND: &str = "No such config";
const NOT_CONNECTED: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "is not a swarm manager",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    spec: InspectedSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedSpec {
    #[serde(default)]
    data: String,
}

/// `docker config` objects on a swarm manager.
pub struct SwarmBackend<'a> {
    runner: &'a dyn Runner,
    env: &'a Env,
}

impl<'a> SwarmBackend<'a> {
    pub fn new(runner: &'a dyn Runner, env: &'a Env) -> Self {
        Self { runner, env }
    }

    fn docker_config(&self) -> Invocation {
        Invocation::new("docker").arg("config").envs(self.env)
    }

    fn classify(&self, name: &str, output: CommandOutput, invocation: &Invocation) -> Error {
        let text = output.error_text().to_string();
        if text.contains(NOT_FOUND) {
            Error::backend_config_not_found(name)
        } else if NOT_CONNECTED.iter().any(|signal| text.contains(signal)) {
            Error::backend_not_connected(BackendKind::Swarm.as_str(), text)
        } else {
            output.into_error(invocation)
        }
    }

    fn run(&self, name: &str, invocation: Invocation) -> Result<String> {
        let output = self.runner.capture(&invocation)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(self.classify(name, output, &invocation))
        }
    }
}

impl Backend for SwarmBackend<'_> {
    fn kind(&self) -> BackendKind {
        BackendKind::Swarm
    }

    fn list(&self) -> Result<Vec<String>> {
        let stdout = self.run(
            "",
            self.docker_config().args(["ls", "--format", "{{.Name}}"]),
        )?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn read(&self, name: &str) -> Result<String> {
        let stdout = self.run(name, self.docker_config().args(["inspect", name]))?;

        let configs: Vec<InspectedConfig> = serde_json::from_str(&stdout).map_err(|e| {
            Error::internal_json(e.to_string(), Some(format!("docker config inspect {}", name)))
        })?;
        let data = configs
            .into_iter()
            .next()
            .map(|config| config.spec.data)
            .ok_or_else(|| Error::backend_config_not_found(name))?;

        let bytes = STANDARD.decode(data.trim()).map_err(|e| {
            Error::internal_unexpected(format!("config {} is not valid base64: {}", name, e))
        })?;
        String::from_utf8(bytes).map_err(|e| {
            Error::internal_unexpected(format!("config {} is not valid UTF-8: {}", name, e))
        })
    }

    fn write(&self, name: &str, path: &Path) -> Result<()> {
        if self.list()?.iter().any(|existing| existing == name) {
            self.remove(name)?;
        }
        self.run(
            name,
            self.docker_config()
                .args(["create", name])
                .arg(path.display().to_string()),
        )?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        match self.run(name, self.docker_config().args(["rm", name])) {
            Err(err) if err.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::utils::command::ScriptedRunner;

    fn inspect_output(content: &str) -> String {
        format!(
            r#"[{{"ID": "abc", "Spec": {{"Name": "dev-app", "Data": "{}"}}}}]"#,
            STANDARD.encode(content)
        )
    }

    #[test]
    fn read_decodes_config_data() {
        let runner = ScriptedRunner::new();
        runner.on(
            "docker config inspect dev-app",
            CommandOutput::ok(inspect_output("A=1\nB=2\n")),
        );
        let env = Env::new();
        let backend = SwarmBackend::new(&runner, &env);

        assert_eq!(backend.read("dev-app").unwrap(), "A=1\nB=2\n");
    }

    #[test]
    fn stderr_signals_map_to_error_kinds() {
        let runner = ScriptedRunner::new();
        runner
            .on(
                "docker config inspect missing",
                CommandOutput::failed(1, "Error: No such config: missing"),
            )
            .on(
                "docker config inspect offline",
                CommandOutput::failed(
                    1,
                    "Cannot connect to the Docker daemon at unix:///var/run/docker.sock.",
                ),
            );
        let env = Env::new();
        let backend = SwarmBackend::new(&runner, &env);

        assert!(backend.read("missing").unwrap_err().is_not_found());
        assert_eq!(
            backend.read("offline").unwrap_err().code,
            ErrorCode::BackendNotConnected
        );
    }

    #[test]
    fn write_replaces_existing_config() {
        let runner = ScriptedRunner::new();
        runner.on("docker config ls", CommandOutput::ok("other\ndev-app\n"));
        let env = Env::new();
        let backend = SwarmBackend::new(&runner, &env);

        backend.write("dev-app", Path::new("/tmp/env")).unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "docker config ls --format '{{.Name}}'",
                "docker config rm dev-app",
                "docker config create dev-app /tmp/env",
            ]
        );
    }

    #[test]
    fn write_skips_remove_for_new_config() {
        let runner = ScriptedRunner::new();
        let env = Env::new();
        let backend = SwarmBackend::new(&runner, &env);

        backend.write("dev-app", Path::new("/tmp/env")).unwrap();
        assert_eq!(runner.command_lines().len(), 2);
    }
}
