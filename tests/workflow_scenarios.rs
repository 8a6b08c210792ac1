use std::path::Path;
use std::process::Command;

use compose_flow::environment::Backend;
use compose_flow::local_files;
use compose_flow::utils::command::{CommandOutput, ScriptedRunner};
use compose_flow::variables::Env;
use compose_flow::{CommandPolicy, ErrorCode, Overrides, ProfileChecks, Settings, Workflow};
use tempfile::{tempdir, TempDir};

struct Project {
    home: TempDir,
    root: TempDir,
}

impl Project {
    fn new(compose: &str, stored: &str) -> Self {
        let home = tempdir().unwrap();
        let root = tempdir().unwrap();
        std::fs::write(
            root.path().join("compose-flow.yml"),
            "profiles:\n  dev:\n    - docker-compose.yml\n",
        )
        .unwrap();
        std::fs::write(root.path().join("docker-compose.yml"), compose).unwrap();

        let environments = home.path().join(".compose-flow").join("environments");
        std::fs::create_dir_all(&environments).unwrap();
        std::fs::write(environments.join("dev-app"), stored).unwrap();

        Self { home, root }
    }

    fn process_env(&self) -> Env {
        let mut env = Env::new();
        env.insert("HOME".to_string(), self.home.path().display().to_string());
        env
    }

    fn settings(&self) -> Settings {
        Settings::resolve(
            Overrides {
                environment: Some("dev".to_string()),
                project_name: Some("app".to_string()),
                ..Overrides::default()
            },
            self.root.path(),
        )
        .unwrap()
    }

    fn stored(&self) -> String {
        std::fs::read_to_string(
            self.home
                .path()
                .join(".compose-flow")
                .join("environments")
                .join("dev-app"),
        )
        .unwrap()
    }
}

const UNSET_REFERENCE: &str = "services:\n  app:\n    image: foo\n    environment:\n      - FOO\n";

#[test]
fn check_reports_unset_reference_once() {
    let project = Project::new(UNSET_REFERENCE, "BAR=1\n");
    let runner = ScriptedRunner::new();
    let fs = local_files::local();
    let mut workflow = Workflow::load(
        project.settings(),
        project.root.path(),
        project.process_env(),
        &runner,
        &fs,
    )
    .unwrap();

    let err = workflow.check_profile(ProfileChecks::Env).unwrap_err();
    assert_eq!(err.code, ErrorCode::PolicyCheckFailed);
    let errors = err.details["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    let message = errors[0].as_str().unwrap();
    assert!(message.contains("FOO"));
    assert!(message.contains("app"));
}

#[test]
fn check_command_exits_non_zero() {
    let project = Project::new(UNSET_REFERENCE, "BAR=1\n");
    let output = Command::new(env!("CARGO_BIN_EXE_compose-flow"))
        .args(["-e", "dev", "-n", "app", "profile", "check"])
        .current_dir(project.root.path())
        .env_clear()
        .env("HOME", project.home.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(5));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("policy.check_failed"));
    assert!(stdout.contains("FOO not found in environment for service=app"));
}

#[test]
fn publish_replaces_image_tag_with_detected_version() {
    let project = Project::new(
        "services:\n  app:\n    build: .\n    image: ${DOCKER_IMAGE}\n",
        "VERSION=1.0\nDOCKER_IMAGE=foo:dev\n",
    );
    let runner = ScriptedRunner::new();
    runner.on("tag-version", CommandOutput::ok("2.0\n"));
    let fs = local_files::local();
    let mut workflow = Workflow::load(
        project.settings(),
        project.root.path(),
        project.process_env(),
        &runner,
        &fs,
    )
    .unwrap();
    workflow.set_policy(CommandPolicy {
        updates_version_vars: true,
        persist_environment: true,
        setup_profile: true,
        ..CommandPolicy::default()
    });

    workflow.prepare().unwrap();
    let environment = workflow.environment().unwrap();
    assert_eq!(environment.get("DOCKER_IMAGE"), Some("foo:2.0"));
    assert_eq!(environment.get("VERSION"), Some("2.0"));

    let artifact = std::fs::read_to_string(project.root.path().join("compose-flow-dev.yml")).unwrap();
    assert!(artifact.contains("image: foo:2.0"));
    assert!(!artifact.contains("compose_flow"));

    workflow.finish().unwrap();
    assert_eq!(project.stored(), "DOCKER_IMAGE=foo:2.0\nVERSION=2.0\n");
}

#[test]
fn local_backend_round_trips_blob() {
    let project = Project::new(UNSET_REFERENCE, "");
    let runner = ScriptedRunner::new();
    let fs = local_files::local();
    let workflow = Workflow::load(
        project.settings(),
        project.root.path(),
        project.process_env(),
        &runner,
        &fs,
    )
    .unwrap();

    let content = "A=1\nEMPTY=\nURL=http://x?a=b\n";
    let source = project.root.path().join("upload.env");
    std::fs::write(&source, content).unwrap();

    let backend = workflow.backend().unwrap();
    backend.write("dev-app", Path::new(&source)).unwrap();
    assert_eq!(backend.read("dev-app").unwrap(), content);

    backend.remove("dev-app").unwrap();
    assert!(backend.read("dev-app").unwrap_err().is_not_found());
    backend.remove("dev-app").unwrap();
}
