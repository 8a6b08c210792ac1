//! Release versions from `tag-version` and the image references built on them.

use std::path::Path;

use semver::Version;

use crate::defaults;
use crate::error::{Error, Result};
use crate::utils::command::{Invocation, Runner};
use crate::variables::Env;

/// Version used when `tag-version` fails: the environment name, marked
/// `-dirty` when the failure was an unclean working copy.
pub fn fallback_version(environment: Option<&str>, stderr: &str) -> String {
    let base = environment.unwrap_or("unknown");
    if stderr.contains("not clean") {
        format!("{}-dirty", base)
    } else {
        base.to_string()
    }
}

/// Runs `tag-version` in `root`. Failures carry the fallback version.
pub fn detect(
    runner: &dyn Runner,
    env: &Env,
    root: &Path,
    environment: Option<&str>,
) -> Result<String> {
    let invocation = Invocation::new(defaults::TAG_VERSION_COMMAND)
        .envs(env)
        .current_dir(root);

    let output = match runner.capture(&invocation) {
        Ok(output) => output,
        Err(err) => {
            return Err(Error::version_tag_failed(
                err.message,
                fallback_version(environment, ""),
            ))
        }
    };

    let version = output.stdout.trim();
    if output.success && !version.is_empty() {
        return Ok(version.to_string());
    }

    let cause = if output.success {
        "no version printed".to_string()
    } else {
        output.error_text().to_string()
    };
    Err(Error::version_tag_failed(
        cause,
        fallback_version(environment, &output.stderr),
    ))
}

/// Replaces or appends the tag of `image`. Only a `:` after the last `/`
/// is a tag, so registry ports survive.
pub fn replace_tag(image: &str, tag: &str) -> String {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    let repository = match image[name_start..].find(':') {
        Some(colon) => &image[..name_start + colon],
        None => image,
    };
    format!("{}:{}", repository, tag)
}

/// `<prefix>/<project>:<version>`, or `<project>:<version>` without a prefix.
pub fn default_image(prefix: Option<&str>, project: &str, version: &str) -> String {
    match prefix.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}:{}", prefix, project, version),
        None => format!("{}:{}", project, version),
    }
}

/// A tagged image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerImage {
    pub repository: String,
    pub tag: Option<String>,
}

impl DockerImage {
    pub fn parse(reference: &str) -> Self {
        let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[name_start..].find(':') {
            Some(colon) => Self {
                repository: reference[..name_start + colon].to_string(),
                tag: Some(reference[name_start + colon + 1..].to_string()),
            },
            None => Self {
                repository: reference.to_string(),
                tag: None,
            },
        }
    }

    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }

    /// Strict `MAJOR.MINOR.PATCH`, no pre-release or build metadata.
    pub fn release_version(&self) -> Option<Version> {
        let tag = self.tag.as_deref()?;
        let version = Version::parse(tag).ok()?;
        (version.pre.is_empty() && version.build.is_empty()).then_some(version)
    }

    /// `MAJOR` and `MAJOR.MINOR` references for an official release.
    pub fn auto_tags(&self) -> Result<Vec<String>> {
        let version = self.release_version().ok_or_else(|| {
            Error::validation_invalid_argument(
                "auto_tag",
                format!(
                    "Publishing with auto tags is only allowed for official release MAJOR.MINOR.PATCH tags. Current tag: {}",
                    self.tag.as_deref().unwrap_or("<none>")
                ),
                self.tag.clone(),
                None,
            )
        })?;
        Ok(vec![
            self.with_tag(&version.major.to_string()),
            self.with_tag(&format!("{}.{}", version.major, version.minor)),
        ])
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => write!(f, "{}", self.repository),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::utils::command::{CommandOutput, ScriptedRunner};

    #[test]
    fn replace_tag_keeps_repository() {
        assert_eq!(replace_tag("foo:dev", "2.0"), "foo:2.0");
        assert_eq!(replace_tag("foo", "2.0"), "foo:2.0");
        assert_eq!(
            replace_tag("registry:5000/team/foo:dev", "2.0"),
            "registry:5000/team/foo:2.0"
        );
        assert_eq!(replace_tag("registry:5000/foo", "2.0"), "registry:5000/foo:2.0");
    }

    #[test]
    fn default_image_uses_prefix() {
        assert_eq!(default_image(Some("reg.io/team/"), "app", "1.2.3"), "reg.io/team/app:1.2.3");
        assert_eq!(default_image(None, "app", "1.2.3"), "app:1.2.3");
    }

    #[test]
    fn detect_returns_trimmed_stdout() {
        let runner = ScriptedRunner::new();
        runner.on("tag-version", CommandOutput::ok("2.0\n"));
        let version = detect(&runner, &Env::new(), Path::new("/repo"), Some("dev")).unwrap();
        assert_eq!(version, "2.0");
        assert_eq!(runner.calls()[0].current_dir.as_deref(), Some(Path::new("/repo")));
    }

    #[test]
    fn dirty_working_copy_carries_fallback() {
        let runner = ScriptedRunner::new();
        runner.on(
            "tag-version",
            CommandOutput::failed(1, "working copy is not clean"),
        );
        let err = detect(&runner, &Env::new(), Path::new("/repo"), Some("dev")).unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionTagFailed);
        assert_eq!(err.fallback_version(), Some("dev-dirty"));
    }

    #[test]
    fn fallback_without_environment_is_unknown() {
        assert_eq!(fallback_version(None, "boom"), "unknown");
    }

    #[test]
    fn auto_tags_for_official_release() {
        let image = DockerImage::parse("registry:5000/app:1.4.2");
        assert_eq!(image.repository, "registry:5000/app");
        assert_eq!(
            image.auto_tags().unwrap(),
            vec!["registry:5000/app:1", "registry:5000/app:1.4"]
        );
    }

    #[test]
    fn auto_tags_reject_prereleases() {
        assert!(DockerImage::parse("app:1.4.2-rc1").auto_tags().is_err());
        assert!(DockerImage::parse("app:dev").auto_tags().is_err());
        assert!(DockerImage::parse("app").auto_tags().is_err());
    }
}
