//! Profile overlay resolution and list-additive deep merge.

use std::path::{Path, PathBuf};

use serde_yml::Value;

use crate::config::{self, OverlayRef};
use crate::defaults;
use crate::error::Result;
use crate::local_files::FileSystem;

/// Resolves profile refs to existing files under `root`.
///
/// Each ref is tried as a plain file name, then as `docker-compose.<name>.yml`,
/// both under its optional path. Unresolvable refs are skipped with a warning
/// and repeated refs count once. An empty result falls back to the default
/// compose file.
pub fn resolve(refs: &[OverlayRef], root: &Path, fs: &dyn FileSystem) -> Vec<PathBuf> {
    let mut seen: Vec<&OverlayRef> = Vec::new();
    let mut files: Vec<PathBuf> = Vec::new();

    for overlay in refs {
        if seen.contains(&overlay) {
            continue;
        }
        seen.push(overlay);

        let base = match overlay.path() {
            Some(path) => root.join(path),
            None => root.to_path_buf(),
        };

        let plain = base.join(overlay.name());
        let dotted = base.join(format!("docker-compose.{}.yml", overlay.name()));

        let found = if fs.is_file(&plain) {
            plain
        } else if fs.is_file(&dotted) {
            dotted
        } else {
            log_status!(
                "profile",
                "Warning: overlay {} not found under {}, skipping",
                overlay.name(),
                base.display()
            );
            continue;
        };

        if !files.contains(&found) {
            files.push(found);
        }
    }

    if files.is_empty() {
        files.push(root.join(defaults::DEFAULT_COMPOSE_FILE));
    }

    files
}

/// Merges `incoming` into `base`: mappings recurse, sequences append,
/// anything else is replaced by the incoming value.
pub fn merge_values(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Mapping(base_map), Value::Mapping(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(incoming_seq)) => {
            base_seq.extend(incoming_seq);
        }
        (base, incoming) => *base = incoming,
    }
}

/// Merges documents in order; later documents win.
pub fn merge_documents(documents: Vec<Value>) -> Value {
    let mut merged = Value::Null;
    for document in documents {
        merge_values(&mut merged, document);
    }
    merged
}

/// Produces the merged text for resolved overlay files.
///
/// A single file is returned verbatim, keeping comments and layout.
pub fn merge_files(files: &[PathBuf], fs: &dyn FileSystem) -> Result<String> {
    if let [only] = files {
        return fs.read(only);
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let content = fs.read(file)?;
        documents.push(config::parse_document(
            &content,
            &file.display().to_string(),
        )?);
    }

    config::to_yaml(&merge_documents(documents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_files;
    use tempfile::tempdir;

    fn yaml(content: &str) -> Value {
        serde_yml::from_str(content).unwrap()
    }

    fn name(n: &str) -> OverlayRef {
        OverlayRef::Name(n.to_string())
    }

    #[test]
    fn lists_accumulate_across_documents() {
        let merged = merge_documents(vec![
            yaml("a:\n  env: [X=1]\n"),
            yaml("a:\n  env: [Y=2]\n"),
        ]);
        assert_eq!(merged, yaml("a:\n  env: [X=1, Y=2]\n"));
    }

    #[test]
    fn scalars_last_wins() {
        let merged = merge_documents(vec![
            yaml("a:\n  image: foo:1\n"),
            yaml("a:\n  image: foo:2\n"),
        ]);
        assert_eq!(merged, yaml("a:\n  image: foo:2\n"));
    }

    #[test]
    fn mappings_merge_recursively_and_keep_order() {
        let merged = merge_documents(vec![
            yaml("services:\n  web:\n    image: web\n  db:\n    image: pg\n"),
            yaml("services:\n  web:\n    ports: ['80:80']\n  cache:\n    image: redis\n"),
        ]);
        let services = merged["services"].as_mapping().unwrap();
        let names: Vec<_> = services.keys().filter_map(Value::as_str).collect();
        assert_eq!(names, vec!["web", "db", "cache"]);
        assert_eq!(merged["services"]["web"]["image"], yaml("web"));
        assert_eq!(merged["services"]["web"]["ports"], yaml("['80:80']"));
    }

    #[test]
    fn resolve_tries_plain_then_dotted_names() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "").unwrap();
        std::fs::write(dir.path().join("docker-compose.dev.yml"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("extra")).unwrap();
        std::fs::write(dir.path().join("extra").join("docker-compose.ports.yml"), "").unwrap();

        let files = resolve(
            &[
                name("docker-compose.yml"),
                name("dev"),
                name("missing"),
                OverlayRef::Located {
                    name: "ports".to_string(),
                    path: Some("extra".to_string()),
                },
                name("dev"),
            ],
            dir.path(),
            &local_files::local(),
        );

        assert_eq!(
            files,
            vec![
                dir.path().join("docker-compose.yml"),
                dir.path().join("docker-compose.dev.yml"),
                dir.path().join("extra").join("docker-compose.ports.yml"),
            ]
        );
    }

    #[test]
    fn resolve_falls_back_to_default_file() {
        let dir = tempdir().unwrap();
        let files = resolve(&[name("nothing-here")], dir.path(), &local_files::local());
        assert_eq!(files, vec![dir.path().join("docker-compose.yml")]);
    }

    #[test]
    fn single_file_is_used_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        let content = "# base stack\nservices:\n  app:\n    image: app\n";
        std::fs::write(&path, content).unwrap();

        let merged = merge_files(&[path], &local_files::local()).unwrap();
        assert_eq!(merged, content);
    }

    #[test]
    fn multiple_files_are_merged() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docker-compose.yml");
        let dev = dir.path().join("docker-compose.dev.yml");
        std::fs::write(&base, "services:\n  app:\n    environment: [A=1]\n").unwrap();
        std::fs::write(&dev, "services:\n  app:\n    environment: [B=2]\n").unwrap();

        let merged = merge_files(&[base, dev], &local_files::local()).unwrap();
        assert_eq!(
            yaml(&merged),
            yaml("services:\n  app:\n    environment: [A=1, B=2]\n")
        );
    }
}
