use std::path::{Path, PathBuf};

use crate::config::BackendKind;
use crate::error::{Error, Result};
use crate::local_files::FileSystem;

use super::backend::Backend;

/// One file per environment under a root directory.
pub struct LocalBackend<'a> {
    root: PathBuf,
    fs: &'a dyn FileSystem,
}

impl<'a> LocalBackend<'a> {
    pub fn new(root: PathBuf, fs: &'a dyn FileSystem) -> Self {
        Self { root, fs }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Backend for LocalBackend<'_> {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .fs
            .list(&self.root)?
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| entry.file_name())
            .filter(|name| !name.starts_with('.'))
            .collect())
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        if !self.fs.is_file(&path) {
            return Err(Error::backend_config_not_found(name));
        }
        self.fs.read(&path)
    }

    fn write(&self, name: &str, path: &Path) -> Result<()> {
        let content = self.fs.read(path)?;
        self.fs.ensure_dir(&self.root)?;
        self.fs.write(&self.path(name), &content)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if self.fs.exists(&path) {
            self.fs.delete(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_files::{self, Entry};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    /// Files held in memory; directories are implied by their contents.
    #[derive(Default)]
    struct MemoryFs {
        files: RefCell<BTreeMap<PathBuf, String>>,
    }

    impl FileSystem for MemoryFs {
        fn read(&self, path: &Path) -> Result<String> {
            self.files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::internal_io("no such file", Some(path.display().to_string())))
        }

        fn write(&self, path: &Path, content: &str) -> Result<()> {
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), content.to_string());
            Ok(())
        }

        fn list(&self, dir: &Path) -> Result<Vec<Entry>> {
            Ok(self
                .files
                .borrow()
                .keys()
                .filter(|path| path.parent() == Some(dir))
                .map(|path| Entry {
                    path: path.clone(),
                    is_dir: false,
                })
                .collect())
        }

        fn delete(&self, path: &Path) -> Result<()> {
            self.files.borrow_mut().remove(path);
            Ok(())
        }

        fn ensure_dir(&self, _dir: &Path) -> Result<()> {
            Ok(())
        }

        fn is_file(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }

        fn is_dir(&self, path: &Path) -> bool {
            self.files.borrow().keys().any(|file| file.starts_with(path) && file != path)
        }
    }

    #[test]
    fn write_read_round_trip_creates_root() {
        let dir = tempdir().unwrap();
        let fs = local_files::local();
        let backend = LocalBackend::new(dir.path().join("environments"), &fs);

        let source = dir.path().join("env.txt");
        let content = "A=1\nB=${A}\nC=\n";
        std::fs::write(&source, content).unwrap();

        backend.write("dev-app", &source).unwrap();
        assert_eq!(backend.read("dev-app").unwrap(), content);
        assert_eq!(backend.list().unwrap(), vec!["dev-app".to_string()]);
    }

    #[test]
    fn missing_config_is_distinguishable() {
        let dir = tempdir().unwrap();
        let fs = local_files::local();
        let backend = LocalBackend::new(dir.path().to_path_buf(), &fs);

        let err = backend.read("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let fs = local_files::local();
        let backend = LocalBackend::new(dir.path().to_path_buf(), &fs);
        std::fs::write(dir.path().join("dev-app"), "A=1\n").unwrap();

        backend.remove("dev-app").unwrap();
        backend.remove("dev-app").unwrap();
        assert!(backend.list().unwrap().is_empty());
    }

    #[test]
    fn lookups_go_through_the_injected_filesystem() {
        let fs = MemoryFs::default();
        let backend = LocalBackend::new(PathBuf::from("/envs"), &fs);

        assert!(backend.read("dev-app").unwrap_err().is_not_found());

        fs.write(Path::new("/tmp/upload"), "A=1\n").unwrap();
        backend.write("dev-app", Path::new("/tmp/upload")).unwrap();
        assert_eq!(backend.read("dev-app").unwrap(), "A=1\n");
        assert_eq!(backend.list().unwrap(), vec!["dev-app".to_string()]);

        backend.remove("dev-app").unwrap();
        backend.remove("dev-app").unwrap();
        assert!(!fs.exists(Path::new("/envs/dev-app")));
    }
}
