use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Entry returned from directory listing
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl Entry {
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }
}

/// File system operations used by the local backend and artifact writers.
pub trait FileSystem {
    fn read(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, content: &str) -> Result<()>;
    fn list(&self, dir: &Path) -> Result<Vec<Entry>>;
    fn delete(&self, path: &Path) -> Result<()>;
    fn ensure_dir(&self, dir: &Path) -> Result<()>;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }
}

/// Local filesystem implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
        })
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        // Whole-file replace: write a sibling temp file, then rename over the target.
        let parent = path.parent().ok_or_else(|| {
            Error::internal_io(
                format!("Invalid path: {}", path.display()),
                Some("write file".to_string()),
            )
        })?;

        let filename = path.file_name().ok_or_else(|| {
            Error::internal_io(
                format!("Invalid path: {}", path.display()),
                Some("write file".to_string()),
            )
        })?;

        if !parent.as_os_str().is_empty() {
            self.ensure_dir(parent)?;
        }

        let tmp_path = parent.join(format!(".{}.tmp", filename.to_string_lossy()));

        fs::write(&tmp_path, content)
            .map_err(|e| Error::internal_io(e.to_string(), Some("write temp file".to_string())))?;

        fs::rename(&tmp_path, path)
            .map_err(|e| Error::internal_io(e.to_string(), Some("rename temp file".to_string())))?;

        Ok(())
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(dir)
            .map_err(|e| Error::internal_io(e.to_string(), Some("list directory".to_string())))?;

        let mut result = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = path.is_dir();
            result.push(Entry { path, is_dir });
        }
        result.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(result)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .map_err(|e| Error::internal_io(e.to_string(), Some("delete file".to_string())))
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                Error::internal_io(e.to_string(), Some("create directory".to_string()))
            })?;
        }
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Convenience function to get local filesystem
pub fn local() -> LocalFs {
    LocalFs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");
        let fs = local();

        fs.write(&path, "hello world").unwrap();
        assert_eq!(fs.read(&path).unwrap(), "hello world");
    }

    #[test]
    fn write_creates_missing_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("env");

        local().write(&path, "A=1").unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("nested").join(".env.tmp").exists());
    }

    #[test]
    fn list_is_sorted_and_tolerates_missing_dir() {
        let dir = tempdir().unwrap();
        let fs = local();

        assert!(fs.list(&dir.path().join("absent")).unwrap().is_empty());

        fs.write(&dir.path().join("b"), "").unwrap();
        fs.write(&dir.path().join("a"), "").unwrap();
        let names: Vec<_> = fs
            .list(dir.path())
            .unwrap()
            .iter()
            .filter_map(Entry::file_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delete_me.txt");
        let fs = local();

        fs.write(&path, "content").unwrap();
        fs.delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn exists_covers_files_and_directories() {
        let dir = tempdir().unwrap();
        let fs = local();
        let file = dir.path().join("env");
        fs.write(&file, "A=1").unwrap();

        assert!(fs.is_file(&file) && fs.exists(&file));
        assert!(fs.is_dir(dir.path()) && fs.exists(dir.path()));
        assert!(!fs.is_file(dir.path()));
        assert!(!fs.exists(&dir.path().join("absent")));
    }
}
