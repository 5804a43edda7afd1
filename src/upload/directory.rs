use std::fs;
use std::path::{Component, Path, PathBuf};

use super::ObjectStore;
use crate::error::{Result, TaskwardenError};

/// Object store backed by a local (or network-mounted) directory.
///
/// Objects land at `<root>/<bucket>/<key>`. Each upload is written to a
/// sibling temp file and renamed into place, so readers never see a partial
/// copy.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(TaskwardenError::Upload {
                path: relative,
                message: "bucket and key must be plain relative path segments".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for DirectoryStore {
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<()> {
        let target = self.object_path(bucket, key)?;
        let upload_error = |message: String| TaskwardenError::Upload {
            path: local_path.to_path_buf(),
            message,
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| upload_error(format!("cannot create {}: {e}", parent.display())))?;
        }

        let mut temp_name = target.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".partial");
        let temp = target.with_file_name(temp_name);

        fs::copy(local_path, &temp).map_err(|e| upload_error(e.to_string()))?;
        fs::rename(&temp, &target).map_err(|e| {
            let _ = fs::remove_file(&temp);
            upload_error(format!("cannot move into {}: {e}", target.display()))
        })?;
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let download_error = |message: String| TaskwardenError::Download {
            location: format!("{bucket}/{key}"),
            message,
        };
        let source = self
            .object_path(bucket, key)
            .map_err(|e| download_error(e.to_string()))?;
        fs::copy(&source, local_path)
            .map_err(|e| download_error(format!("{}: {e}", source.display())))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upload_copies_into_bucket_and_key() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("log.txt");
        fs::write(&source, "row 1\n").unwrap();

        let store = DirectoryStore::new(dir.path().join("store"));
        store.upload(&source, "logs", "host/2024/log.txt").unwrap();

        let uploaded = dir.path().join("store/logs/host/2024/log.txt");
        assert_eq!(fs::read_to_string(&uploaded).unwrap(), "row 1\n");
        assert!(!dir.path().join("store/logs/host/2024/log.txt.partial").exists());
    }

    #[test]
    fn test_upload_replaces_previous_object() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("log.txt");
        let store = DirectoryStore::new(dir.path().join("store"));

        fs::write(&source, "first\n").unwrap();
        store.upload(&source, "logs", "log.txt").unwrap();
        fs::write(&source, "first\nsecond\n").unwrap();
        store.upload(&source, "logs", "log.txt").unwrap();

        let uploaded = fs::read_to_string(dir.path().join("store/logs/log.txt")).unwrap();
        assert_eq!(uploaded, "first\nsecond\n");
    }

    #[test]
    fn test_missing_source_is_an_upload_error() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path());
        let err = store
            .upload(&dir.path().join("missing.txt"), "logs", "log.txt")
            .unwrap_err();
        assert!(matches!(err, TaskwardenError::Upload { .. }));
    }

    #[test]
    fn test_download_reads_back_uploaded_object() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("log.txt");
        fs::write(&source, "a\tb\n1\t2\n").unwrap();
        let store = DirectoryStore::new(dir.path().join("store"));
        store.upload(&source, "logs", "host/log.txt").unwrap();

        let local = dir.path().join("copy.txt");
        fs::write(&local, "stale").unwrap();
        store.download("logs", "host/log.txt", &local).unwrap();
        assert_eq!(fs::read_to_string(&local).unwrap(), "a\tb\n1\t2\n");
    }

    #[test]
    fn test_download_of_missing_object_fails() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path());
        let err = store
            .download("logs", "missing.txt", &dir.path().join("copy.txt"))
            .unwrap_err();
        assert!(matches!(err, TaskwardenError::Download { .. }));
        assert!(err.to_string().contains("logs/missing.txt"));
    }

    #[test]
    fn test_key_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("log.txt");
        fs::write(&source, "x").unwrap();
        let store = DirectoryStore::new(dir.path().join("store"));
        assert!(store.upload(&source, "logs", "../../etc/passwd").is_err());
        assert!(store.upload(&source, "..", "log.txt").is_err());
    }
}
