//! Persistent blob store. A rooted directory `data/<ip-port>/` that
//! reads and writes JSON blobs by relative path. Single process per
//! identity — no locking.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::identity::User;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// `data/<ip-port>/` rooted at `data_dir` for the given identity.
    pub fn for_user(data_dir: &Path, user: User) -> Self {
        Self {
            root: data_dir.join(user.to_filename()),
        }
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.full_path(path).exists()
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let full = self.full_path(path);
        debug!(?full, "reading blob");
        let bytes = std::fs::read(full)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes atomically via temp-file-and-rename in the same directory.
    pub fn write<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = full.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &full)?;
        debug!(?full, "wrote blob");
        Ok(())
    }

    /// No-op if the path does not exist.
    pub fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NodeError::Io(e)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Blob {
        n: u32,
    }

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::at(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (_dir, store) = store();
        store.write("a.json", &Blob { n: 1 }).unwrap();
        assert!(store.exists("a.json"));
        let back: Blob = store.read("a.json").unwrap();
        assert_eq!(back, Blob { n: 1 });
    }

    #[test]
    fn delete_is_noop_if_absent() {
        let (_dir, store) = store();
        assert!(store.delete("missing.json").is_ok());
    }

    #[test]
    fn delete_removes_file() {
        let (_dir, store) = store();
        store.write("a.json", &Blob { n: 1 }).unwrap();
        store.delete("a.json").unwrap();
        assert!(!store.exists("a.json"));
    }

    #[test]
    fn write_creates_nested_dirs() {
        let (_dir, store) = store();
        store.write("timelines/a.json", &Blob { n: 2 }).unwrap();
        assert!(store.exists("timelines/a.json"));
    }
}
