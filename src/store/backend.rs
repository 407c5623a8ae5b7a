// Blob backends for the configuration catalogue
//
// The store only needs "put/get/remove a named blob". Configurations are
// kept as one pretty-printed JSON file per name, like the rest of the
// daemon's on-disk state.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Named blob storage
pub trait BlobStore: Send + Sync {
    /// Names of every stored blob
    fn list(&self) -> Result<Vec<String>>;

    /// Blob contents, or `None` if absent
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace a blob
    fn put(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Remove a blob; returns whether it existed
    fn remove(&self, name: &str) -> Result<bool>;

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }
}

/// One `<name>.json` file per blob inside a directory
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    /// Open (and create if needed) the backing directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `name`; names that could leave the directory are refused
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let escapes =
            name.starts_with('.') || name.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
        if name.is_empty() || escapes {
            bail!("Invalid blob name '{}'", name);
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl BlobStore for FileBlobStore {
    fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read config directory: {}", self.dir.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(data))
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        // Write-then-rename so readers never see a half-written file
        let tmp = self.dir.join(format!(".{}.json.tmp", name));
        fs::write(&tmp, data).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Wrote config blob");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }
}

/// In-memory blobs, for tests and ephemeral daemons
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn list(&self) -> Result<Vec<String>> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.keys().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.get(name).cloned())
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBlobStore::open(temp_dir.path().join("configs"))?;

        assert!(store.list()?.is_empty());
        assert!(store.get("fast")?.is_none());

        store.put("fast", b"{\"a\":1}")?;
        store.put("slow", b"{}")?;
        assert_eq!(store.list()?, vec!["fast".to_string(), "slow".to_string()]);
        assert_eq!(store.get("fast")?.as_deref(), Some(&b"{\"a\":1}"[..]));
        assert!(store.exists("slow")?);

        assert!(store.remove("fast")?);
        assert!(!store.remove("fast")?);
        assert_eq!(store.list()?, vec!["slow".to_string()]);
        Ok(())
    }

    #[test]
    fn test_file_store_ignores_foreign_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBlobStore::open(temp_dir.path())?;
        fs::write(temp_dir.path().join("notes.txt"), "hello")?;
        store.put("run", b"{}")?;
        assert_eq!(store.list()?, vec!["run".to_string()]);
        Ok(())
    }

    #[test]
    fn test_file_store_stays_inside_its_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let victim = temp_dir.path().join("victim.json");
        fs::write(&victim, "{\"secret\": 1}")?;
        let store = FileBlobStore::open(temp_dir.path().join("configs"))?;

        assert!(store.get("../victim").is_err());
        assert!(store.remove("../victim").is_err());
        assert!(store.put("../victim", b"{}").is_err());
        assert!(store.get(".hidden").is_err());
        assert_eq!(fs::read_to_string(&victim)?, "{\"secret\": 1}");
        Ok(())
    }

    #[test]
    fn test_memory_store() -> Result<()> {
        let store = MemoryBlobStore::new();
        store.put("b", b"2")?;
        store.put("a", b"1")?;
        assert_eq!(store.list()?, vec!["a".to_string(), "b".to_string()]);
        assert!(store.remove("a")?);
        assert!(!store.exists("a")?);
        Ok(())
    }
}
