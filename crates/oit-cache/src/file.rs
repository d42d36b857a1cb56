//! Directory-backed store: one JSON file per key, replaced atomically
use crate::error::CacheError;
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_EXTENSION: &str = "json";

/// Files hold the original key next to the value so `keys()` can be listed
/// without reversing the file-name encoding.
#[derive(Serialize, Deserialize)]
struct Envelope {
    key: String,
    value: String,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "opened file cache");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_stem(key), ENTRY_EXTENSION))
    }

    fn read_envelope(&self, path: &Path) -> Result<Envelope, CacheError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Readable prefix plus a digest of the full key, so distinct keys never
/// share a file even when sanitizing maps them to the same prefix
fn file_stem(key: &str) -> String {
    let readable: String = key
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let digest = blake3::hash(key.as_bytes()).to_hex();
    format!("{}-{}", readable, &digest[..16])
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let envelope = self.read_envelope(&path)?;
        if envelope.key != key {
            return Err(CacheError::Corrupt {
                key: key.to_string(),
                reason: format!("file holds entry for '{}'", envelope.key),
            });
        }
        Ok(Some(envelope.value))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_vec(&Envelope {
            key: key.to_string(),
            value: value.to_string(),
        })?;

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match self.read_envelope(&path) {
                Ok(envelope) => keys.push(envelope.key),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unreadable cache file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("sampling-data-oit/42", "{\"a\":1}").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("sampling-data-oit/42").unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reopened.keys().unwrap(), vec!["sampling-data-oit/42".to_string()]);
    }

    #[test]
    fn test_sanitized_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("visit/1", "slash").unwrap();
        store.set("visit:1", "colon").unwrap();

        assert_eq!(store.get("visit/1").unwrap().as_deref(), Some("slash"));
        assert_eq!(store.get("visit:1").unwrap().as_deref(), Some("colon"));
        assert_eq!(store.keys().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.remove("never-written").unwrap();
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("k", "v").unwrap();
        fs::write(store.path_for("k"), b"{broken").unwrap();
        assert!(matches!(store.get("k"), Err(CacheError::Corrupt { .. })));
    }
}
