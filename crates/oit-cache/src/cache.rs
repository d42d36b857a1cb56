//! Typed sampling cache keyed by visit
use crate::error::CacheError;
use crate::store::KeyValueStore;
use oit_core::{SamplingData, SyncStatus, CACHE_KEY_PREFIX};
use parking_lot::Mutex;
use std::sync::Arc;

/// Local persistence for in-progress and completed sampling data.
///
/// Every read-modify-write goes through one lock so the sequencer and
/// reconciler tasks never interleave on the same record.
pub struct SamplingCache {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl SamplingCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn key_for(visit_id: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, visit_id)
    }

    pub fn save(&self, visit_id: &str, data: &SamplingData) -> Result<(), CacheError> {
        let _guard = self.lock.lock();
        self.write(visit_id, data)
    }

    pub fn load(&self, visit_id: &str) -> Result<Option<SamplingData>, CacheError> {
        let _guard = self.lock.lock();
        self.read(visit_id)
    }

    pub fn clear(&self, visit_id: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock();
        self.store.remove(&Self::key_for(visit_id))
    }

    /// Atomic read-modify-write. The record is written back only when `f`
    /// changed it; setting the slot to `None` removes the entry.
    pub fn update<T, E, F>(&self, visit_id: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Option<SamplingData>) -> Result<T, E>,
        E: From<CacheError>,
    {
        let _guard = self.lock.lock();
        let original = self.read(visit_id)?;
        let mut slot = original.clone();
        let out = f(&mut slot)?;

        if slot != original {
            match &slot {
                Some(data) => self.write(visit_id, data)?,
                None => self.store.remove(&Self::key_for(visit_id))?,
            }
        }
        Ok(out)
    }

    /// Visit ids with a cached record
    pub fn visits(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(CACHE_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Visits whose cached record has not reached the server
    pub fn unsynced_visits(&self) -> Result<Vec<String>, CacheError> {
        let mut unsynced = Vec::new();
        for visit_id in self.visits()? {
            match self.load(&visit_id) {
                Ok(Some(data)) if data.sync_status != SyncStatus::Synced => unsynced.push(visit_id),
                Ok(_) => {}
                Err(err) => tracing::warn!(visit_id = %visit_id, error = %err, "unreadable cached record"),
            }
        }
        Ok(unsynced)
    }

    fn read(&self, visit_id: &str) -> Result<Option<SamplingData>, CacheError> {
        let key = Self::key_for(visit_id);
        match self.store.get(&key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Corrupt { key, reason: e.to_string() }),
        }
    }

    fn write(&self, visit_id: &str, data: &SamplingData) -> Result<(), CacheError> {
        let raw = serde_json::to_string(data)?;
        self.store.set(&Self::key_for(visit_id), &raw)?;
        tracing::debug!(visit_id, revision = data.revision, progress = data.progress, "cached sampling data");
        Ok(())
    }
}

impl std::fmt::Debug for SamplingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SamplingCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileStore;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use oit_core::{StepData, StepKind, StepType, StepValue, Template, TemplateStep};
    use std::collections::BTreeMap;

    fn template() -> Template {
        Template::new(
            "tpl",
            "Coleta",
            vec![
                TemplateStep::new("a", 1, StepKind::Text),
                TemplateStep::new("b", 2, StepKind::Text),
            ],
        )
        .unwrap()
    }

    fn record(visit: &str) -> SamplingData {
        let mut data = SamplingData::new(visit, &template());
        data.steps.push(StepData {
            step_id: "a".to_string(),
            step_type: StepType::Text,
            value: Some(StepValue::Text("acknowledged".to_string())),
            files: vec![],
            timestamp: Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
            metadata: BTreeMap::new(),
        });
        data.touch();
        data
    }

    #[test]
    fn test_save_load_clear() {
        let cache = SamplingCache::new(Arc::new(MemoryStore::new()));
        let data = record("oit-1");

        cache.save("oit-1", &data).unwrap();
        assert_eq!(cache.load("oit-1").unwrap(), Some(data));

        cache.clear("oit-1").unwrap();
        assert_eq!(cache.load("oit-1").unwrap(), None);
    }

    #[test]
    fn test_visits_are_isolated() {
        let cache = SamplingCache::new(Arc::new(MemoryStore::new()));
        cache.save("oit-1", &record("oit-1")).unwrap();
        let mut other = record("oit-2");
        other.steps.clear();
        other.touch();
        cache.save("oit-2", &other).unwrap();

        assert_eq!(cache.load("oit-1").unwrap().unwrap().steps.len(), 1);
        assert_eq!(cache.load("oit-2").unwrap().unwrap().steps.len(), 0);
        assert_eq!(cache.visits().unwrap(), vec!["oit-1".to_string(), "oit-2".to_string()]);
    }

    #[test]
    fn test_update_skips_unchanged_write() {
        let store = Arc::new(MemoryStore::new());
        let cache = SamplingCache::new(store.clone());
        cache.save("oit-1", &record("oit-1")).unwrap();
        let before = store.writes();

        let progress: Result<u8, CacheError> =
            cache.update("oit-1", |slot| Ok(slot.as_ref().map(|d| d.progress).unwrap_or(0)));
        assert_eq!(progress.unwrap(), 50);
        assert_eq!(store.writes(), before);

        let _: Result<(), CacheError> = cache.update("oit-1", |slot| {
            if let Some(data) = slot.as_mut() {
                data.sync_status = SyncStatus::Synced;
            }
            Ok(())
        });
        assert_eq!(store.writes(), before + 1);
        assert!(cache.unsynced_visits().unwrap().is_empty());
    }

    #[test]
    fn test_update_none_removes_entry() {
        let cache = SamplingCache::new(Arc::new(MemoryStore::new()));
        cache.save("oit-1", &record("oit-1")).unwrap();
        let _: Result<(), CacheError> = cache.update("oit-1", |slot| {
            *slot = None;
            Ok(())
        });
        assert!(cache.visits().unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let data = record("oit-7");
        {
            let cache = SamplingCache::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            cache.save("oit-7", &data).unwrap();
        }
        let cache = SamplingCache::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        assert_eq!(cache.load("oit-7").unwrap(), Some(data));
        assert_eq!(cache.unsynced_visits().unwrap(), vec!["oit-7".to_string()]);
    }
}
