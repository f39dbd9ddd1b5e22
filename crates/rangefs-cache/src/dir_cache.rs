//! Directory snapshot cache: stores the last-known children of a directory
//! plus a freshness bit, so a `readdir` that arrives while the snapshot is
//! still fresh never touches the backend.

use std::sync::Arc;

use rangefs_models::{DirEntries, EngineError, Result};

use crate::metadata_store::MetadataStore;

pub struct DirCache {
    store: Arc<MetadataStore>,
}

impl DirCache {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    /// The cached snapshot for `path`, if any. Callers must check `.valid`
    /// themselves: a stale snapshot is still returned so the lister can
    /// diff old-vs-new rather than treating every refresh as a cold start.
    pub fn get(&self, path: &str) -> Result<Option<DirEntries>> {
        self.store.get_dir(path)
    }

    /// Replace the snapshot for `path`, marked fresh.
    pub fn put(&self, path: &str, entries: DirEntries) -> Result<()> {
        let mut entries = entries;
        entries.valid = true;
        self.store.put_dir(path, &entries)
    }

    /// Mark the cached snapshot for `path` stale without discarding it, so
    /// the next `list_dir` is forced to consult the backend but can still
    /// diff against the last known children. Returns `NotInCache` if
    /// nothing is cached for `path`.
    pub fn invalidate(&self, path: &str) -> Result<()> {
        match self.store.get_dir(path)? {
            Some(mut entries) => {
                if entries.valid {
                    entries.valid = false;
                    self.store.put_dir(path, &entries)?;
                }
                Ok(())
            }
            None => Err(EngineError::NotInCache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangefs_models::FileStat;

    fn new_cache() -> (DirCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("meta.redb")).unwrap());
        (DirCache::new(store), dir)
    }

    #[test]
    fn put_then_get_round_trips_and_marks_fresh() {
        let (cache, _dir) = new_cache();
        let entries = DirEntries {
            valid: false,
            files: vec![FileStat { name: "a".into(), is_dir: false, size: 1, etag: "e1".into() }],
        };
        cache.put("/", entries).unwrap();
        let fetched = cache.get("/").unwrap().unwrap();
        assert!(fetched.valid);
        assert_eq!(fetched.files.len(), 1);
    }

    #[test]
    fn invalidate_marks_stale_but_keeps_entries() {
        let (cache, _dir) = new_cache();
        let entries = DirEntries { valid: true, files: vec![] };
        cache.put("/", entries).unwrap();
        cache.invalidate("/").unwrap();
        let fetched = cache.get("/").unwrap().unwrap();
        assert!(!fetched.valid);
    }

    #[test]
    fn invalidate_of_unknown_dir_reports_not_in_cache() {
        let (cache, _dir) = new_cache();
        assert!(matches!(cache.invalidate("/missing"), Err(EngineError::NotInCache)));
    }

    #[test]
    fn get_of_unknown_dir_returns_none() {
        let (cache, _dir) = new_cache();
        assert!(cache.get("/nope").unwrap().is_none());
    }
}
