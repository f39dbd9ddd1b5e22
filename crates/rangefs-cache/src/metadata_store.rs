//! Transactional single-writer metadata store. Every durable fact the
//! engine needs across restarts — which byte ranges of a file are valid,
//! which directory snapshots are cached — lives in one redb database with
//! two tables. Values are self-describing JSON so the schema can grow
//! without a migration step.

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{Deserialize, Serialize};

use rangefs_models::{DirEntries, EngineError, Result};

use crate::range_set::RangeSet;

const FILES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("files");
const DIRS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("dirs");

/// Persisted record for a single cached file: its backend identity at the
/// time the cache was populated, and the set of byte ranges currently
/// valid in the local backing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub etag: String,
    pub size: u64,
    pub valid: RangeSet,
}

/// Stores the raw database handle. redb serializes writers internally via
/// its own transaction machinery, so no extra mutex is layered on top; a
/// `WriteTransaction` already blocks concurrent writers.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| EngineError::Metadata(e.to_string()))?;
        // Ensure both tables exist before any reader can observe a missing
        // table error.
        let txn = db.begin_write().map_err(|e| EngineError::Metadata(e.to_string()))?;
        {
            txn.open_table(FILES_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
            txn.open_table(DIRS_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Metadata(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let txn = self.db.begin_read().map_err(|e| EngineError::Metadata(e.to_string()))?;
        let table = txn.open_table(FILES_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
        match table.get(path).map_err(|e| EngineError::Metadata(e.to_string()))? {
            Some(v) => {
                let record: FileRecord =
                    serde_json::from_str(v.value()).map_err(|e| EngineError::Metadata(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn put_file(&self, path: &str, record: &FileRecord) -> Result<()> {
        let encoded = serde_json::to_string(record).map_err(|e| EngineError::Metadata(e.to_string()))?;
        let txn = self.db.begin_write().map_err(|e| EngineError::Metadata(e.to_string()))?;
        {
            let mut table = txn.open_table(FILES_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
            table
                .insert(path, encoded.as_str())
                .map_err(|e| EngineError::Metadata(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Metadata(e.to_string()))
    }

    pub fn remove_file(&self, path: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(|e| EngineError::Metadata(e.to_string()))?;
        let existed = {
            let mut table = txn.open_table(FILES_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
            table.remove(path).map_err(|e| EngineError::Metadata(e.to_string()))?.is_some()
        };
        txn.commit().map_err(|e| EngineError::Metadata(e.to_string()))?;
        if existed {
            Ok(())
        } else {
            Err(EngineError::NotInCache)
        }
    }

    pub fn get_dir(&self, path: &str) -> Result<Option<DirEntries>> {
        let txn = self.db.begin_read().map_err(|e| EngineError::Metadata(e.to_string()))?;
        let table = txn.open_table(DIRS_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
        match table.get(path).map_err(|e| EngineError::Metadata(e.to_string()))? {
            Some(v) => {
                let entries: DirEntries =
                    serde_json::from_str(v.value()).map_err(|e| EngineError::Metadata(e.to_string()))?;
                Ok(Some(entries))
            }
            None => Ok(None),
        }
    }

    pub fn put_dir(&self, path: &str, entries: &DirEntries) -> Result<()> {
        let encoded = serde_json::to_string(entries).map_err(|e| EngineError::Metadata(e.to_string()))?;
        let txn = self.db.begin_write().map_err(|e| EngineError::Metadata(e.to_string()))?;
        {
            let mut table = txn.open_table(DIRS_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
            table
                .insert(path, encoded.as_str())
                .map_err(|e| EngineError::Metadata(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Metadata(e.to_string()))
    }

    pub fn remove_dir(&self, path: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(|e| EngineError::Metadata(e.to_string()))?;
        let existed = {
            let mut table = txn.open_table(DIRS_TABLE).map_err(|e| EngineError::Metadata(e.to_string()))?;
            table.remove(path).map_err(|e| EngineError::Metadata(e.to_string()))?.is_some()
        };
        txn.commit().map_err(|e| EngineError::Metadata(e.to_string()))?;
        if existed {
            Ok(())
        } else {
            Err(EngineError::NotInCache)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangefs_models::{FileStat, Range};

    fn temp_store() -> (MetadataStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn round_trips_file_record() {
        let (store, _dir) = temp_store();
        assert!(store.get_file("/a").unwrap().is_none());

        let mut valid = RangeSet::new();
        valid.add(Range::new(0, 10).unwrap());
        let record = FileRecord { etag: "v1".into(), size: 100, valid };
        store.put_file("/a", &record).unwrap();

        let fetched = store.get_file("/a").unwrap().unwrap();
        assert_eq!(fetched.etag, "v1");
        assert_eq!(fetched.size, 100);
        assert_eq!(fetched.valid.ranges(), &[Range::new(0, 10).unwrap()]);
    }

    #[test]
    fn remove_file_clears_entry() {
        let (store, _dir) = temp_store();
        let record = FileRecord { etag: "v1".into(), size: 0, valid: RangeSet::new() };
        store.put_file("/a", &record).unwrap();
        store.remove_file("/a").unwrap();
        assert!(store.get_file("/a").unwrap().is_none());
    }

    #[test]
    fn round_trips_dir_entries() {
        let (store, _dir) = temp_store();
        let entries = DirEntries {
            valid: true,
            files: vec![FileStat { name: "a".into(), is_dir: false, size: 5, etag: "e1".into() }],
        };
        store.put_dir("/", &entries).unwrap();
        let fetched = store.get_dir("/").unwrap().unwrap();
        assert_eq!(fetched.files.len(), 1);
        assert!(fetched.valid);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.redb");
        {
            let store = MetadataStore::open(&db_path).unwrap();
            let record = FileRecord { etag: "v1".into(), size: 42, valid: RangeSet::new() };
            store.put_file("/a", &record).unwrap();
        }
        let store = MetadataStore::open(&db_path).unwrap();
        assert_eq!(store.get_file("/a").unwrap().unwrap().size, 42);
    }
}
