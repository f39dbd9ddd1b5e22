//! Local backing-file lifecycle for cached objects: where their bytes live
//! on disk, and the bookkeeping of which byte ranges are currently valid.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rangefs_models::{EngineError, Range, Result};

use crate::metadata_store::{FileRecord, MetadataStore};
use crate::range_set::RangeSet;

/// Maps a remote path to a local backing-file path deterministically, so a
/// restart can find an existing file's data without re-reading a directory.
fn backing_file_path(cache_dir: &Path, remote_path: &str) -> PathBuf {
    let digest = format!("{:x}", simple_hash(remote_path));
    cache_dir.join("files").join(digest)
}

/// Small non-cryptographic string hash; collisions just mean two remote
/// paths would fight over one backing file; practically that never happens
/// with the full path as input.
fn simple_hash(s: &str) -> u64 {
    let mut h: u64 = 1469598103934665603;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

/// Owns the on-disk backing files and the metadata store's `files` table.
/// One instance is shared by every worker and every FUSE read call; the
/// store gives its own writer serialization, and `dir_lock` covers the
/// small window between a backing-file allocation and its first metadata
/// write.
pub struct FileCache {
    cache_dir: PathBuf,
    store: std::sync::Arc<MetadataStore>,
    // Guards backing-file creation; redb already serializes metadata
    // writes but a fresh file must exist before its first record does.
    create_lock: Mutex<()>,
}

impl FileCache {
    pub fn new(cache_dir: PathBuf, store: std::sync::Arc<MetadataStore>) -> Result<Self> {
        fs::create_dir_all(cache_dir.join("files"))?;
        Ok(Self { cache_dir, store, create_lock: Mutex::new(()) })
    }

    /// Returns the local backing path for `remote_path`, creating an empty
    /// file and a fresh metadata record (etag/size `expected`) if this is
    /// the first time the object has been seen, or if a prior record's
    /// etag no longer matches (the object changed upstream: old bytes are
    /// discarded, since they belong to a different generation of the
    /// file).
    pub fn get_local_file(&self, remote_path: &str, etag: &str, size: u64) -> Result<(PathBuf, RangeSet)> {
        let _guard = self.create_lock.lock().unwrap();
        let path = backing_file_path(&self.cache_dir, remote_path);

        match self.store.get_file(remote_path)? {
            Some(record) if record.etag == etag => Ok((path, record.valid)),
            _ => {
                File::create(&path)?.set_len(size)?;
                let record = FileRecord { etag: etag.to_string(), size, valid: RangeSet::new() };
                self.store.put_file(remote_path, &record)?;
                Ok((path, RangeSet::new()))
            }
        }
    }

    /// Commit newly fetched ranges for `remote_path`. Only called after a
    /// batch of fetches has fully succeeded (late-commit, see the fetch
    /// engine); partial batches must never reach here, or a failed
    /// sub-range's bytes would be marked valid.
    pub fn added_ranges(&self, remote_path: &str, ranges: &[Range]) -> Result<()> {
        let mut record = self.store.get_file(remote_path)?.ok_or(EngineError::NotInCache)?;
        for r in ranges {
            record.valid.add(*r);
        }
        self.store.put_file(remote_path, &record)
    }

    /// Open a fresh, independent handle onto `remote_path`'s backing file
    /// for writing. Each fetch worker gets its own handle (its own seek
    /// position) so disjoint sub-range writes never race on file
    /// position, matching POSIX `pwrite` semantics.
    pub fn open_writer(&self, remote_path: &str) -> Result<File> {
        let path = backing_file_path(&self.cache_dir, remote_path);
        Ok(fs::OpenOptions::new().write(true).open(&path)?)
    }

    /// Drop all cached knowledge of `remote_path`: its metadata record and
    /// its backing file. Invoked when the directory lister detects the
    /// object's etag changed or it was removed upstream.
    pub fn evict_file(&self, remote_path: &str) -> Result<()> {
        self.store.remove_file(remote_path)?;
        let path = backing_file_path(&self.cache_dir, remote_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_cache() -> (FileCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("meta.redb")).unwrap());
        let cache = FileCache::new(dir.path().join("cache"), store).unwrap();
        (cache, dir)
    }

    #[test]
    fn first_request_creates_empty_record() {
        let (cache, _dir) = new_cache();
        let (path, valid) = cache.get_local_file("/a", "etag1", 100).unwrap();
        assert!(path.exists());
        assert!(valid.ranges().is_empty());
    }

    #[test]
    fn etag_change_resets_cached_ranges() {
        let (cache, _dir) = new_cache();
        cache.get_local_file("/a", "etag1", 100).unwrap();
        cache.added_ranges("/a", &[Range::new(0, 50).unwrap()]).unwrap();
        let (_path, valid) = cache.get_local_file("/a", "etag1", 100).unwrap();
        assert!(valid.first_missing(Range::new(0, 50).unwrap()).is_none());

        let (_path, valid) = cache.get_local_file("/a", "etag2", 100).unwrap();
        assert!(valid.ranges().is_empty());
    }

    #[test]
    fn open_writer_then_commit_persists_bytes_and_range() {
        use std::io::{Seek, SeekFrom, Write};
        let (cache, _dir) = new_cache();
        let (path, _) = cache.get_local_file("/a", "etag1", 10).unwrap();
        let mut writer = cache.open_writer("/a").unwrap();
        writer.seek(SeekFrom::Start(0)).unwrap();
        writer.write_all(b"hello").unwrap();
        cache.added_ranges("/a", &[Range::new(0, 5).unwrap()]).unwrap();
        let contents = fs::read(&path).unwrap();
        assert_eq!(&contents[0..5], b"hello");
        let (_path, valid) = cache.get_local_file("/a", "etag1", 10).unwrap();
        assert!(valid.first_missing(Range::new(0, 5).unwrap()).is_none());
    }

    #[test]
    fn evict_removes_record_and_file() {
        let (cache, _dir) = new_cache();
        let (path, _) = cache.get_local_file("/a", "etag1", 10).unwrap();
        cache.evict_file("/a").unwrap();
        assert!(!path.exists());
        let (_path, valid) = cache.get_local_file("/a", "etag1", 10).unwrap();
        assert!(valid.ranges().is_empty());
    }

    #[test]
    fn evict_of_unknown_path_reports_not_in_cache() {
        let (cache, _dir) = new_cache();
        assert!(matches!(cache.evict_file("/never-seen"), Err(EngineError::NotInCache)));
    }
}
