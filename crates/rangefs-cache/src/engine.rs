//! The fetch engine (C8): orchestrates plan → dispatch → collect → commit
//! for a single read, and the directory lister (C9), which diffs
//! directory snapshots by etag and evicts stale file entries. Both are
//! exposed through `Engine`, the top-level handle constructed once at
//! mount and threaded through every read/list call site.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use rangefs_models::{Connector, Context, EngineError, FileStat, RangeWriter, Result};

use crate::dir_cache::DirCache;
use crate::file_cache::FileCache;
use crate::metadata_store::MetadataStore;
use crate::planner::plan_fetch;
use crate::tracker::Tracker;
use crate::worker_pool::WorkerPool;

pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub fetch_block_size: u64,
}

/// Owns every subsystem handle (metadata store, file/dir caches, worker
/// pool, tracker) and the connector they all fetch against. One instance
/// is constructed at mount time and shared by every caller thread.
pub struct Engine {
    file_cache: FileCache,
    dir_cache: DirCache,
    worker_pool: WorkerPool,
    tracker: Tracker,
    connector: Arc<dyn Connector>,
    block_size: u64,
}

impl Engine {
    pub fn new(config: EngineConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;
        let store = Arc::new(MetadataStore::open(&config.cache_dir.join("metadata.redb"))?);
        let file_cache = FileCache::new(config.cache_dir.join("cache"), Arc::clone(&store))?;
        let dir_cache = DirCache::new(store);
        let worker_pool = WorkerPool::new(config.workers, Arc::clone(&connector));
        Ok(Self {
            file_cache,
            dir_cache,
            worker_pool,
            tracker: Tracker::new(),
            connector,
            block_size: config.fetch_block_size,
        })
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// §4.7: serve `[off, off+len)` of `path` at the given `etag`/`file_size`,
    /// fetching only whatever the planner says is missing, and leave the
    /// backing file's local path ready for the caller to read from
    /// directly afterwards.
    pub fn prepare_for_read(
        &self,
        ctx: &Context,
        path: &str,
        etag: &str,
        offset: u64,
        length: u64,
        file_size: u64,
    ) -> Result<PathBuf> {
        let (local_path, valid) = self.file_cache.get_local_file(path, etag, file_size)?;

        let plan = plan_fetch(&valid, offset, length, file_size, self.block_size);
        if plan.is_empty() {
            self.tracker.stats().record_cache_lookup(true);
            return Ok(local_path);
        }
        self.tracker.stats().record_cache_lookup(false);
        debug!("prepare_for_read {path}: planned {} sub-range(s)", plan.len());

        let handle = self.tracker.begin(format!("prepare_for_read {path} [{offset},{})", offset + length));

        let mut receivers = Vec::with_capacity(plan.len());
        for range in &plan {
            let writer: Box<dyn RangeWriter> = Box::new(self.file_cache.open_writer(path)?);
            receivers.push((
                *range,
                self.worker_pool.submit(path.to_string(), etag.to_string(), *range, ctx.child(), writer),
            ));
        }

        let mut final_err: Option<EngineError> = None;
        let mut added = Vec::with_capacity(plan.len());
        for (requested, rx) in receivers {
            // Every enqueued request is drained even after a failure is
            // already known, so no reply channel or tracker state leaks.
            let response = rx.recv().map_err(|_| EngineError::Backend("worker dropped reply channel".into()));
            match response.and_then(|r| r.result) {
                Ok(prepared) => {
                    if prepared.offset > requested.offset || prepared.end() < requested.end() {
                        let err = EngineError::ShortFetch { requested, got: prepared };
                        self.tracker.stats().record_fetch(0, false);
                        fold_error(&mut final_err, err);
                    } else {
                        self.tracker.stats().record_fetch(prepared.length, true);
                        added.push(prepared);
                    }
                }
                Err(err) => {
                    self.tracker.stats().record_fetch(0, false);
                    fold_error(&mut final_err, err);
                }
            }
        }

        // Late commit: only after every reply is in, so a failed
        // sub-range's bytes never get marked valid alongside its siblings.
        for prepared in &added {
            self.file_cache.added_ranges(path, &[*prepared])?;
        }

        drop(handle);
        match final_err {
            Some(err) => Err(err),
            None => Ok(local_path),
        }
    }

    /// §4.5: `list_dir`, diffing the previous snapshot against a fresh one
    /// by etag and evicting stale file entries.
    pub fn list_dir(&self, ctx: &Context, path: &str) -> Result<Vec<FileStat>> {
        if let Some(cached) = self.dir_cache.get(path)?
            && cached.valid
        {
            self.tracker.stats().record_cache_lookup(true);
            return Ok(cached.files);
        }
        self.tracker.stats().record_cache_lookup(false);

        let handle = self.tracker.begin(format!("list_dir {path}"));
        let fresh = self.connector.list_dir(ctx, path, &handle);
        drop(handle);
        self.tracker.stats().record_list_dir();

        let fresh = match fresh {
            Ok(entries) => entries,
            Err(err) => {
                warn!("list_dir {path} backend refresh failed: {err}");
                return Err(err);
            }
        };

        if let Some(old) = self.dir_cache.get(path)? {
            for old_file in &old.files {
                let changed = match fresh.get(&old_file.name) {
                    Some(new_file) => new_file.etag != old_file.etag,
                    None => true,
                };
                if changed {
                    let child_path = join_path(path, &old_file.name);
                    match self.file_cache.evict_file(&child_path) {
                        Ok(()) | Err(EngineError::NotInCache) => {
                            info!("evicted stale cache entry for {child_path}");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        self.dir_cache.put(path, fresh.clone())?;
        Ok(fresh.files)
    }

    /// Control-plane `Invalidate`: mark the directory stale so the next
    /// `list_dir` re-consults the backend.
    pub fn invalidate(&self, path: &str) -> Result<()> {
        self.dir_cache.invalidate(path)
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "/" {
        format!("/{name}")
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// §4.7 error-folding: `new` replaces whatever is already in `slot` unless
/// `new` is `CanceledOperation` and `slot` already holds something — a
/// later genuine error always overwrites an earlier one, but cancellation
/// never overwrites a genuine error.
fn fold_error(slot: &mut Option<EngineError>, new: EngineError) {
    match slot {
        Some(_) if matches!(new, EngineError::CanceledOperation) => {}
        _ => *slot = Some(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangefs_models::{DirEntries, Range, StatusCallback};
    use std::sync::Mutex;

    struct MockConnector {
        files: Mutex<std::collections::HashMap<String, (String, Vec<u8>)>>,
        dirs: Mutex<std::collections::HashMap<String, Vec<FileStat>>>,
        fail_next_read: std::sync::atomic::AtomicBool,
    }

    impl MockConnector {
        fn new() -> Self {
            Self {
                files: Mutex::new(std::collections::HashMap::new()),
                dirs: Mutex::new(std::collections::HashMap::new()),
                fail_next_read: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn put(&self, path: &str, etag: &str, data: Vec<u8>) {
            self.files.lock().unwrap().insert(path.to_string(), (etag.to_string(), data));
        }

        fn set_dir(&self, path: &str, stats: Vec<FileStat>) {
            self.dirs.lock().unwrap().insert(path.to_string(), stats);
        }
    }

    impl Connector for MockConnector {
        fn list_dir(&self, _ctx: &Context, path: &str, _status: &dyn StatusCallback) -> Result<DirEntries> {
            let files = self.dirs.lock().unwrap().get(path).cloned().unwrap_or_default();
            Ok(DirEntries { valid: true, files })
        }

        fn prepare_for_read(
            &self,
            _ctx: &Context,
            path: &str,
            etag: &str,
            writer: &mut dyn RangeWriter,
            offset: u64,
            length: u64,
            _status: &dyn StatusCallback,
        ) -> Result<Range> {
            if self.fail_next_read.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(EngineError::Backend("injected failure".into()));
            }
            let files = self.files.lock().unwrap();
            let (current_etag, data) = files.get(path).ok_or(EngineError::InvalidPath(path.to_string()))?;
            if current_etag != etag {
                return Err(EngineError::UpdateDetected);
            }
            use std::io::SeekFrom;
            let end = ((offset + length) as usize).min(data.len());
            writer.seek(SeekFrom::Start(offset))?;
            writer.write_all(&data[offset as usize..end])?;
            Range::new(offset, (end as u64) - offset).ok_or(EngineError::InvalidPath(path.to_string()))
        }
    }

    fn engine(connector: Arc<MockConnector>) -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig { cache_dir: dir.path().to_path_buf(), workers: 2, fetch_block_size: 16 };
        (Engine::new(config, connector).unwrap(), dir)
    }

    #[test]
    fn prepare_for_read_fetches_then_serves_from_cache() {
        let connector = Arc::new(MockConnector::new());
        connector.put("/a", "e1", vec![b'z'; 40]);
        let (engine, _dir) = engine(connector);
        let ctx = Context::new();

        let path = engine.prepare_for_read(&ctx, "/a", "e1", 0, 40, 40).unwrap();
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, vec![b'z'; 40]);

        // second call should be a pure cache hit (no missing ranges)
        let stats_before = engine.tracker.stats().snapshot();
        engine.prepare_for_read(&ctx, "/a", "e1", 0, 40, 40).unwrap();
        let stats_after = engine.tracker.stats().snapshot();
        assert_eq!(stats_after.cache_hits, stats_before.cache_hits + 1);
    }

    #[test]
    fn s6_update_detected_surfaces_and_does_not_commit() {
        let connector = Arc::new(MockConnector::new());
        connector.put("/a", "e1", vec![b'z'; 40]);
        let (engine, _dir) = engine(connector.clone());
        let ctx = Context::new();
        engine.prepare_for_read(&ctx, "/a", "e1", 0, 16, 40).unwrap();

        connector.put("/a", "e2", vec![b'y'; 40]);
        let err = engine.prepare_for_read(&ctx, "/a", "e1", 16, 16, 40).unwrap_err();
        assert!(matches!(err, EngineError::UpdateDetected));
    }

    #[test]
    fn list_dir_diff_evicts_stale_entries() {
        let connector = Arc::new(MockConnector::new());
        connector.put("/dir/b", "e1", vec![1, 2, 3]);
        connector.set_dir(
            "/dir",
            vec![
                FileStat { name: "a".into(), is_dir: false, size: 1, etag: "e1".into() },
                FileStat { name: "b".into(), is_dir: false, size: 3, etag: "e1".into() },
            ],
        );
        let (engine, _dir) = engine(connector.clone());
        let ctx = Context::new();
        engine.list_dir(&ctx, "/dir").unwrap();
        engine.prepare_for_read(&ctx, "/dir/b", "e1", 0, 3, 3).unwrap();

        connector.set_dir(
            "/dir",
            vec![
                FileStat { name: "a".into(), is_dir: false, size: 1, etag: "e1".into() },
                FileStat { name: "c".into(), is_dir: false, size: 1, etag: "e1".into() },
            ],
        );
        engine.invalidate("/dir").unwrap();
        let fresh = engine.list_dir(&ctx, "/dir").unwrap();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().any(|f| f.name == "c"));
        assert!(!fresh.iter().any(|f| f.name == "b"));

        // "/dir/b" must have been evicted
        let (_path, valid) = engine.file_cache.get_local_file("/dir/b", "e1", 3).unwrap();
        assert!(valid.ranges().is_empty());
    }

    #[test]
    fn list_dir_second_call_without_invalidate_hits_cache() {
        let connector = Arc::new(MockConnector::new());
        connector.set_dir("/dir", vec![]);
        let (engine, _dir) = engine(connector);
        let ctx = Context::new();
        engine.list_dir(&ctx, "/dir").unwrap();
        let before = engine.tracker.stats().snapshot().list_dir_calls;
        engine.list_dir(&ctx, "/dir").unwrap();
        assert_eq!(engine.tracker.stats().snapshot().list_dir_calls, before);
    }
}
