//! Backend connectors: implementations of [`rangefs_models::Connector`].
//!
//! This crate ships one connector to production depth — [`MockConnector`],
//! an in-memory object store used by the fetch-engine and directory-lister
//! test suites — and documents, without implementing, the shape a real
//! object-store adapter takes. A production adapter would look like this
//! pack's own `HttpBackend`: own a client and a runtime, translate every
//! `Connector` method into one or more HTTP calls, and map transport/HTTP
//! failures onto [`rangefs_models::EngineError::Backend`].
//!
//! ```text
//! pub struct S3Connector {
//!     runtime: tokio::runtime::Runtime,
//!     client: aws_sdk_s3::Client,
//!     bucket: String,
//!     prefix: String,
//! }
//!
//! impl Connector for S3Connector {
//!     fn list_dir(&self, ctx: &Context, path: &str, status: &dyn StatusCallback) -> Result<DirEntries> {
//!         // self.runtime.block_on(self.client.list_objects_v2()...),
//!         // grouping common prefixes into directory FileStats and deduplicating
//!         // a name that appears as both a key and a prefix (directories win).
//!     }
//!     fn prepare_for_read(&self, ctx, path, etag, writer, offset, length, status) -> Result<Range> {
//!         // self.runtime.block_on(self.client.get_object().range(...).if_match(etag)...),
//!         // streaming the body into `writer` and returning UpdateDetected on a
//!         // precondition-failed response.
//!     }
//! }
//! ```
//! A GCS adapter follows the same shape against `google-cloud-storage`.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use rangefs_models::{Connector, Context, DirEntries, EngineError, FileStat, Range, RangeWriter, Result, StatusCallback};

#[derive(Clone)]
struct Object {
    data: Vec<u8>,
    etag: String,
}

/// Per-call error injected on the next matching method invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    ListDir,
    PrepareForRead,
}

/// In-memory object store keyed by path, with configurable error injection
/// and an internal etag counter so tests can simulate the backend object
/// changing between two reads (S6).
pub struct MockConnector {
    objects: Mutex<HashMap<String, Object>>,
    dirs: Mutex<HashMap<String, Vec<FileStat>>>,
    etag_counter: AtomicU64,
    inject: Mutex<Vec<Injected>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
            etag_counter: AtomicU64::new(1),
            inject: Mutex::new(Vec::new()),
        }
    }

    /// Seed or replace an object's bytes, allocating a fresh etag so
    /// callers holding a stale etag observe `UpdateDetected` on their next
    /// read.
    pub fn put_object(&self, path: &str, data: Vec<u8>) -> String {
        let etag = format!("etag-{}", self.etag_counter.fetch_add(1, Ordering::SeqCst));
        self.objects.lock().insert(path.to_string(), Object { data, etag: etag.clone() });
        etag
    }

    pub fn set_dir(&self, path: &str, children: Vec<FileStat>) {
        self.dirs.lock().insert(path.to_string(), children);
    }

    /// Queue one error to be returned by the next matching call instead of
    /// a real result.
    pub fn inject_error(&self, kind: Injected) {
        self.inject.lock().push(kind);
    }

    fn take_injected(&self, kind: Injected) -> bool {
        let mut queue = self.inject.lock();
        if let Some(pos) = queue.iter().position(|k| *k == kind) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }
}

impl Connector for MockConnector {
    fn list_dir(&self, ctx: &Context, path: &str, _status: &dyn StatusCallback) -> Result<DirEntries> {
        ctx.check()?;
        if self.take_injected(Injected::ListDir) {
            return Err(EngineError::Backend("injected list_dir failure".into()));
        }
        let files = self.dirs.lock().get(path).cloned().unwrap_or_default();
        Ok(DirEntries { valid: true, files })
    }

    fn prepare_for_read(
        &self,
        ctx: &Context,
        path: &str,
        etag: &str,
        writer: &mut dyn RangeWriter,
        offset: u64,
        length: u64,
        _status: &dyn StatusCallback,
    ) -> Result<Range> {
        ctx.check()?;
        if self.take_injected(Injected::PrepareForRead) {
            return Err(EngineError::Backend("injected prepare_for_read failure".into()));
        }

        let objects = self.objects.lock();
        let object = objects.get(path).ok_or_else(|| EngineError::InvalidPath(path.to_string()))?;
        if object.etag != etag {
            return Err(EngineError::UpdateDetected);
        }

        let end = (offset + length).min(object.data.len() as u64);
        if end <= offset {
            return Err(EngineError::Backend(format!("read starts at or past end of object ({} bytes)", object.data.len())));
        }
        let slice = &object.data[offset as usize..end as usize];
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(slice)?;
        Ok(Range::new(offset, end - offset).expect("end > offset checked above"))
    }
}
