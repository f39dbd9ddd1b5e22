//! Shared types for the range-cache filesystem: the byte-range primitive,
//! directory/file metadata, the backend connector contract, and the error
//! kinds that cross every component boundary.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A half-open byte interval `[offset, offset + length)`.
///
/// `length` is always > 0; constructing an empty range is rejected by
/// [`Range::new`]. All arithmetic is unsigned 64-bit and callers are
/// responsible for not overflowing `offset + length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub offset: u64,
    pub length: u64,
}

impl Range {
    pub fn new(offset: u64, length: u64) -> Option<Self> {
        if length == 0 {
            return None;
        }
        offset.checked_add(length)?;
        Some(Range { offset, length })
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// Metadata for one remote object or directory, as reported by a [`Connector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Opaque content identity; directories carry an empty etag.
    pub etag: String,
}

/// A directory snapshot: its children plus whether the snapshot is still
/// considered fresh. Stale (`valid == false`) snapshots are retained so a
/// refresh can diff old-vs-new (see the directory lister).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirEntries {
    pub valid: bool,
    pub files: Vec<FileStat>,
}

impl DirEntries {
    pub fn get(&self, name: &str) -> Option<&FileStat> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Error kinds shared by every component. `NotInCache` and
/// `CanceledOperation` are non-fatal/expected in the places that document
/// them; the rest propagate as hard failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not in cache")]
    NotInCache,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("remote object changed since etag was sampled")]
    UpdateDetected,
    #[error("operation canceled")]
    CanceledOperation,
    #[error("backend delivered {delivered} bytes, expected {expected}")]
    BadLength { expected: u64, delivered: u64 },
    #[error("backend under-delivered: requested {requested}, got {got}")]
    ShortFetch { requested: Range, got: Range },
    #[error("metadata store error: {0}")]
    Metadata(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Cooperative cancellation carried end-to-end through every backend call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(EngineError::CanceledOperation)` if this context has
    /// already been cancelled; callers check this at poll points rather
    /// than before every operation.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(EngineError::CanceledOperation)
        } else {
            Ok(())
        }
    }
}

/// Observability sink an operation reports free-text progress to. Kept
/// separate from logging: this is consumed by the control-plane `GetStatus`
/// call, not by the log facade.
pub trait StatusCallback: Send + Sync {
    fn set_status(&self, status: &str);
}

impl StatusCallback for () {
    fn set_status(&self, _status: &str) {}
}

/// A seekable byte sink: absolute-offset seeks followed by writes, matching
/// what `io::Write + io::Seek` already gives us on a `std::fs::File`.
pub trait RangeWriter: io::Write + io::Seek + Send {}
impl<T: io::Write + io::Seek + Send> RangeWriter for T {}

/// Capability implemented by a concrete object-store adapter (S3, GCS, or a
/// mock) and consumed by the worker pool and directory lister. All methods
/// are blocking; adapters that wrap an async client drive their own runtime
/// internally, as `HttpBackend`-style connectors in this codebase do.
pub trait Connector: Send + Sync {
    /// List the immediate children of `path` (relative to the mount's
    /// prefix). Directories have `size == 0` and an empty etag. A name
    /// that appears as both a key and a common prefix must be reported
    /// once, as a directory.
    fn list_dir(&self, ctx: &Context, path: &str, status: &dyn StatusCallback) -> Result<DirEntries>;

    /// Issue a conditional ranged read. Bytes are streamed into `writer`
    /// starting at absolute offset `offset`. Returns the actual range
    /// delivered, which may be shorter than requested at end-of-file but
    /// must start no later than `offset`.
    fn prepare_for_read(
        &self,
        ctx: &Context,
        path: &str,
        etag: &str,
        writer: &mut dyn RangeWriter,
        offset: u64,
        length: u64,
        status: &dyn StatusCallback,
    ) -> Result<Range>;
}
