//! Thin, read-only kernel filesystem adapter: translates `lookup` /
//! `getattr` / `readdir` / `open` / `read` into `Engine::list_dir` /
//! `Engine::prepare_for_read` calls, maps `EngineError` to errno, and
//! rejects every write-class operation with `EROFS`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, Request};
use log::{debug, warn};

use rangefs_cache::Engine;
use rangefs_models::{Context, EngineError, FileStat};

const TTL_FILE: Duration = Duration::from_secs(7);
const TTL_DIR: Duration = Duration::from_secs(3);
const ROOT_INO: u64 = 1;

fn map_error(err: &EngineError) -> libc::c_int {
    use libc::{EINTR, EIO, ENOENT};
    match err {
        EngineError::InvalidPath(_) | EngineError::NotInCache => ENOENT,
        EngineError::UpdateDetected => EIO,
        EngineError::CanceledOperation => EINTR,
        EngineError::BadLength { .. } | EngineError::ShortFetch { .. } | EngineError::Metadata(_) | EngineError::Backend(_) => EIO,
        EngineError::Io(e) => e.raw_os_error().unwrap_or(EIO),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn stat_to_attr(ino: u64, stat: &FileStat) -> FileAttr {
    let now = std::time::SystemTime::now();
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: if stat.is_dir { FileType::Directory } else { FileType::RegularFile },
        perm: if stat.is_dir { 0o555 } else { 0o444 },
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        flags: 0,
        blksize: 4096,
    }
}

fn root_attr() -> FileAttr {
    stat_to_attr(ROOT_INO, &FileStat { name: String::new(), is_dir: true, size: 0, etag: String::new() })
}

struct Node {
    path: String,
    stat: FileStat,
}

/// A read-only view of the path→inode table, shared with the control
/// plane so `Invalidate(path)` can ask the kernel to drop that entry's
/// cached dentry (`Notifier::inval_entry` needs an inode, not a path).
#[derive(Clone, Default)]
pub struct InodeIndex(Arc<Mutex<HashMap<String, u64>>>);

impl InodeIndex {
    pub fn lookup(&self, path: &str) -> Option<u64> {
        self.0.lock().unwrap().get(path).copied()
    }
}

/// An open file handle: the path it was opened against plus the size/etag
/// sampled at `open` time, so every `read` can ask the engine for exactly
/// the missing sub-ranges without re-listing the parent directory.
struct OpenFile {
    path: String,
    etag: String,
    size: u64,
}

/// `fuser::Filesystem` over a [`rangefs_cache::Engine`]. Inode numbers are
/// assigned lazily on first `lookup`/`readdir` and never reused within a
/// mount's lifetime; this mirrors how this pack's own FUSE binding expects
/// inode identity to behave (stable for the mount's duration, not
/// necessarily across mounts).
pub struct RangeFs {
    engine: Arc<Engine>,
    nodes: HashMap<u64, Node>,
    path_to_ino: InodeIndex,
    next_ino: u64,
    open_files: HashMap<u64, OpenFile>,
    next_fh: u64,
}

impl RangeFs {
    pub fn new(engine: Arc<Engine>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node { path: "/".to_string(), stat: FileStat { name: String::new(), is_dir: true, size: 0, etag: String::new() } },
        );
        let path_to_ino = InodeIndex::default();
        path_to_ino.0.lock().unwrap().insert("/".to_string(), ROOT_INO);
        Self { engine, nodes, path_to_ino, next_ino: ROOT_INO + 1, open_files: HashMap::new(), next_fh: 1 }
    }

    /// A cloneable handle onto this filesystem's path→inode table, for the
    /// control plane to resolve `Invalidate(path)` into a kernel notify.
    pub fn index(&self) -> InodeIndex {
        self.path_to_ino.clone()
    }

    fn intern(&mut self, path: &str, stat: FileStat) -> u64 {
        if let Some(&ino) = self.path_to_ino.0.lock().unwrap().get(path) {
            self.nodes.get_mut(&ino).unwrap().stat = stat;
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.path_to_ino.0.lock().unwrap().insert(path.to_string(), ino);
        self.nodes.insert(ino, Node { path: path.to_string(), stat });
        ino
    }
}

impl Filesystem for RangeFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.nodes.get(&parent).map(|n| n.path.clone()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let name = name.to_string_lossy().to_string();
        let ctx = Context::new();
        let children = match self.engine.list_dir(&ctx, &parent_path) {
            Ok(children) => children,
            Err(err) => {
                warn!("lookup {parent_path}/{name}: list_dir failed: {err}");
                reply.error(map_error(&err));
                return;
            }
        };
        let Some(stat) = children.into_iter().find(|f| f.name == name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, &name);
        let ino = self.intern(&child_path, stat.clone());
        reply.entry(&TTL_FILE, &stat_to_attr(ino, &stat), 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        if ino == ROOT_INO {
            reply.attr(&TTL_DIR, &root_attr());
            return;
        }
        let Some(node) = self.nodes.get(&ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let ttl = if node.stat.is_dir { TTL_DIR } else { TTL_FILE };
        reply.attr(&ttl, &stat_to_attr(ino, &node.stat));
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.nodes.get(&ino).map(|n| n.path.clone()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let ctx = Context::new();
        let children = match self.engine.list_dir(&ctx, &path) {
            Ok(children) => children,
            Err(err) => {
                reply.error(map_error(&err));
                return;
            }
        };
        debug!("readdir {path}: {} entries", children.len());

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for stat in &children {
            let child_path = join_path(&path, &stat.name);
            let child_ino = self.intern(&child_path, stat.clone());
            let kind = if stat.is_dir { FileType::Directory } else { FileType::RegularFile };
            entries.push((child_ino, kind, stat.name.clone()));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(node) = self.nodes.get(&ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if node.stat.is_dir {
            reply.error(libc::EISDIR);
            return;
        }
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open_files.insert(
            fh,
            OpenFile { path: node.path.clone(), etag: node.stat.etag.clone(), size: node.stat.size },
        );
        reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(open) = self.open_files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let offset = offset as u64;
        if offset >= open.size || size == 0 {
            reply.data(&[]);
            return;
        }
        let length = (size as u64).min(open.size - offset);

        let ctx = Context::new();
        let local_path = match self.engine.prepare_for_read(&ctx, &open.path, &open.etag, offset, length, open.size) {
            Ok(path) => path,
            Err(err) => {
                reply.error(map_error(&err));
                return;
            }
        };

        match read_local_range(&local_path, offset, length) {
            Ok(data) => reply.data(&data),
            Err(err) => {
                warn!("read {}: local read failed: {err}", open.path);
                reply.error(err.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    fn release(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        self.open_files.remove(&fh);
        reply.ok();
    }

    fn create(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, _flags: i32, reply: fuser::ReplyCreate) {
        reply.error(libc::EROFS);
    }

    fn mkdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        reply.error(libc::EROFS);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rename(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _newparent: u64, _newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn write(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _offset: i64, _data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: fuser::ReplyWrite) {
        reply.error(libc::EROFS);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // read-only mount: report current attrs rather than rejecting, so
        // tools that chmod/touch defensively (e.g. some editors) don't
        // hard-fail on an otherwise successful open.
        self.getattr(_req, ino, _fh, reply);
    }
}

fn read_local_range(path: &std::path::Path, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
