//! Thin local-socket RPC server (§6/§10): `GetStats`, `GetStatus`, and
//! `Invalidate(path)`, the latter also asking the kernel adapter to drop
//! its cached dentry for the invalidated path.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use fuser::Notifier;
use log::warn;
use serde::{Deserialize, Serialize};

use rangefs_cache::{Engine, InFlightOp, StatsSnapshot};
use rangefs_fuse::InodeIndex;

#[derive(Debug, Deserialize)]
#[serde(tag = "method")]
enum RpcRequest {
    GetStats,
    GetStatus,
    Invalidate { path: String },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RpcResponse {
    Stats(StatsSnapshot),
    Status(Vec<InFlightOp>),
    Invalidated { path: String },
    Error { error: String },
}

pub struct ControlPlane {
    engine: Arc<Engine>,
    index: InodeIndex,
    notifier: Notifier,
}

impl ControlPlane {
    pub fn new(engine: Arc<Engine>, index: InodeIndex, notifier: Notifier) -> Self {
        Self { engine, index, notifier }
    }

    /// Binds `socket_path` and serves requests on a background thread
    /// (one further thread per connected client) until the process exits.
    pub fn serve(self: Arc<Self>, socket_path: &Path) -> std::io::Result<thread::JoinHandle<()>> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        Ok(thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let this = Arc::clone(&self);
                        thread::spawn(move || this.handle_client(stream));
                    }
                    Err(err) => warn!("control socket accept failed: {err}"),
                }
            }
        }))
    }

    fn handle_client(&self, stream: UnixStream) {
        let reader = match stream.try_clone() {
            Ok(s) => BufReader::new(s),
            Err(err) => {
                warn!("control socket: failed to clone stream: {err}");
                return;
            }
        };
        let mut writer = stream;
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(req) => self.dispatch(req),
                Err(err) => RpcResponse::Error { error: err.to_string() },
            };
            let mut payload = serde_json::to_string(&response).unwrap_or_else(|_| "{\"error\":\"encode failure\"}".to_string());
            payload.push('\n');
            if writer.write_all(payload.as_bytes()).is_err() {
                break;
            }
        }
    }

    fn dispatch(&self, req: RpcRequest) -> RpcResponse {
        match req {
            RpcRequest::GetStats => RpcResponse::Stats(self.engine.tracker().stats().snapshot()),
            RpcRequest::GetStatus => RpcResponse::Status(self.engine.tracker().snapshot()),
            RpcRequest::Invalidate { path } => match self.engine.invalidate(&path) {
                Ok(()) => {
                    self.notify_kernel(&path);
                    RpcResponse::Invalidated { path }
                }
                Err(err) => RpcResponse::Error { error: err.to_string() },
            },
        }
    }

    /// Drop the kernel's cached dentry for `path`, if it has ever been
    /// looked up. Nothing to do for paths the kernel never interned.
    fn notify_kernel(&self, path: &str) {
        let Some((parent, name)) = split_parent(path) else { return };
        let Some(parent_ino) = self.index.lookup(&parent) else { return };
        if let Err(err) = self.notifier.inval_entry(parent_ino, std::ffi::OsStr::new(&name)) {
            warn!("kernel cache invalidation for {path} failed: {err}");
        }
    }
}

fn split_parent(path: &str) -> Option<(String, String)> {
    if path == "/" {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let parent = if idx == 0 { "/".to_string() } else { trimmed[..idx].to_string() };
    let name = trimmed[idx + 1..].to_string();
    Some((parent, name))
}
