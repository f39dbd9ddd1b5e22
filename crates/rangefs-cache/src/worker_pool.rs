//! Fixed-size pool of fetch workers. Each worker blocks on a shared
//! request queue and calls the backend's `prepare_for_read` for exactly
//! one block-aligned range per request, streaming bytes straight into the
//! caller-supplied writer; the engine fans a read out across however many
//! blocks the planner produced and waits for all replies before
//! committing anything.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use rangefs_models::{Connector, Context, RangeWriter, Range, Result};

/// One block fetch, carrying everything a worker needs: the writer is a
/// fresh handle onto the backing file (its own seek position, so disjoint
/// workers never race on file position), not shared with any other
/// request.
pub struct FetchRequest {
    pub path: String,
    pub etag: String,
    pub range: Range,
    pub ctx: Context,
    pub writer: Box<dyn RangeWriter>,
    pub reply: Sender<FetchResponse>,
}

pub struct FetchResponse {
    pub result: Result<Range>,
}

/// Owns the worker threads and the queue they consume from. Dropping the
/// pool closes the queue, which lets every worker thread observe
/// disconnection and exit.
pub struct WorkerPool {
    sender: Option<Sender<FetchRequest>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, connector: Arc<dyn Connector>) -> Self {
        let (sender, receiver): (Sender<FetchRequest>, Receiver<FetchRequest>) = unbounded();
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let connector = Arc::clone(&connector);
            handles.push(std::thread::spawn(move || worker_loop(receiver, connector)));
        }
        Self { sender: Some(sender), handles }
    }

    /// Submit one block fetch. Each request gets its own reply channel
    /// sized for a single send so a worker's send never blocks even if the
    /// caller is slow to collect replies.
    pub fn submit(
        &self,
        path: String,
        etag: String,
        range: Range,
        ctx: Context,
        writer: Box<dyn RangeWriter>,
    ) -> Receiver<FetchResponse> {
        let (reply, rx) = bounded(1);
        // The queue is unbounded and workers never exit mid-run, so send
        // failure here would mean every worker thread panicked.
        if let Some(sender) = &self.sender {
            let _ = sender.send(FetchRequest { path, etag, range, ctx, writer, reply });
        }
        rx
    }

}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close the queue first: workers block on `receiver.recv()`, so
        // without dropping the last sender here they'd never see
        // disconnection and `join` below would hang forever.
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(receiver: Receiver<FetchRequest>, connector: Arc<dyn Connector>) {
    while let Ok(mut req) = receiver.recv() {
        let result = run_fetch(&connector, &mut req);
        let _ = req.reply.send(FetchResponse { result });
    }
}

fn run_fetch(connector: &Arc<dyn Connector>, req: &mut FetchRequest) -> Result<Range> {
    req.ctx.check()?;
    connector.prepare_for_read(
        &req.ctx,
        &req.path,
        &req.etag,
        req.writer.as_mut(),
        req.range.offset,
        req.range.length,
        &(),
    )
}
