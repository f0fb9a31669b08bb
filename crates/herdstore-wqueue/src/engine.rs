//! Engine context and collaborator traits
//!
//! The engine owns what would otherwise be process globals: the shared
//! completion eventfd and the registry of live queues the completion
//! callback walks. It also carries the two collaborators queue workers
//! consult, the cluster membership view (for dynamic thread roofs) and
//! the thread tracer.

use crate::eventfd::CompletionFd;
use crate::queue::{ThreadControl, WorkQueue, WorkerInfo};
use parking_lot::Mutex;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::warn;

/// Cluster membership view
pub trait Membership: Send + Sync {
    /// Number of nodes currently in the cluster
    fn nr_nodes(&self) -> usize;
}

/// Fixed-size membership for standalone daemons and tests
pub struct StaticMembership {
    nr: usize,
}

impl StaticMembership {
    #[must_use]
    pub const fn new(nr: usize) -> Self {
        Self { nr }
    }
}

impl Membership for StaticMembership {
    fn nr_nodes(&self) -> usize {
        self.nr
    }
}

/// Worker-thread tracer.
///
/// Every worker is registered before it runs a user item and unregistered
/// when it exits on shrink.
pub trait ThreadTracer: Send + Sync {
    fn register_thread(&self, id: ThreadId);
    fn unregister_thread(&self, id: ThreadId);
}

/// Tracer used when tracing is disabled
#[derive(Default)]
pub struct NoopTracer;

impl ThreadTracer for NoopTracer {
    fn register_thread(&self, _id: ThreadId) {}
    fn unregister_thread(&self, _id: ThreadId) {}
}

/// Host event loop the completion fd is registered with
pub trait EventLoop {
    /// Register `fd` for readability. `callback` runs on the loop thread
    /// whenever the descriptor becomes readable.
    fn register_event(&self, fd: RawFd, callback: Box<dyn Fn() + Send + Sync>) -> io::Result<()>;
}

/// Owner of the completion channel and the live-queue registry
pub struct WorkQueueEngine {
    efd: Arc<CompletionFd>,
    queues: Mutex<Vec<Arc<WorkerInfo>>>,
    membership: Arc<dyn Membership>,
    tracer: Arc<dyn ThreadTracer>,
}

impl WorkQueueEngine {
    /// Create the engine and its completion eventfd
    pub fn new(
        membership: Arc<dyn Membership>,
        tracer: Arc<dyn ThreadTracer>,
    ) -> io::Result<Self> {
        Ok(Self {
            efd: Arc::new(CompletionFd::new()?),
            queues: Mutex::new(Vec::new()),
            membership,
            tracer,
        })
    }

    /// Create a named queue with one initial worker.
    ///
    /// Fails only when the initial worker thread cannot be spawned; the
    /// partially initialized queue is discarded in that case.
    pub fn new_queue(&self, name: &str, policy: ThreadControl) -> io::Result<WorkQueue> {
        let wi = Arc::new(WorkerInfo::new(
            name,
            policy,
            Arc::clone(&self.efd),
            Arc::clone(&self.membership),
            Arc::clone(&self.tracer),
        ));
        {
            let mut p = wi.pending.lock();
            wi.spawn_workers(&mut p, 1)?;
        }
        self.queues.lock().push(Arc::clone(&wi));
        Ok(WorkQueue { wi })
    }

    /// Create a queue that executes items strictly serially in submission
    /// order
    pub fn ordered_queue(&self, name: &str) -> io::Result<WorkQueue> {
        self.new_queue(name, ThreadControl::Ordered)
    }

    /// Raw completion descriptor, for registration with the host event
    /// loop
    #[must_use]
    pub fn completion_fd(&self) -> RawFd {
        self.efd.as_raw_fd()
    }

    /// Drain the completion eventfd and deliver every finished item.
    ///
    /// The caller's thread is the process completion thread: `done` steps
    /// of all queues run here, in per-queue FIFO order.
    pub fn dispatch_completions(&self) {
        if let Err(err) = self.efd.drain() {
            warn!(%err, "failed to read the completion fd");
            return;
        }

        // snapshot the registry so a done step may create queues
        let queues: Vec<_> = self.queues.lock().clone();
        for wi in queues {
            let batch = std::mem::take(&mut *wi.finished.lock());
            for item in batch {
                item.done();
            }
        }
    }

    /// Register the completion channel with the host event loop
    pub fn register_with(self: &Arc<Self>, event_loop: &dyn EventLoop) -> io::Result<()> {
        let engine = Arc::clone(self);
        event_loop.register_event(
            self.completion_fd(),
            Box::new(move || engine.dispatch_completions()),
        )
    }
}
