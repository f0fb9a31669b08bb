//! Elastic worker pools
//!
//! Each queue owns a named set of worker threads that grows and shrinks
//! with load. Submitted work items carry a `run` step, executed on a pool
//! thread with no queue lock held, and a `done` step, delivered later on
//! the process completion thread. Pool size is bounded by the queue's
//! thread-control policy and damped by a two-sided one-second protection
//! period so bursty load cannot thrash thread creation.

use crate::engine::{Membership, ThreadTracer};
use crate::eventfd::CompletionFd;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Protection period against shrinking a pool. Without it, threads are
/// frequently created and destroyed under bursty load, which performs
/// poorly.
pub const WQ_PROTECTION_PERIOD: Duration = Duration::from_millis(1000);

const PROTECTION_MS: u64 = WQ_PROTECTION_PERIOD.as_millis() as u64;

/// Thread-budget policy of a queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadControl {
    /// Exactly one worker; items run serially in submission order
    Ordered,
    /// At most twice the current cluster node count
    Dynamic,
    /// No roof
    Unlimited,
}

/// A unit of work submitted to a queue.
///
/// Ownership passes from the submitter to the queue on submission, and
/// back out when `done` consumes the item on the completion thread.
pub trait WorkItem: Send + 'static {
    /// Off-thread step, executed by a worker with no queue lock held.
    /// The default body does nothing, for items that only need a
    /// completion step.
    fn run(&mut self) {}

    /// Completion step, executed on the process completion thread after
    /// `run` has returned.
    fn done(self: Box<Self>);
}

struct FnWork<R, D> {
    run: Option<R>,
    done: Option<D>,
}

impl<R, D> WorkItem for FnWork<R, D>
where
    R: FnOnce() + Send + 'static,
    D: FnOnce() + Send + 'static,
{
    fn run(&mut self) {
        if let Some(f) = self.run.take() {
            f();
        }
    }

    fn done(mut self: Box<Self>) {
        if let Some(f) = self.done.take() {
            f();
        }
    }
}

/// Build a work item from a `run` and a `done` closure
pub fn work<R, D>(run: R, done: D) -> Box<dyn WorkItem>
where
    R: FnOnce() + Send + 'static,
    D: FnOnce() + Send + 'static,
{
    Box::new(FnWork {
        run: Some(run),
        done: Some(done),
    })
}

/// Build a completion-only work item with no off-thread step
pub fn completion<D>(done: D) -> Box<dyn WorkItem>
where
    D: FnOnce() + Send + 'static,
{
    Box::new(FnWork {
        run: None::<fn()>,
        done: Some(done),
    })
}

/// Milliseconds since the epoch. Backward clock jumps merely delay
/// shrinking.
fn msec_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) struct PendingState {
    pub(crate) nr_threads: usize,
    nr_pending: usize,
    nr_running: usize,
    /// End of the shrink-protection window, in msec since the epoch
    protection_end: u64,
    list: VecDeque<Box<dyn WorkItem>>,
}

pub(crate) struct WorkerInfo {
    name: String,
    policy: ThreadControl,
    pub(crate) pending: Mutex<PendingState>,
    pending_cond: Condvar,
    pub(crate) finished: Mutex<VecDeque<Box<dyn WorkItem>>>,
    /// Serializes thread creation against the newborn worker's entry
    /// barrier, so a worker cannot observe a partially initialized queue.
    startup: Mutex<()>,
    efd: Arc<CompletionFd>,
    membership: Arc<dyn Membership>,
    tracer: Arc<dyn ThreadTracer>,
}

impl WorkerInfo {
    pub(crate) fn new(
        name: &str,
        policy: ThreadControl,
        efd: Arc<CompletionFd>,
        membership: Arc<dyn Membership>,
        tracer: Arc<dyn ThreadTracer>,
    ) -> Self {
        Self {
            name: name.to_string(),
            policy,
            pending: Mutex::new(PendingState {
                nr_threads: 0,
                nr_pending: 0,
                nr_running: 0,
                protection_end: 0,
                list: VecDeque::new(),
            }),
            pending_cond: Condvar::new(),
            finished: Mutex::new(VecDeque::new()),
            startup: Mutex::new(()),
            efd,
            membership,
            tracer,
        }
    }

    fn roof(&self) -> usize {
        match self.policy {
            ThreadControl::Ordered => 1,
            ThreadControl::Dynamic => self.membership.nr_nodes() * 2,
            ThreadControl::Unlimited => usize::MAX,
        }
    }

    fn need_grow(&self, p: &mut PendingState) -> bool {
        if p.nr_threads < p.nr_pending + p.nr_running && p.nr_threads * 2 <= self.roof() {
            p.protection_end = msec_time() + PROTECTION_MS;
            return true;
        }
        false
    }

    /// True when more than half of the workers have sat unused for the
    /// whole protection period.
    fn need_shrink(&self, p: &mut PendingState) -> bool {
        if p.nr_pending + p.nr_running <= p.nr_threads / 2 {
            // shrinking is suppressed during the protection period
            return p.protection_end <= msec_time();
        }
        // busy queue: push the end of protection out
        p.protection_end = msec_time() + PROTECTION_MS;
        false
    }

    /// Spawn workers until the pool reaches `target` threads.
    ///
    /// The startup mutex is held across every spawn; each newborn worker
    /// acquires and releases it once before touching queue state, and is
    /// registered with the tracer before it can pass that barrier.
    pub(crate) fn spawn_workers(
        self: &Arc<Self>,
        p: &mut PendingState,
        target: usize,
    ) -> io::Result<()> {
        let _startup = self.startup.lock();
        while p.nr_threads < target {
            let wi = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || worker_routine(&wi))?;
            self.tracer.register_thread(handle.thread().id());
            p.nr_threads += 1;
            debug!(queue = %self.name, nr_threads = p.nr_threads, "created worker thread");
        }
        Ok(())
    }
}

fn worker_routine(wi: &Arc<WorkerInfo>) {
    // entry barrier: wait for the creating thread to finish initialization
    drop(wi.startup.lock());

    wi.pending.lock().nr_running += 1;

    loop {
        let mut p = wi.pending.lock();

        if wi.need_shrink(&mut p) {
            p.nr_running -= 1;
            p.nr_threads -= 1;
            let nr_threads = p.nr_threads;
            let handoff = !p.list.is_empty();
            drop(p);

            wi.tracer.unregister_thread(thread::current().id());
            if handoff {
                // pass the submission wakeup we consumed to another worker
                wi.pending_cond.notify_one();
            }
            debug!(queue = %wi.name, nr_threads, "destroyed worker thread");
            return;
        }

        let Some(mut item) = p.list.pop_front() else {
            p.nr_running -= 1;
            // bounded wait so surplus workers re-evaluate the shrink
            // predicate once the protection period has run out
            let _ = wi.pending_cond.wait_for(&mut p, WQ_PROTECTION_PERIOD);
            p.nr_running += 1;
            continue;
        };
        p.nr_pending -= 1;
        drop(p);

        item.run();

        wi.finished.lock().push_back(item);
        if let Err(err) = wi.efd.notify() {
            warn!(queue = %wi.name, %err, "failed to signal the completion fd");
        }
    }
}

/// Handle to a live work queue
#[derive(Clone)]
pub struct WorkQueue {
    pub(crate) wi: Arc<WorkerInfo>,
}

impl WorkQueue {
    /// Submit a work item.
    ///
    /// Submission never fails: when the pool cannot grow, the item simply
    /// waits for an existing worker.
    pub fn queue(&self, item: Box<dyn WorkItem>) {
        let wi = &self.wi;
        let mut p = wi.pending.lock();
        p.nr_pending += 1;

        if wi.need_grow(&mut p) {
            // double the thread pool size
            let target = p.nr_threads * 2;
            if let Err(err) = wi.spawn_workers(&mut p, target) {
                warn!(queue = %wi.name, %err, "failed to grow worker pool");
            }
        }

        p.list.push_back(item);
        drop(p);

        wi.pending_cond.notify_one();
    }

    /// Name the queue was created with
    #[must_use]
    pub fn name(&self) -> &str {
        &self.wi.name
    }

    /// Current number of worker threads (diagnostic)
    #[must_use]
    pub fn nr_threads(&self) -> usize {
        self.wi.pending.lock().nr_threads
    }

    /// Number of submitted items not yet picked up by a worker (diagnostic)
    #[must_use]
    pub fn nr_pending(&self) -> usize {
        self.wi.pending.lock().nr_pending
    }
}
