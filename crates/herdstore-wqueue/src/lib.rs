//! Herdstore Work-Queue Engine
//!
//! Elastic, named worker pools with cross-thread completion delivery:
//! - Work items carry a `run` step executed on a pool thread and a `done`
//!   step delivered on the single process completion thread
//! - Pool size follows load under three policies (ordered, dynamic,
//!   unlimited), damped by a one-second protection period
//! - Finished items are announced through one shared eventfd registered
//!   with the host event loop

pub mod engine;
pub mod eventfd;
pub mod queue;

pub use engine::{
    EventLoop, Membership, NoopTracer, StaticMembership, ThreadTracer, WorkQueueEngine,
};
pub use eventfd::CompletionFd;
pub use queue::{completion, work, ThreadControl, WorkItem, WorkQueue, WQ_PROTECTION_PERIOD};
