//! Main-thread work dispatcher.
//!
//! Background threads hand work to one consumer thread, which runs it in
//! submission order once per host tick.
//!
//! # Architecture
//!
//! ```text
//! producer threads                         consumer thread
//! ----------------                         ---------------
//! Dispatcher::submit ──┐
//! Dispatcher::call   ──┼─> Mutex<Vec<WorkItem>> ──swap──> HostContext::tick()
//! submit_suspendable ──┘                                    │
//!                                                           ├─ Immediate   -> run now
//!                                                           └─ Suspendable -> TaskScheduler
//! ```
//!
//! - [`Dispatcher`]: cloneable producer handle around the shared queue.
//!   [`Dispatcher::instance`] exposes a lazily created process-wide one.
//! - [`HostContext`]: the single consumer. `!Send`, owns the
//!   [`TaskScheduler`], and tears the dispatcher down when dropped.
//! - [`TaskScheduler`]: cooperative executor for suspendable work; tasks
//!   suspend with [`yield_now`] / [`sleep_ticks`] or any waker-driven future.
//!
//! # Teardown
//!
//! Dropping the [`HostContext`] closes its dispatcher. Work still queued at
//! that point is dropped without running and submissions made afterwards
//! fail with [`SubmitError::Closed`]. Pending [`Dispatcher::call`] replies
//! observe the drop as a closed channel.

mod dispatcher;
mod global;
mod host;
mod scheduler;
mod work;

pub use dispatcher::{
    DEFAULT_LARGE_BATCH_WARN, Dispatcher, DispatcherOptions, DispatcherStats, SubmitError,
};
pub use host::{HostContext, HostError, TickReport};
pub use scheduler::{
    ResumeReport, SleepTicks, Started, TaskId, TaskScheduler, sleep_ticks, yield_now,
};
pub use work::{WorkItem, WorkKind};
