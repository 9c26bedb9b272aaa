//! Producer-facing half of the dispatcher: the shared queue.
//!
//! The queue is a mutex-guarded double buffer. Producers append under the
//! lock; the consumer swaps the whole buffer out under the lock and runs the
//! batch after releasing it, so no lock is ever held across user code.

use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::global;
use crate::work::WorkItem;

/// Default drain size above which a tick logs a warning.
pub const DEFAULT_LARGE_BATCH_WARN: usize = 1024;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Log a warning when a single item runs longer than this.
    pub slow_item_warn: Option<Duration>,
    /// Log a warning when one drain takes more items than this.
    pub large_batch_warn: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            slow_item_warn: None,
            large_batch_warn: DEFAULT_LARGE_BATCH_WARN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("dispatcher {0} has been torn down; work item rejected")]
    Closed(u64),
}

/// Cumulative counters for one dispatcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub executed: u64,
    pub failed: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Queue {
    items: Vec<WorkItem>,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

struct Shared {
    id: u64,
    options: DispatcherOptions,
    queue: Mutex<Queue>,
    hosted: AtomicBool,
    counters: Counters,
}

/// Handle to a work queue drained by a single [`HostContext`](crate::HostContext).
///
/// Cloning is cheap and every clone refers to the same queue, so the handle
/// can be passed to as many producer threads as needed.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(options: DispatcherOptions) -> Self {
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(dispatcher = id, ?options, "Dispatcher created");
        Self {
            shared: Arc::new(Shared {
                id,
                options,
                queue: Mutex::new(Queue::default()),
                hosted: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// The process-wide dispatcher, created with default options on first
    /// access.
    ///
    /// Creation is guarded by a mutex, so concurrent first callers all get
    /// the same instance. Once the hosting context is dropped the slot is
    /// cleared and the next call builds a fresh dispatcher.
    #[must_use]
    pub fn instance() -> Self {
        global::instance()
    }

    /// The process-wide dispatcher if one is live, without creating it.
    #[must_use]
    pub fn current() -> Option<Self> {
        global::current()
    }

    /// Make this dispatcher the process-wide instance.
    ///
    /// Returns `false` and leaves the slot untouched if another live
    /// instance is already installed.
    pub fn install_global(&self) -> bool {
        global::install(self)
    }

    /// Queue a callback to run on the consumer thread during the next tick.
    pub fn submit<F>(&self, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(WorkItem::immediate(f))
    }

    /// Queue a callback whose error is logged and counted as a failure.
    pub fn submit_fallible<F>(&self, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue(WorkItem::fallible(f))
    }

    /// Queue a cooperative task. `factory` runs on the consumer thread when
    /// the item is drained and the future it returns is started there.
    pub fn submit_suspendable<F, Fut>(&self, factory: F) -> Result<(), SubmitError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.enqueue(WorkItem::suspendable(factory))
    }

    /// Run `f` on the consumer thread and receive its result.
    ///
    /// The receiver reports an error if the item is discarded at teardown or
    /// `f` panics.
    pub fn call<F, T>(&self, f: F) -> Result<oneshot::Receiver<T>, SubmitError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            // The caller may have stopped waiting.
            let _ = tx.send(f());
        })?;
        Ok(rx)
    }

    pub fn enqueue(&self, item: WorkItem) -> Result<(), SubmitError> {
        let mut queue = self.lock_queue();
        if queue.closed {
            drop(queue);
            tracing::debug!(
                dispatcher = self.shared.id,
                kind = ?item.kind(),
                "Rejected work item after teardown"
            );
            return Err(SubmitError::Closed(self.shared.id));
        }
        queue.items.push(item);
        drop(queue);
        self.shared
            .counters
            .submitted
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Items waiting for the next tick.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_queue().items.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_queue().closed
    }

    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.shared.counters;
        DispatcherStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            executed: counters.executed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[must_use]
    pub fn options(&self) -> DispatcherOptions {
        self.shared.options
    }

    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Swap the queue for an empty one and hand back everything it held.
    pub(crate) fn take_batch(&self) -> Vec<WorkItem> {
        mem::take(&mut self.lock_queue().items)
    }

    /// Reject further submissions and drop everything still queued.
    ///
    /// Returns the number of discarded items. Dropping a discarded
    /// [`call`](Self::call) item closes its reply channel, which is the only
    /// signal producers receive.
    pub(crate) fn close(&self) -> usize {
        let discarded = {
            let mut queue = self.lock_queue();
            queue.closed = true;
            mem::take(&mut queue.items)
        };
        let count = discarded.len();
        drop(discarded);

        self.shared
            .counters
            .discarded
            .fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            tracing::warn!(
                dispatcher = self.shared.id,
                discarded = count,
                "Dispatcher torn down with pending work; items dropped"
            );
        } else {
            tracing::debug!(dispatcher = self.shared.id, "Dispatcher torn down");
        }
        count
    }

    pub(crate) fn claim_host(&self) -> bool {
        self.shared
            .hosted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn record_executed(&self) {
        self.shared
            .counters
            .executed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    // Every critical section leaves the queue consistent, so a poisoned lock
    // is still safe to use.
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.shared.id)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}
