//! Cooperative scheduler for suspendable work.
//!
//! Tasks are plain futures polled on the consumer thread. A task suspends at
//! each `.await` that returns `Pending` and is polled again on the first
//! [`TaskScheduler::resume`] pass after its waker fires. Wakers only flip a
//! flag, so they may be triggered from any thread (a producer completing a
//! channel send, for example) without touching the task itself.
//!
//! ```text
//! start(task) -> poll once -> Ready    => dropped
//!                          -> Pending  => parked until woken
//! resume()    -> poll every woken task exactly once
//! ```

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use futures_util::task::{ArcWake, waker_ref};

use crate::work::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Result of starting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Started {
    /// Ran to completion during its first poll.
    Completed,
    /// Reached a suspension point and is now owned by the scheduler.
    Suspended(TaskId),
    /// Panicked during its first poll and was dropped.
    Panicked(String),
}

/// Counters from one [`TaskScheduler::resume`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct WakeFlag {
    woken: AtomicBool,
}

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
    }
}

struct Task {
    id: TaskId,
    future: LocalBoxFuture<'static, ()>,
    wake: Arc<WakeFlag>,
}

impl Task {
    fn poll(&mut self) -> Poll<Result<(), String>> {
        let waker = waker_ref(&self.wake);
        let mut cx = Context::from_waker(&waker);
        let future = &mut self.future;
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(())) => Poll::Ready(Ok(())),
            Err(payload) => Poll::Ready(Err(panic_message(payload.as_ref()))),
        }
    }
}

/// Single-threaded executor that drives suspendable work forward.
///
/// Owned by the [`HostContext`](crate::HostContext); the boxed futures it
/// holds are `!Send`, so the scheduler never leaves the consumer thread.
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Vec<Task>,
    next_id: u64,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task on the current thread, polling it once immediately.
    pub fn spawn_local<F>(&mut self, future: F) -> Started
    where
        F: Future<Output = ()> + 'static,
    {
        self.start(future.boxed_local())
    }

    pub(crate) fn start(&mut self, future: LocalBoxFuture<'static, ()>) -> Started {
        self.next_id += 1;
        let mut task = Task {
            id: TaskId(self.next_id),
            future,
            wake: Arc::new(WakeFlag::default()),
        };

        match task.poll() {
            Poll::Ready(Ok(())) => Started::Completed,
            Poll::Ready(Err(message)) => {
                tracing::error!(task = task.id.0, panic = %message, "Task panicked on start");
                Started::Panicked(message)
            }
            Poll::Pending => {
                let id = task.id;
                self.tasks.push(task);
                Started::Suspended(id)
            }
        }
    }

    /// Poll every task whose waker fired since its last poll, once each.
    ///
    /// A task that wakes itself while being polled (see [`yield_now`]) is
    /// not polled again until the next pass.
    pub fn resume(&mut self) -> ResumeReport {
        let mut report = ResumeReport::default();
        self.tasks.retain_mut(|task| {
            if !task.wake.woken.swap(false, Ordering::AcqRel) {
                return true;
            }
            report.resumed += 1;
            match task.poll() {
                Poll::Pending => true,
                Poll::Ready(Ok(())) => {
                    report.completed += 1;
                    false
                }
                Poll::Ready(Err(message)) => {
                    report.failed += 1;
                    tracing::error!(
                        task = task.id.0,
                        panic = %message,
                        "Task panicked while resuming"
                    );
                    false
                }
            }
        });
        report
    }

    /// Number of suspended tasks still owned by the scheduler.
    #[must_use]
    pub fn live(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_live(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|task| task.id == id)
    }
}

/// Suspend until the next scheduler pass.
#[must_use]
pub fn yield_now() -> SleepTicks {
    sleep_ticks(1)
}

/// Suspend for `passes` scheduler passes. Zero completes immediately.
#[must_use]
pub fn sleep_ticks(passes: u32) -> SleepTicks {
    SleepTicks { remaining: passes }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct SleepTicks {
    remaining: u32,
}

impl Future for SleepTicks {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.remaining == 0 {
            return Poll::Ready(());
        }
        self.remaining -= 1;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
