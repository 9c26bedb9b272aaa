//! Consumer-side half of the dispatcher.
//!
//! A [`HostContext`] is the single consumer of one [`Dispatcher`]. The host's
//! own loop calls [`HostContext::tick`] once per time step:
//!
//! 1. Resume suspended tasks that were woken since the previous tick
//! 2. Swap the dispatcher queue out under its lock
//! 3. Run the batch in order with the lock released
//!
//! Tasks started in step 3 therefore see their first resume on the next tick.
//! Dropping the context tears the dispatcher down.

use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;

use crate::dispatcher::Dispatcher;
use crate::global;
use crate::scheduler::{Started, TaskScheduler};
use crate::work::{WorkItem, panic_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("dispatcher {0} is already bound to a host context")]
    AlreadyHosted(u64),
    #[error("dispatcher {0} has been torn down")]
    Closed(u64),
}

/// What one [`HostContext::tick`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Drained items that ran (or started) without failing.
    pub executed: usize,
    /// Drained items that panicked or returned an error.
    pub failed: usize,
    pub tasks_started: usize,
    pub tasks_resumed: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    /// Suspended tasks still owned by the scheduler after this tick.
    pub tasks_live: usize,
    /// Items that ran past `DispatcherOptions::slow_item_warn`.
    pub slow_items: usize,
    /// The drained batch exceeded `DispatcherOptions::large_batch_warn`.
    pub large_batch: bool,
}

impl TickReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.executed == 0 && self.failed == 0 && self.tasks_resumed == 0
    }
}

/// The consumer thread's binding to a dispatcher.
///
/// `!Send`: the thread that builds the context is the only one that can
/// drain the queue, so a dispatcher never has two consumers.
pub struct HostContext {
    dispatcher: Dispatcher,
    scheduler: TaskScheduler,
    ticks: u64,
    _consumer: PhantomData<Rc<()>>,
}

impl HostContext {
    pub fn new(dispatcher: Dispatcher) -> Result<Self, HostError> {
        if dispatcher.is_closed() {
            return Err(HostError::Closed(dispatcher.id()));
        }
        if !dispatcher.claim_host() {
            return Err(HostError::AlreadyHosted(dispatcher.id()));
        }
        tracing::debug!(dispatcher = dispatcher.id(), "Host context bound");
        Ok(Self {
            dispatcher,
            scheduler: TaskScheduler::new(),
            ticks: 0,
            _consumer: PhantomData,
        })
    }

    /// Bind to the process-wide dispatcher, creating it if needed.
    pub fn attach_global() -> Result<Self, HostError> {
        Self::new(Dispatcher::instance())
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The cooperative scheduler, for host-owned tasks that do not go
    /// through the queue.
    pub fn scheduler_mut(&mut self) -> &mut TaskScheduler {
        &mut self.scheduler
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let resumed = self.scheduler.resume();
        let mut report = TickReport {
            tick: self.ticks,
            tasks_resumed: resumed.resumed,
            tasks_completed: resumed.completed,
            tasks_failed: resumed.failed,
            ..TickReport::default()
        };

        let batch = self.dispatcher.take_batch();
        let options = self.dispatcher.options();
        if batch.len() > options.large_batch_warn {
            report.large_batch = true;
            tracing::warn!(
                dispatcher = self.dispatcher.id(),
                tick = self.ticks,
                items = batch.len(),
                threshold = options.large_batch_warn,
                "Large dispatch batch"
            );
        }

        for item in batch {
            let kind = item.kind();
            let started_at = Instant::now();
            self.run_item(item, &mut report);

            let elapsed = started_at.elapsed();
            if let Some(limit) = options.slow_item_warn
                && elapsed > limit
            {
                report.slow_items += 1;
                tracing::warn!(
                    tick = self.ticks,
                    ?kind,
                    elapsed_ms = elapsed.as_millis(),
                    limit_ms = limit.as_millis(),
                    "Slow work item"
                );
            }
        }

        report.tasks_live = self.scheduler.live();
        if !report.is_idle() {
            tracing::debug!(
                tick = report.tick,
                executed = report.executed,
                failed = report.failed,
                tasks_live = report.tasks_live,
                "Tick drained"
            );
        }
        report
    }

    fn run_item(&mut self, item: WorkItem, report: &mut TickReport) {
        let outcome = match item {
            WorkItem::Immediate(f) => match catch_unwind(AssertUnwindSafe(f)) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
            },
            WorkItem::Suspendable(factory) => match catch_unwind(AssertUnwindSafe(factory)) {
                Ok(future) => match self.scheduler.start(future) {
                    Started::Completed => {
                        report.tasks_started += 1;
                        report.tasks_completed += 1;
                        Ok(())
                    }
                    Started::Suspended(_) => {
                        report.tasks_started += 1;
                        Ok(())
                    }
                    Started::Panicked(message) => Err(format!("task panicked: {message}")),
                },
                Err(payload) => Err(format!(
                    "task factory panicked: {}",
                    panic_message(payload.as_ref())
                )),
            },
        };

        match outcome {
            Ok(()) => {
                report.executed += 1;
                self.dispatcher.record_executed();
            }
            Err(error) => {
                report.failed += 1;
                self.dispatcher.record_failed();
                tracing::error!(
                    dispatcher = self.dispatcher.id(),
                    tick = self.ticks,
                    %error,
                    "Work item failed"
                );
            }
        }
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.dispatcher.close();
        global::clear(&self.dispatcher);
        tracing::debug!(
            dispatcher = self.dispatcher.id(),
            ticks = self.ticks,
            abandoned_tasks = self.scheduler.live(),
            "Host context dropped"
        );
    }
}
