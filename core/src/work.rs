//! Units of work handed from producer threads to the consumer thread.

use std::any::Any;
use std::fmt;
use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;

type ImmediateFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type TaskFactory = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

/// A unit of deferred work queued on a [`Dispatcher`](crate::Dispatcher).
///
/// Both variants are `Send` so any thread can build and submit them. The
/// future produced by a [`WorkItem::Suspendable`] factory is only ever
/// created and polled on the consumer thread, so it does not need to be
/// `Send` itself.
pub enum WorkItem {
    /// Runs to completion synchronously when drained.
    Immediate(ImmediateFn),
    /// Builds a cooperative task that is started when drained and resumed by
    /// the [`TaskScheduler`](crate::TaskScheduler) on later passes.
    Suspendable(TaskFactory),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Immediate,
    Suspendable,
}

impl WorkItem {
    pub fn immediate<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::Immediate(Box::new(move || {
            f();
            Ok(())
        }))
    }

    pub fn fallible<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::Immediate(Box::new(f))
    }

    pub fn suspendable<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Self::Suspendable(Box::new(move || factory().boxed_local()))
    }

    #[must_use]
    pub fn kind(&self) -> WorkKind {
        match self {
            Self::Immediate(_) => WorkKind::Immediate,
            Self::Suspendable(_) => WorkKind::Suspendable,
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkItem").field(&self.kind()).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
