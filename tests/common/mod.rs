//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use handoff_core::{Dispatcher, DispatcherOptions, HostContext};

static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

/// Serialize tests that touch the process-wide dispatcher.
pub fn global_lock() -> MutexGuard<'static, ()> {
    GLOBAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A host bound to a private dispatcher, independent of the global slot.
pub fn fresh_host() -> HostContext {
    HostContext::new(Dispatcher::new(DispatcherOptions::default())).expect("fresh dispatcher")
}

/// Tear down whatever global dispatcher a previous test left behind.
pub fn reset_global() {
    if let Some(existing) = Dispatcher::current()
        && let Ok(host) = HostContext::new(existing)
    {
        drop(host);
    }
}

/// Shared append-only log that work items can push into from any thread.
#[derive(Clone)]
pub struct Recorder<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.entries.lock().expect("recorder lock").push(value);
    }

    /// A callback that appends `value` when run.
    pub fn pusher(&self, value: T) -> impl FnOnce() + Send + 'static {
        let recorder = self.clone();
        move || recorder.push(value)
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().expect("recorder lock").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("recorder lock").len()
    }
}

/// Tick until `done` holds, giving up after `max_ticks`.
pub fn tick_until(
    host: &mut HostContext,
    max_ticks: usize,
    mut done: impl FnMut() -> bool,
) -> bool {
    for _ in 0..max_ticks {
        if done() {
            return true;
        }
        host.tick();
        thread::yield_now();
    }
    done()
}
