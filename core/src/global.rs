//! Process-wide dispatcher slot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dispatcher::{Dispatcher, DispatcherOptions};

static GLOBAL: Mutex<Option<Dispatcher>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Dispatcher>> {
    GLOBAL.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn instance() -> Dispatcher {
    let mut slot = slot();
    if let Some(existing) = slot.as_ref()
        && !existing.is_closed()
    {
        return existing.clone();
    }
    let dispatcher = Dispatcher::new(DispatcherOptions::default());
    tracing::debug!(dispatcher = dispatcher.id(), "Global dispatcher installed");
    *slot = Some(dispatcher.clone());
    dispatcher
}

pub(crate) fn current() -> Option<Dispatcher> {
    slot().as_ref().filter(|d| !d.is_closed()).cloned()
}

pub(crate) fn install(dispatcher: &Dispatcher) -> bool {
    let mut slot = slot();
    match slot.as_ref() {
        Some(existing) if existing.same_instance(dispatcher) => true,
        Some(existing) if !existing.is_closed() => false,
        _ => {
            *slot = Some(dispatcher.clone());
            true
        }
    }
}

/// Empty the slot if it still holds `dispatcher`.
pub(crate) fn clear(dispatcher: &Dispatcher) {
    let mut slot = slot();
    if slot.as_ref().is_some_and(|d| d.same_instance(dispatcher)) {
        *slot = None;
        tracing::debug!(dispatcher = dispatcher.id(), "Global dispatcher cleared");
    }
}
