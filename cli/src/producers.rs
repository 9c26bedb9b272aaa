//! Background producer threads for the demo host.
//!
//! Each producer cycles through every submission style the dispatcher
//! offers and exits once it is told to stop or the dispatcher is torn down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::bail;
use handoff_core::{Dispatcher, SubmitError, sleep_ticks};

use crate::board::{Board, with_board};

const TASK_STEPS: u32 = 3;
const TASK_STEP_TICKS: u32 = 2;

pub fn spawn(
    dispatcher: &Dispatcher,
    count: usize,
    pace: Duration,
    stop: &Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let dispatcher = dispatcher.clone();
            let stop = Arc::clone(stop);
            thread::Builder::new()
                .name(format!("producer-{id}"))
                .spawn(move || run(id, &dispatcher, pace, &stop))
        })
        .filter_map(|spawned| match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!("Failed to spawn producer thread: {err}");
                None
            }
        })
        .collect()
}

fn run(id: usize, dispatcher: &Dispatcher, pace: Duration, stop: &AtomicBool) {
    let mut round: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        round += 1;
        if let Err(err) = submit_round(id, round, dispatcher) {
            tracing::debug!(producer = id, %err, "Producer exiting");
            return;
        }
        thread::sleep(pace);
    }
    tracing::debug!(producer = id, rounds = round, "Producer stopped");
}

fn submit_round(id: usize, round: u64, dispatcher: &Dispatcher) -> Result<(), SubmitError> {
    match round % 4 {
        0 => dispatcher.submit(move || with_board(|board| board.record_update(id))),
        1 => dispatcher.submit_fallible(move || {
            if round % 10 == 5 {
                bail!("producer {id} round {round}: simulated failure");
            }
            with_board(|board| board.record_update(id));
            Ok(())
        }),
        2 => {
            let reply = dispatcher.call(|| with_board(|board| board.total_updates()))?;
            // Blocks this producer only; the consumer answers on its next tick.
            match reply.blocking_recv() {
                Ok(total) => tracing::trace!(producer = id, total, "Board total"),
                Err(_) => tracing::debug!(producer = id, "Reply dropped at teardown"),
            }
            Ok(())
        }
        _ => dispatcher.submit_suspendable(move || async move {
            for _ in 0..TASK_STEPS {
                with_board(Board::record_task_step);
                sleep_ticks(TASK_STEP_TICKS).await;
            }
            tracing::trace!(producer = id, round, "Task finished");
        }),
    }
}
