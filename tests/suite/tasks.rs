//! Suspendable work driven across ticks.

use std::thread;

use handoff_core::{sleep_ticks, yield_now};
use tokio::sync::oneshot;

use crate::common::{Recorder, fresh_host, tick_until};

#[test]
fn task_steps_advance_one_per_tick() {
    let mut host = fresh_host();
    let steps = Recorder::new();

    let recorder = steps.clone();
    host.dispatcher()
        .submit_suspendable(move || async move {
            for step in 0..3 {
                recorder.push(step);
                yield_now().await;
            }
        })
        .expect("submit");

    host.tick();
    assert_eq!(steps.snapshot(), vec![0]);
    host.tick();
    assert_eq!(steps.snapshot(), vec![0, 1]);
    host.tick();
    assert_eq!(steps.snapshot(), vec![0, 1, 2]);

    let last = host.tick();
    assert_eq!(last.tasks_completed, 1);
    assert_eq!(last.tasks_live, 0);
}

#[test]
fn task_waits_for_producer_signal_without_blocking_ticks() {
    let mut host = fresh_host();
    let log = Recorder::new();
    let (tx, rx) = oneshot::channel::<&'static str>();

    let recorder = log.clone();
    host.dispatcher()
        .submit_suspendable(move || async move {
            if let Ok(message) = rx.await {
                recorder.push(message);
            }
        })
        .expect("submit");
    host.dispatcher().submit(log.pusher("immediate")).expect("submit");

    host.tick();
    host.tick();
    assert_eq!(log.snapshot(), vec!["immediate"]);
    assert_eq!(host.scheduler_mut().live(), 1);

    thread::spawn(move || tx.send("signalled").expect("task waiting"))
        .join()
        .expect("signal thread");

    assert!(tick_until(&mut host, 3, || log.len() == 2));
    assert_eq!(log.snapshot(), vec!["immediate", "signalled"]);
}

#[test]
fn tasks_interleave_with_immediate_work() {
    let mut host = fresh_host();
    let log = Recorder::new();
    let dispatcher = host.dispatcher().clone();

    let recorder = log.clone();
    dispatcher
        .submit_suspendable(move || async move {
            recorder.push("task start");
            sleep_ticks(2).await;
            recorder.push("task end");
        })
        .expect("submit");
    dispatcher.submit(log.pusher("a")).expect("submit");

    host.tick();
    dispatcher.submit(log.pusher("b")).expect("submit");
    host.tick();
    dispatcher.submit(log.pusher("c")).expect("submit");
    host.tick();

    // Resumption happens before the queue drains on each tick.
    assert_eq!(
        log.snapshot(),
        vec!["task start", "a", "b", "task end", "c"]
    );
}

#[test]
fn task_submitting_more_work_defers_it_to_next_tick() {
    let mut host = fresh_host();
    let log = Recorder::new();
    let dispatcher = host.dispatcher().clone();

    let recorder = log.clone();
    let inner = dispatcher.clone();
    dispatcher
        .submit_suspendable(move || async move {
            recorder.push("task");
            inner.submit(recorder.pusher("follow-up")).expect("submit");
        })
        .expect("submit");

    let first = host.tick();
    assert_eq!(first.tasks_completed, 1);
    assert_eq!(log.snapshot(), vec!["task"]);

    host.tick();
    assert_eq!(log.snapshot(), vec!["task", "follow-up"]);
}

#[test]
fn dropping_host_abandons_suspended_tasks() {
    let mut host = fresh_host();
    let log = Recorder::new();
    let dispatcher = host.dispatcher().clone();

    let recorder = log.clone();
    dispatcher
        .submit_suspendable(move || async move {
            recorder.push("started");
            sleep_ticks(10).await;
            recorder.push("never");
        })
        .expect("submit");
    host.tick();
    drop(host);

    assert_eq!(log.snapshot(), vec!["started"]);
    assert!(dispatcher.submit_suspendable(|| async {}).is_err());
}
