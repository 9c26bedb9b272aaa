//! Queue ordering, isolation and exactly-once delivery across threads.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;

use crate::common::{Recorder, fresh_host, tick_until};

#[test]
fn three_callbacks_run_in_order_on_one_tick() {
    let mut host = fresh_host();
    let log = Recorder::new();

    for value in [1, 2, 3] {
        host.dispatcher().submit(log.pusher(value)).expect("submit");
    }
    host.tick();

    assert_eq!(log.snapshot(), vec![1, 2, 3]);
}

#[test]
fn failures_in_the_middle_leave_neighbours_intact() {
    let mut host = fresh_host();
    let log = Recorder::new();
    let dispatcher = host.dispatcher().clone();

    dispatcher.submit(log.pusher("w1")).expect("submit");
    dispatcher
        .submit_fallible(|| Err(anyhow!("w2 failed")))
        .expect("submit");
    dispatcher.submit(log.pusher("w3")).expect("submit");

    let report = host.tick();
    host.tick();

    assert_eq!(log.snapshot(), vec!["w1", "w3"]);
    assert_eq!(report.executed, 2);
    assert_eq!(report.failed, 1);
}

#[test]
fn nothing_runs_until_the_host_ticks() {
    let host = fresh_host();
    let log = Recorder::new();
    host.dispatcher().submit(log.pusher(1)).expect("submit");

    thread::sleep(Duration::from_millis(10));

    assert!(log.snapshot().is_empty());
    assert_eq!(host.dispatcher().pending(), 1);
}

#[test]
fn items_run_on_the_consumer_thread() {
    let mut host = fresh_host();
    let consumer = thread::current().id();
    let seen = Recorder::new();

    let dispatcher = host.dispatcher().clone();
    let recorder = seen.clone();
    thread::spawn(move || {
        dispatcher
            .submit(move || recorder.push(thread::current().id()))
            .expect("submit");
    })
    .join()
    .expect("producer thread");

    host.tick();
    assert_eq!(seen.snapshot(), vec![consumer]);
}

#[test]
fn each_producer_sees_its_own_order_preserved() {
    const PRODUCERS: usize = 4;
    const ITEMS: usize = 200;

    let mut host = fresh_host();
    let log = Recorder::new();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let dispatcher = host.dispatcher().clone();
            let log = log.clone();
            thread::spawn(move || {
                for seq in 0..ITEMS {
                    dispatcher.submit(log.pusher((producer, seq))).expect("submit");
                }
            })
        })
        .collect();

    // Drain while the producers are still racing each other.
    while handles.iter().any(|handle| !handle.is_finished()) {
        host.tick();
    }
    for handle in handles {
        handle.join().expect("producer thread");
    }
    assert!(tick_until(&mut host, 10, || log.len() == PRODUCERS * ITEMS));

    let mut next_expected: HashMap<usize, usize> = HashMap::new();
    for (producer, seq) in log.snapshot() {
        let expected = next_expected.entry(producer).or_default();
        assert_eq!(seq, *expected, "producer {producer} out of order");
        *expected += 1;
    }
    assert!(next_expected.values().all(|&count| count == ITEMS));
    assert_eq!(
        host.dispatcher().stats().executed,
        (PRODUCERS * ITEMS) as u64
    );
}

#[tokio::test]
async fn async_producer_awaits_reply_from_consumer() {
    let mut host = fresh_host();
    let dispatcher = host.dispatcher().clone();

    let producer = tokio::spawn(async move {
        let reply = dispatcher.call(|| "from main").expect("submit");
        reply.await.expect("consumer replied")
    });

    while !producer.is_finished() {
        host.tick();
        tokio::task::yield_now().await;
    }

    assert_eq!(producer.await.expect("producer task"), "from main");
}

#[test]
fn panicking_call_closes_reply_channel() {
    let mut host = fresh_host();
    let reply = host
        .dispatcher()
        .call(|| -> u32 { panic!("no answer") })
        .expect("submit");

    let report = host.tick();

    assert_eq!(report.failed, 1);
    assert!(reply.blocking_recv().is_err());
}
