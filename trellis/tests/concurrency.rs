use std::{sync::Arc, thread, time::Duration};
use trellis::{
    DispatchError, DispatcherConfig, ServiceId,
    testing::{RuntimeCall, group_properties, handler_properties, marker_payload},
};

mod common;
use common::{active_names, setup, setup_with};

#[test]
fn test_events_during_pass_coalesce() {
    const WRITERS: usize = 8;

    let (runtime, dispatcher) = setup();
    let dispatcher = Arc::new(dispatcher);
    let gate = runtime.gate_next_register();

    let first = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            dispatcher
                .add_route_group(marker_payload(), group_properties("g0", "/g0"))
                .unwrap();
        })
    };
    gate.wait_entered();

    let writers: Vec<_> = (1..=WRITERS)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                dispatcher
                    .add_route_group(
                        marker_payload(),
                        group_properties(&format!("g{i}"), &format!("/g{i}")),
                    )
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    // Every writer returned without running a pass of its own.
    assert_eq!(dispatcher.pass_count(), 0);

    gate.release();
    first.join().unwrap();

    assert_eq!(dispatcher.pass_count(), 2);
    assert_eq!(active_names(&dispatcher).len(), WRITERS + 1);
    assert_eq!(runtime.register_count(), WRITERS + 1);
}

#[test]
fn test_batch_coalesces_burst() {
    let (runtime, dispatcher) = setup();
    let batch = dispatcher.batch();
    for i in 0..5 {
        dispatcher
            .add_route_group(
                marker_payload(),
                group_properties(&format!("g{i}"), &format!("/g{i}")),
            )
            .unwrap();
    }
    dispatcher
        .add_handler(marker_payload(), handler_properties(Some("(name=g0)")))
        .unwrap();
    assert!(runtime.calls().is_empty());
    batch.flush();

    assert_eq!(dispatcher.pass_count(), 1);
    assert_eq!(runtime.register_count(), 5);
    assert!(
        runtime
            .calls()
            .iter()
            .all(|c| matches!(c, RuntimeCall::Register(_)))
    );
}

#[test]
fn test_close_times_out_while_pass_runs() {
    let (runtime, dispatcher) = setup_with(
        DispatcherConfig::default()
            .with_implicit_default(false)
            .with_shutdown_timeout(Duration::from_millis(20)),
    );
    let dispatcher = Arc::new(dispatcher);
    let gate = runtime.gate_next_register();

    let worker = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            dispatcher
                .add_route_group(marker_payload(), group_properties("slow", "/slow"))
                .unwrap();
        })
    };
    gate.wait_entered();

    assert_eq!(
        dispatcher.close(),
        Err(DispatchError::ShutdownTimeout(Duration::from_millis(20)))
    );
    assert!(!dispatcher.is_closed());

    gate.release();
    worker.join().unwrap();
    dispatcher.close().unwrap();
    assert!(runtime.inner().is_empty());
    assert_eq!(
        dispatcher.add_route_group(marker_payload(), group_properties("late", "/late")),
        Err(DispatchError::Closed)
    );
}

#[test]
fn test_second_close_waits_for_the_outcome() {
    let timeout = Duration::from_millis(200);
    let (runtime, dispatcher) = setup_with(
        DispatcherConfig::default()
            .with_implicit_default(false)
            .with_shutdown_timeout(timeout),
    );
    let dispatcher = Arc::new(dispatcher);
    let gate = runtime.gate_next_register();

    let worker = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            dispatcher
                .add_route_group(marker_payload(), group_properties("slow", "/slow"))
                .unwrap();
        })
    };
    gate.wait_entered();

    let closer = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.close())
    };
    while !dispatcher.is_closed() && !closer.is_finished() {
        thread::yield_now();
    }

    // The pass is still blocked, so neither call may report success.
    assert_eq!(dispatcher.close(), Err(DispatchError::ShutdownTimeout(timeout)));
    assert_eq!(
        closer.join().unwrap(),
        Err(DispatchError::ShutdownTimeout(timeout))
    );
    assert!(!dispatcher.is_closed());

    gate.release();
    worker.join().unwrap();
    dispatcher.close().unwrap();
    assert!(runtime.inner().is_empty());
}

#[test]
fn test_concurrent_closes_both_succeed() {
    let (runtime, dispatcher) = setup_with(
        DispatcherConfig::default()
            .with_implicit_default(false)
            .with_shutdown_timeout(Duration::from_secs(10)),
    );
    let dispatcher = Arc::new(dispatcher);
    let gate = runtime.gate_next_register();

    let worker = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            dispatcher
                .add_route_group(marker_payload(), group_properties("slow", "/slow"))
                .unwrap();
        })
    };
    gate.wait_entered();

    let closers: Vec<_> = (0..2)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.close())
        })
        .collect();
    while !dispatcher.is_closed() {
        thread::yield_now();
    }
    gate.release();

    for closer in closers {
        assert_eq!(closer.join().unwrap(), Ok(()));
    }
    worker.join().unwrap();
    assert!(runtime.inner().is_empty());
    assert!(dispatcher.registry().is_empty());
    assert_eq!(
        dispatcher.add_route_group(marker_payload(), group_properties("late", "/late")),
        Err(DispatchError::Closed)
    );
}

#[test]
fn test_trigger_after_close_is_ignored() {
    let (_runtime, dispatcher) = setup();
    dispatcher.close().unwrap();
    dispatcher.trigger();
    assert_eq!(dispatcher.pass_count(), 0);
    assert_eq!(dispatcher.remove(ServiceId(1)), Err(DispatchError::Closed));
}
