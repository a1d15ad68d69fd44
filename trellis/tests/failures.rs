use std::sync::{Arc, Mutex};
use trellis::{
    Contracts, Diagnostics, DiagnosticsTracker, Dispatcher, DispatcherConfig, FailureReason,
    FailureSnapshot, MemoryRuntime, Payload, Properties, ProviderKind, RouteGroup, RuntimeAdapter,
    RuntimeError, keys,
    testing::{
        CountingFactory, RuntimeCall, group_properties, handler_properties, interceptor_payload,
        interceptor_properties, marker_payload,
    },
};

mod common;
use common::{active_names, ranked_group, removal, setup};

// ============================================================================
// Test Doubles
// ============================================================================

#[derive(Default)]
struct SnapshotLog {
    snapshots: Mutex<Vec<FailureSnapshot>>,
}

impl DiagnosticsTracker for SnapshotLog {
    fn publish_failures(&self, snapshot: FailureSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}

/// Panics when asked to register the group named `boom`.
struct PanickyRuntime;

impl RuntimeAdapter for PanickyRuntime {
    fn register_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        if group.provider().name() == "boom" {
            panic!("boom");
        }
        Ok(())
    }

    fn unregister_group(&self, _group: &RouteGroup) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn reload_group(&self, _group: &RouteGroup) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn is_registered(&self, _group: &RouteGroup) -> bool {
        false
    }

    fn properties(&self) -> Properties {
        Properties::new()
    }
}

// ============================================================================
// Runtime Errors
// ============================================================================

#[test]
fn test_runtime_error_does_not_abort_pass() {
    let (runtime, dispatcher) = setup();
    runtime.fail_for("bad");
    {
        let _batch = dispatcher.batch();
        dispatcher
            .add_route_group(marker_payload(), group_properties("bad", "/bad"))
            .unwrap();
        dispatcher
            .add_route_group(marker_payload(), group_properties("good", "/good"))
            .unwrap();
    }

    let report = dispatcher.last_report();
    assert_eq!(report.failed_calls, 1);
    assert_eq!(report.registered, 1);
    assert_eq!(active_names(&dispatcher), vec!["good"]);
    // Runtime errors are logged, not recorded as provider failures.
    assert!(dispatcher.failures().is_empty());

    runtime.succeed_for("bad");
    runtime.clear_calls();
    dispatcher.trigger();
    assert_eq!(runtime.calls(), vec![RuntimeCall::Register("bad".into())]);
    assert_eq!(active_names(&dispatcher), vec!["bad", "good"]);
}

#[test]
fn test_failed_unregister_of_shadowed_group_is_retried() {
    let (runtime, dispatcher) = setup();
    dispatcher
        .add_route_group(marker_payload(), group_properties("g1", "/a"))
        .unwrap();
    runtime.fail_for("g1");
    dispatcher
        .add_route_group(marker_payload(), ranked_group("g2", "/a", 5))
        .unwrap();

    // Still mounted, so still reported.
    assert_eq!(runtime.inner().group_names(), vec!["g1", "g2"]);
    assert_eq!(active_names(&dispatcher), vec!["g1", "g2"]);
    assert_eq!(dispatcher.last_report().failed_calls, 1);

    dispatcher.trigger();
    assert_eq!(runtime.inner().group_names(), vec!["g1", "g2"]);

    runtime.succeed_for("g1");
    dispatcher.trigger();
    assert_eq!(dispatcher.last_report().unregistered, 1);
    assert_eq!(runtime.inner().group_names(), vec!["g2"]);
    assert_eq!(active_names(&dispatcher), vec!["g2"]);
}

#[test]
fn test_failed_unregister_of_removed_group_is_retried() {
    let (runtime, dispatcher) = setup();
    let id = dispatcher
        .add_route_group(marker_payload(), group_properties("gone", "/gone"))
        .unwrap();
    runtime.fail_for("gone");
    runtime.clear_calls();
    assert!(dispatcher.remove_route_group(&removal(id)).unwrap());

    // One attempt per pass.
    assert_eq!(runtime.calls(), vec![RuntimeCall::Unregister("gone".into())]);
    assert_eq!(active_names(&dispatcher), vec!["gone"]);

    runtime.succeed_for("gone");
    dispatcher.trigger();
    assert!(runtime.inner().is_empty());
    assert!(active_names(&dispatcher).is_empty());
}

#[test]
fn test_runtime_panic_is_contained() {
    let dispatcher = Dispatcher::builder(PanickyRuntime)
        .config(DispatcherConfig::default().with_implicit_default(false))
        .build();
    {
        let _batch = dispatcher.batch();
        dispatcher
            .add_route_group(marker_payload(), group_properties("boom", "/boom"))
            .unwrap();
        dispatcher
            .add_route_group(marker_payload(), group_properties("calm", "/calm"))
            .unwrap();
    }
    assert_eq!(dispatcher.last_report().failed_calls, 1);
    assert_eq!(active_names(&dispatcher), vec!["calm"]);

    // The dispatcher keeps working after the panic.
    dispatcher
        .add_route_group(marker_payload(), group_properties("later", "/later"))
        .unwrap();
    assert!(active_names(&dispatcher).contains(&"later".to_owned()));
}

// ============================================================================
// Provider Failures
// ============================================================================

#[test]
fn test_malformed_providers_are_recorded() {
    let (_runtime, dispatcher) = setup();
    let no_flag = dispatcher
        .add_route_group(
            marker_payload(),
            Properties::new().with(keys::NAME, "x").with(keys::PATH, "/x"),
        )
        .unwrap();
    let no_path = dispatcher
        .add_route_group(
            marker_payload(),
            Properties::new()
                .with(keys::ROUTE_GROUP, true)
                .with(keys::NAME, "y"),
        )
        .unwrap();
    let bad_select = dispatcher
        .add_handler(marker_payload(), handler_properties(Some("(broken")))
        .unwrap();
    let reserved = dispatcher
        .add_handler(
            marker_payload(),
            handler_properties(None).with(keys::NAME, ".internal"),
        )
        .unwrap();

    assert_eq!(dispatcher.status_of(no_flag), Some(FailureReason::Invalid));
    assert_eq!(dispatcher.status_of(no_path), Some(FailureReason::Invalid));
    assert_eq!(
        dispatcher.status_of(bad_select),
        Some(FailureReason::ValidationFailed)
    );
    assert_eq!(
        dispatcher.status_of(reserved),
        Some(FailureReason::ValidationFailed)
    );

    let failures = dispatcher.failures();
    assert_eq!(failures.groups.len(), 2);
    assert_eq!(failures.handlers.len(), 2);
    assert!(failures.groups.iter().all(|f| f.kind == ProviderKind::RouteGroup));
}

#[test]
fn test_payload_probes() {
    let (_runtime, dispatcher) = setup();
    dispatcher
        .add_route_group(marker_payload(), group_properties("api", "/api"))
        .unwrap();
    let plain = dispatcher
        .add_interceptor(
            marker_payload(),
            interceptor_properties("plain", Some("(name=api)")),
        )
        .unwrap();
    let broken = dispatcher
        .add_handler(
            Payload::factory(CountingFactory::broken()),
            handler_properties(Some("(name=api)")),
        )
        .unwrap();

    assert_eq!(
        dispatcher.status_of(plain),
        Some(FailureReason::NotAnExtensionType)
    );
    assert_eq!(
        dispatcher.status_of(broken),
        Some(FailureReason::ServiceNotGettable)
    );
}

#[test]
fn test_factory_instances_are_released() {
    let (_runtime, dispatcher) = setup();
    let factory = CountingFactory::new(Contracts::WRITER);
    dispatcher
        .add_route_group(marker_payload(), group_properties("api", "/api"))
        .unwrap();
    dispatcher
        .add_interceptor(
            Payload::factory(factory.clone()),
            interceptor_properties("codec", Some("(name=api)")),
        )
        .unwrap();
    dispatcher.trigger();

    assert!(factory.acquired() >= 2);
    assert_eq!(factory.acquired(), factory.released());
    assert!(dispatcher.failures().is_empty());
}

#[test]
fn test_failure_clears_when_fixed() {
    let (_runtime, dispatcher) = setup();
    let id = dispatcher
        .add_handler(marker_payload(), handler_properties(Some("(broken")))
        .unwrap();
    assert_eq!(dispatcher.status_of(id), Some(FailureReason::ValidationFailed));

    dispatcher
        .add_route_group(marker_payload(), group_properties("api", "/api"))
        .unwrap();
    dispatcher
        .update_handler(
            marker_payload(),
            handler_properties(Some("(name=api)")).with(keys::SERVICE_ID, id.0),
        )
        .unwrap();
    assert_eq!(dispatcher.status_of(id), None);
    assert!(dispatcher.failures().is_empty());
}

#[test]
fn test_interceptor_without_default_group_is_unavailable() {
    let (_runtime, dispatcher) = setup();
    let id = dispatcher
        .add_interceptor(interceptor_payload(), interceptor_properties("cors", None))
        .unwrap();
    assert_eq!(
        dispatcher.status_of(id),
        Some(FailureReason::RequiredApplicationUnavailable)
    );
}

// ============================================================================
// Publication
// ============================================================================

#[test]
fn test_trackers_and_shared_diagnostics_receive_snapshots() {
    let log = Arc::new(SnapshotLog::default());
    let diagnostics = Arc::new(Diagnostics::new());
    let dispatcher = Dispatcher::builder(MemoryRuntime::new())
        .config(DispatcherConfig::default().with_implicit_default(false))
        .diagnostics(Arc::clone(&diagnostics))
        .tracker(log.clone())
        .build();

    let id = dispatcher
        .add_handler(marker_payload(), handler_properties(None))
        .unwrap();
    assert_eq!(
        diagnostics.status_of(id),
        Some(FailureReason::RequiredApplicationUnavailable)
    );

    dispatcher.close().unwrap();
    let snapshots = log.snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].handlers.len(), 1);
    assert!(snapshots[1].is_empty());
    assert!(diagnostics.failures().is_empty());
}
