use std::sync::Arc;
use trellis::{
    DEFAULT_GROUP_NAME, Dispatcher, DispatcherConfig, FailureReason, Properties, ServiceId, keys,
    testing::{
        RecordingRuntime, RuntimeCall, group_properties, handler_properties, interceptor_payload,
        interceptor_properties, marker_payload,
    },
};

mod common;
use common::{
    active_names, default_group, handlers_of, interceptors_of, ranked_group, removal, setup,
    setup_with,
};

#[test]
fn test_higher_rank_takes_over_path() {
    let (runtime, dispatcher) = setup();
    let g1 = dispatcher
        .add_route_group(marker_payload(), ranked_group("G1", "/a", 0))
        .unwrap();
    let h1 = dispatcher
        .add_handler(
            marker_payload(),
            handler_properties(Some("(name=G1)")).with(keys::NAME, "H1"),
        )
        .unwrap();
    assert_eq!(active_names(&dispatcher), vec!["G1"]);
    assert_eq!(handlers_of(&dispatcher, "G1"), vec!["H1"]);

    runtime.clear_calls();
    let g2 = dispatcher
        .add_route_group(marker_payload(), ranked_group("G2", "/a", 5))
        .unwrap();

    assert_eq!(
        runtime.calls(),
        vec![
            RuntimeCall::Unregister("G1".into()),
            RuntimeCall::Register("G2".into()),
        ]
    );
    assert_eq!(active_names(&dispatcher), vec!["G2"]);
    assert_eq!(
        dispatcher.status_of(g1),
        Some(FailureReason::ShadowedByOtherService)
    );
    assert_eq!(dispatcher.status_of(g2), None);
    // H1 selected G1 by name, so it has nowhere to go.
    assert_eq!(
        dispatcher.status_of(h1),
        Some(FailureReason::RequiredApplicationUnavailable)
    );
    assert!(handlers_of(&dispatcher, "G2").is_empty());
}

#[test]
fn test_second_pass_is_idempotent() {
    let (runtime, dispatcher) = setup();
    dispatcher
        .add_route_group(marker_payload(), group_properties("api", "/api"))
        .unwrap();
    dispatcher
        .add_interceptor(
            interceptor_payload(),
            interceptor_properties("json", Some("(path=/api)")),
        )
        .unwrap();
    dispatcher
        .add_handler(marker_payload(), handler_properties(Some("(name=api)")))
        .unwrap();

    let before = runtime.calls().len();
    dispatcher.trigger();
    dispatcher.trigger();
    assert_eq!(runtime.calls().len(), before);
    assert_eq!(dispatcher.last_report().operations(), 0);
}

#[test]
fn test_rank_tie_keeps_older_group() {
    let (_runtime, dispatcher) = setup();
    let older = dispatcher
        .add_route_group(marker_payload(), ranked_group("old", "/x", 1))
        .unwrap();
    let newer = dispatcher
        .add_route_group(marker_payload(), ranked_group("new", "/x/", 1))
        .unwrap();
    assert_eq!(active_names(&dispatcher), vec!["old"]);
    assert_eq!(dispatcher.status_of(older), None);
    assert_eq!(
        dispatcher.status_of(newer),
        Some(FailureReason::ShadowedByOtherService)
    );
}

#[test]
fn test_names_unique_across_kinds() {
    let (_runtime, dispatcher) = setup();
    let group = dispatcher
        .add_route_group(marker_payload(), group_properties("shared", "/s"))
        .unwrap();
    let interceptor = dispatcher
        .add_interceptor(
            interceptor_payload(),
            interceptor_properties("shared", Some("(path=/s)")).with(keys::RANK, 10),
        )
        .unwrap();

    assert_eq!(
        dispatcher.status_of(group),
        Some(FailureReason::DuplicateName)
    );
    assert_eq!(
        dispatcher.status_of(interceptor),
        Some(FailureReason::RequiredApplicationUnavailable)
    );
    assert!(active_names(&dispatcher).is_empty());
}

#[test]
fn test_missing_dependency_excludes_handler() {
    let (_runtime, dispatcher) = setup();
    dispatcher
        .add_route_group(marker_payload(), group_properties("api", "/api"))
        .unwrap();
    let handler = dispatcher
        .add_handler(
            marker_payload(),
            handler_properties(Some("(name=api)")).with(keys::REQUIRES, "(name=auth)"),
        )
        .unwrap();

    assert_eq!(
        dispatcher.status_of(handler),
        Some(FailureReason::RequiredExtensionsUnavailable)
    );
    assert!(handlers_of(&dispatcher, "api").is_empty());

    let auth = dispatcher
        .add_interceptor(
            interceptor_payload(),
            interceptor_properties("auth", Some("(name=api)")),
        )
        .unwrap();
    assert_eq!(dispatcher.status_of(handler), None);
    assert_eq!(handlers_of(&dispatcher, "api").len(), 1);

    dispatcher.remove_interceptor(&removal(auth)).unwrap();
    assert_eq!(
        dispatcher.status_of(handler),
        Some(FailureReason::RequiredExtensionsUnavailable)
    );
}

#[test]
fn test_interceptor_cascade_fails_group() {
    let (_runtime, dispatcher) = setup();
    let group = dispatcher
        .add_route_group(
            marker_payload(),
            group_properties("api", "/api").with(keys::REQUIRES, "(name=audit)"),
        )
        .unwrap();
    let audit = dispatcher
        .add_interceptor(
            interceptor_payload(),
            interceptor_properties("audit", Some("(name=api)"))
                .with(keys::REQUIRES, "(name=session)"),
        )
        .unwrap();

    assert_eq!(
        dispatcher.status_of(group),
        Some(FailureReason::RequiredExtensionsUnavailable)
    );
    assert_eq!(
        dispatcher.status_of(audit),
        Some(FailureReason::RequiredExtensionsUnavailable)
    );

    dispatcher
        .add_interceptor(
            interceptor_payload(),
            interceptor_properties("session", Some("(name=api)")),
        )
        .unwrap();
    assert!(dispatcher.failures().is_empty());
    assert_eq!(interceptors_of(&dispatcher, "api"), vec!["audit", "session"]);
}

#[test]
fn test_requirement_met_by_runtime_properties() {
    let runtime = Arc::new(RecordingRuntime::with_properties(
        Properties::new().with("tls", true),
    ));
    let dispatcher = Dispatcher::builder(Arc::clone(&runtime))
        .config(DispatcherConfig::default().with_implicit_default(false))
        .build();
    let group = dispatcher
        .add_route_group(
            marker_payload(),
            group_properties("secure", "/s").with(keys::REQUIRES, "(tls=true)"),
        )
        .unwrap();
    assert_eq!(dispatcher.status_of(group), None);
    assert_eq!(active_names(&dispatcher), vec!["secure"]);
}

#[test]
fn test_explicit_default_replaces_implicit() {
    let (runtime, dispatcher) = setup_with(DispatcherConfig::default());
    let handler = dispatcher
        .add_handler(marker_payload(), handler_properties(None))
        .unwrap();
    assert_eq!(active_names(&dispatcher), vec![DEFAULT_GROUP_NAME]);
    assert_eq!(handlers_of(&dispatcher, DEFAULT_GROUP_NAME).len(), 1);

    runtime.clear_calls();
    let main = dispatcher
        .add_route_group(marker_payload(), default_group("main", "/main"))
        .unwrap();
    assert_eq!(
        runtime.calls(),
        vec![
            RuntimeCall::Unregister(DEFAULT_GROUP_NAME.into()),
            RuntimeCall::Register("main".into()),
        ]
    );
    assert_eq!(dispatcher.default_group(), Some(main));
    assert_eq!(handlers_of(&dispatcher, "main").len(), 1);

    runtime.clear_calls();
    dispatcher.remove_route_group(&removal(main)).unwrap();
    assert_eq!(
        runtime.calls(),
        vec![
            RuntimeCall::Unregister("main".into()),
            RuntimeCall::Register(DEFAULT_GROUP_NAME.into()),
        ]
    );
    assert_eq!(dispatcher.default_group(), Some(ServiceId::IMPLICIT_DEFAULT));
    assert_eq!(dispatcher.status_of(handler), None);
    assert_eq!(handlers_of(&dispatcher, DEFAULT_GROUP_NAME).len(), 1);
}

#[test]
fn test_one_explicit_default_wins() {
    let (_runtime, dispatcher) = setup_with(DispatcherConfig::default());
    let low = dispatcher
        .add_route_group(marker_payload(), default_group("low", "/low"))
        .unwrap();
    let high = dispatcher
        .add_route_group(
            marker_payload(),
            default_group("high", "/high").with(keys::RANK, 3),
        )
        .unwrap();
    assert_eq!(dispatcher.default_group(), Some(high));
    assert_eq!(
        dispatcher.status_of(low),
        Some(FailureReason::ShadowedByOtherService)
    );
    assert_eq!(active_names(&dispatcher), vec!["high"]);
}

#[test]
fn test_explicit_group_shadows_implicit_path() {
    let (_runtime, dispatcher) = setup_with(DispatcherConfig::default());
    let root = dispatcher
        .add_route_group(marker_payload(), ranked_group("root", "/", i32::MIN))
        .unwrap();
    assert_eq!(dispatcher.status_of(root), None);
    assert_eq!(active_names(&dispatcher), vec!["root"]);
    assert!(dispatcher.failures().is_empty());
}

#[test]
fn test_legacy_group_takes_no_handlers() {
    let (_runtime, dispatcher) = setup();
    dispatcher
        .add_route_group(
            marker_payload(),
            group_properties("old", "/old").with(keys::LEGACY, true),
        )
        .unwrap();
    let handler = dispatcher
        .add_handler(marker_payload(), handler_properties(Some("(name=old)")))
        .unwrap();
    dispatcher
        .add_interceptor(
            interceptor_payload(),
            interceptor_properties("gzip", Some("(name=old)")),
        )
        .unwrap();

    assert_eq!(
        dispatcher.status_of(handler),
        Some(FailureReason::RequiredApplicationUnavailable)
    );
    assert_eq!(interceptors_of(&dispatcher, "old"), vec!["gzip"]);
}

#[test]
fn test_target_filter_skips_other_runtimes() {
    let (_runtime, dispatcher) = setup();
    let foreign = dispatcher
        .add_route_group(
            marker_payload(),
            group_properties("edge", "/edge").with(keys::TARGET, "(region=eu)"),
        )
        .unwrap();
    assert!(active_names(&dispatcher).is_empty());
    assert_eq!(dispatcher.status_of(foreign), None);
}

#[test]
fn test_update_reloads_group() {
    let (runtime, dispatcher) = setup();
    let id = dispatcher
        .add_route_group(marker_payload(), group_properties("api", "/api"))
        .unwrap();
    runtime.clear_calls();
    dispatcher
        .update_route_group(
            marker_payload(),
            group_properties("api", "/v2").with(keys::SERVICE_ID, id.0),
        )
        .unwrap();
    assert_eq!(runtime.calls(), vec![RuntimeCall::Reload("api".into())]);
    assert_eq!(dispatcher.active_groups()[0].path, "/v2");
}

#[test]
fn test_handler_attaches_to_every_selected_group() {
    let (_runtime, dispatcher) = setup();
    dispatcher
        .add_route_group(
            marker_payload(),
            group_properties("a", "/a").with("tier", "public"),
        )
        .unwrap();
    dispatcher
        .add_route_group(
            marker_payload(),
            group_properties("b", "/b").with("tier", "public"),
        )
        .unwrap();
    dispatcher
        .add_handler(
            marker_payload(),
            handler_properties(Some("(tier=public)")).with(keys::NAME, "health"),
        )
        .unwrap();
    assert_eq!(handlers_of(&dispatcher, "a"), vec!["health"]);
    assert_eq!(handlers_of(&dispatcher, "b"), vec!["health"]);
}
