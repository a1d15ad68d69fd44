#![allow(dead_code)]

use std::sync::Arc;
use trellis::{
    Dispatcher, DispatcherConfig, Properties, ServiceId, keys,
    testing::{RecordingRuntime, group_properties},
};

// ============================================================================
// Setup
// ============================================================================

/// A dispatcher over a recording runtime, without the implicit default group.
pub fn setup() -> (Arc<RecordingRuntime>, Dispatcher) {
    setup_with(DispatcherConfig::default().with_implicit_default(false))
}

/// A dispatcher over a recording runtime with the given configuration.
pub fn setup_with(config: DispatcherConfig) -> (Arc<RecordingRuntime>, Dispatcher) {
    let runtime = Arc::new(RecordingRuntime::new());
    let dispatcher = Dispatcher::builder(Arc::clone(&runtime))
        .config(config)
        .build();
    (runtime, dispatcher)
}

// ============================================================================
// Properties
// ============================================================================

pub fn ranked_group(name: &str, path: &str, rank: i32) -> Properties {
    group_properties(name, path).with(keys::RANK, rank)
}

pub fn default_group(name: &str, path: &str) -> Properties {
    group_properties(name, path).with(keys::DEFAULT, true)
}

pub fn removal(id: ServiceId) -> Properties {
    Properties::new().with(keys::SERVICE_ID, id.0)
}

// ============================================================================
// Inspection
// ============================================================================

/// Names of the groups the dispatcher reports active.
pub fn active_names(dispatcher: &Dispatcher) -> Vec<String> {
    dispatcher
        .active_groups()
        .iter()
        .map(|g| g.name.clone())
        .collect()
}

/// Handler names attached to an active group.
pub fn handlers_of(dispatcher: &Dispatcher, group: &str) -> Vec<String> {
    dispatcher
        .diagnostics()
        .group(group)
        .map(|g| g.handlers)
        .unwrap_or_default()
}

/// Interceptor names attached to an active group.
pub fn interceptors_of(dispatcher: &Dispatcher, group: &str) -> Vec<String> {
    dispatcher
        .diagnostics()
        .group(group)
        .map(|g| g.interceptors)
        .unwrap_or_default()
}
