//! Testing utilities for Trellis.
//!
//! - [`RecordingRuntime`]: a [`MemoryRuntime`] that records every call, can be
//!   told to fail for chosen groups, and can block a registration on a [`Gate`]
//! - [`CountingFactory`]: a component factory that counts acquisitions
//! - property and payload helpers for the three provider kinds

use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
    },
};
use trellis_core::{
    BoxError, Component, ComponentFactory, Contracts, Marker, Payload, Properties, RouteGroup,
    RuntimeAdapter, RuntimeError, keys,
};

use crate::runtime::MemoryRuntime;

// ============================================================================
// Recording Runtime
// ============================================================================

/// One call made to a [`RecordingRuntime`], by group name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `register_group`
    Register(String),
    /// `unregister_group`
    Unregister(String),
    /// `reload_group`
    Reload(String),
}

struct GateSide {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Test side of a blocked registration.
pub struct Gate {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    /// Block until the gated call has started.
    pub fn wait_entered(&self) {
        let _ = self.entered.recv();
    }

    /// Let the gated call finish.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// A runtime that records calls.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Arc::new(RecordingRuntime::new());
/// let dispatcher = Dispatcher::new(Arc::clone(&runtime));
/// // ...
/// assert_eq!(runtime.calls(), vec![RuntimeCall::Register("api".into())]);
/// ```
#[derive(Default)]
pub struct RecordingRuntime {
    inner: MemoryRuntime,
    calls: Mutex<Vec<RuntimeCall>>,
    failing: Mutex<HashSet<String>>,
    gate: Mutex<Option<GateSide>>,
}

impl RecordingRuntime {
    /// An empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty runtime advertising `properties`.
    pub fn with_properties(properties: Properties) -> Self {
        Self {
            inner: MemoryRuntime::with_properties(properties),
            ..Self::default()
        }
    }

    /// The wrapped in-memory runtime.
    pub fn inner(&self) -> &MemoryRuntime {
        &self.inner
    }

    /// Calls so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of `register_group` calls so far.
    pub fn register_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Register(_)))
            .count()
    }

    /// Make register, reload and unregister fail for the named group.
    pub fn fail_for(&self, group: &str) {
        self.failing.lock().insert(group.to_owned());
    }

    /// Stop failing calls for the named group.
    pub fn succeed_for(&self, group: &str) {
        self.failing.lock().remove(group);
    }

    /// Block the next `register_group` call until the gate is released.
    pub fn gate_next_register(&self) -> Gate {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock() = Some(GateSide {
            entered: entered_tx,
            release: release_rx,
        });
        Gate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().push(call);
    }

    fn check_failing(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        let name = group.provider().name();
        if self.failing.lock().contains(name) {
            return Err(RuntimeError::Rejected {
                group: name.to_owned(),
                reason: "injected failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl RuntimeAdapter for RecordingRuntime {
    fn register_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Register(group.provider().name().to_owned()));
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        self.check_failing(group)?;
        self.inner.register_group(group)
    }

    fn unregister_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Unregister(group.provider().name().to_owned()));
        self.check_failing(group)?;
        self.inner.unregister_group(group)
    }

    fn reload_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Reload(group.provider().name().to_owned()));
        self.check_failing(group)?;
        self.inner.reload_group(group)
    }

    fn is_registered(&self, group: &RouteGroup) -> bool {
        self.inner.is_registered(group)
    }

    fn properties(&self) -> Properties {
        self.inner.properties()
    }
}

// ============================================================================
// Counting Factory
// ============================================================================

/// A factory that counts outstanding instances.
#[derive(Clone, Default)]
pub struct CountingFactory {
    contracts: Contracts,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    broken: bool,
}

impl CountingFactory {
    /// A factory producing components with `contracts`.
    pub fn new(contracts: Contracts) -> Self {
        Self {
            contracts,
            ..Self::default()
        }
    }

    /// A factory whose `acquire` always fails.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    /// Instances handed out so far.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Instances given back so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ComponentFactory for CountingFactory {
    fn acquire(&self) -> Result<Arc<dyn Component>, BoxError> {
        if self.broken {
            return Err("factory is broken".into());
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Marker(self.contracts)))
    }

    fn release(&self, _component: Arc<dyn Component>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A payload with no contracts, for groups and handlers.
pub fn marker_payload() -> Payload {
    Payload::singleton(Marker(Contracts::empty()))
}

/// A payload usable as interceptor content.
pub fn interceptor_payload() -> Payload {
    Payload::singleton(Marker(Contracts::REQUEST_FILTER))
}

/// Properties of a named route group.
pub fn group_properties(name: &str, path: &str) -> Properties {
    Properties::new()
        .with(keys::ROUTE_GROUP, true)
        .with(keys::NAME, name)
        .with(keys::PATH, path)
}

/// Properties of an unnamed handler with an optional group selector.
pub fn handler_properties(select: Option<&str>) -> Properties {
    let props = Properties::new().with(keys::ROUTE_HANDLER, true);
    match select {
        Some(filter) => props.with(keys::SELECT, filter),
        None => props,
    }
}

/// Properties of a named interceptor with an optional group selector.
pub fn interceptor_properties(name: &str, select: Option<&str>) -> Properties {
    let props = Properties::new()
        .with(keys::ROUTE_INTERCEPTOR, true)
        .with(keys::NAME, name);
    match select {
        Some(filter) => props.with(keys::SELECT, filter),
        None => props,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use trellis_core::ServiceId;

    fn group(name: &str) -> RouteGroup {
        RouteGroup::new(ServiceId(1), 0, marker_payload(), group_properties(name, "/g"))
    }

    #[test]
    fn test_records_and_fails_on_demand() {
        let runtime = RecordingRuntime::new();
        runtime.fail_for("g");
        assert!(runtime.register_group(&group("g")).is_err());
        runtime.succeed_for("g");
        runtime.register_group(&group("g")).unwrap();
        assert_eq!(runtime.register_count(), 2);
        assert!(runtime.inner().is_registered(&group("g")));

        runtime.fail_for("g");
        assert!(runtime.unregister_group(&group("g")).is_err());
        assert!(runtime.inner().is_registered(&group("g")));
    }

    #[test]
    fn test_gate_blocks_register() {
        let runtime = Arc::new(RecordingRuntime::new());
        let gate = runtime.gate_next_register();
        let worker = {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || runtime.register_group(&group("g")))
        };
        gate.wait_entered();
        assert!(runtime.inner().is_empty());
        gate.release();
        worker.join().unwrap().unwrap();
        assert_eq!(runtime.inner().len(), 1);
    }

    #[test]
    fn test_counting_factory() {
        let factory = CountingFactory::new(Contracts::WRITER);
        let payload = Payload::factory(factory.clone());
        drop(payload.acquire().unwrap());
        assert_eq!(factory.acquired(), 1);
        assert_eq!(factory.released(), 1);
        assert!(Payload::factory(CountingFactory::broken()).acquire().is_err());
    }
}
