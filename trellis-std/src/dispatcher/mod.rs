//! # Dispatcher
//!
//! Entry point for provider lifecycle events. Every event updates the
//! [`ProviderRegistry`] and triggers a reconciliation pass.
//!
//! # Coalescing
//!
//! At most one pass runs at a time. An event arriving while a pass is running
//! only marks the dispatcher dirty and returns; the thread running the pass
//! loops until nothing is dirty. Any number of events during one pass
//! therefore cost at most one follow-up pass, and no event is lost.
//!
//! # Batching
//!
//! [`Dispatcher::batch`] suppresses passes until the returned [`Batch`] guard
//! is dropped or flushed, so a burst of events costs a single pass.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_std::{Dispatcher, MemoryRuntime};
//!
//! let dispatcher = Dispatcher::builder(MemoryRuntime::new()).build();
//! dispatcher.add_route_group(payload, props)?;
//! ```

mod pass;

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use trellis_core::{
    Contracts, DiagnosticsTracker, DispatchError, FailureReason, FailureSnapshot, Marker, Payload,
    Properties, ProviderKind, RouteGroup, RuntimeAdapter, ServiceId,
};

use crate::{
    config::DispatcherConfig,
    diagnostics::{ActiveGroup, Diagnostics},
    registry::{ProviderRegistry, service_id_of},
};

pub use pass::PassReport;
use pass::{PassContext, PassState};

// Lifecycle of `Dispatcher::status`.
const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    runtime: Arc<dyn RuntimeAdapter>,
    config: DispatcherConfig,
    diagnostics: Option<Arc<Diagnostics>>,
    trackers: Vec<Arc<dyn DiagnosticsTracker>>,
    default_payload: Option<Payload>,
}

impl DispatcherBuilder {
    fn new(runtime: Arc<dyn RuntimeAdapter>) -> Self {
        Self {
            runtime,
            config: DispatcherConfig::default(),
            diagnostics: None,
            trackers: Vec::new(),
            default_payload: None,
        }
    }

    /// Use this configuration.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing diagnostics store.
    pub fn diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Also publish each pass's failures to `tracker`.
    pub fn tracker(mut self, tracker: Arc<dyn DiagnosticsTracker>) -> Self {
        self.trackers.push(tracker);
        self
    }

    /// Content of the implicit default group.
    pub fn default_payload(mut self, payload: Payload) -> Self {
        self.default_payload = Some(payload);
        self
    }

    /// Build the dispatcher.
    pub fn build(self) -> Dispatcher {
        let implicit_default = self.config.implicit_default.then(|| {
            let payload = self
                .default_payload
                .unwrap_or_else(|| Payload::singleton(Marker(Contracts::empty())));
            RouteGroup::implicit_default(&self.config.default_path, payload)
        });

        Dispatcher {
            registry: ProviderRegistry::new(),
            runtime: self.runtime,
            diagnostics: self.diagnostics.unwrap_or_default(),
            trackers: self.trackers,
            config: self.config,
            implicit_default,
            state: Mutex::new(PassState::default()),
            dirty: AtomicBool::new(false),
            batch_depth: AtomicUsize::new(0),
            status: AtomicU8::new(OPEN),
            passes: AtomicU64::new(0),
        }
    }
}

/// Reconciles registered providers into the runtime.
pub struct Dispatcher {
    registry: ProviderRegistry,
    runtime: Arc<dyn RuntimeAdapter>,
    diagnostics: Arc<Diagnostics>,
    trackers: Vec<Arc<dyn DiagnosticsTracker>>,
    config: DispatcherConfig,
    implicit_default: Option<RouteGroup>,
    state: Mutex<PassState>,
    dirty: AtomicBool,
    batch_depth: AtomicUsize,
    status: AtomicU8,
    passes: AtomicU64,
}

impl Dispatcher {
    /// Start building a dispatcher for `runtime`.
    pub fn builder(runtime: impl RuntimeAdapter + 'static) -> DispatcherBuilder {
        DispatcherBuilder::new(Arc::new(runtime))
    }

    /// A dispatcher with default configuration.
    pub fn new(runtime: impl RuntimeAdapter + 'static) -> Self {
        Self::builder(runtime).build()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register a route group and reconcile.
    pub fn add_route_group(
        &self,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.upsert(ProviderKind::RouteGroup, payload, properties)
    }

    /// Replace a route group and reconcile.
    ///
    /// The group is identified by the `service.id` property; without one this
    /// behaves like [`add_route_group`](Self::add_route_group).
    pub fn update_route_group(
        &self,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.upsert(ProviderKind::RouteGroup, payload, properties)
    }

    /// Remove the route group named by the `service.id` property.
    pub fn remove_route_group(&self, properties: &Properties) -> Result<bool, DispatchError> {
        self.remove_kind(ProviderKind::RouteGroup, properties)
    }

    /// Register a handler and reconcile.
    pub fn add_handler(
        &self,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.upsert(ProviderKind::Handler, payload, properties)
    }

    /// Replace a handler and reconcile.
    pub fn update_handler(
        &self,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.upsert(ProviderKind::Handler, payload, properties)
    }

    /// Remove the handler named by the `service.id` property.
    pub fn remove_handler(&self, properties: &Properties) -> Result<bool, DispatchError> {
        self.remove_kind(ProviderKind::Handler, properties)
    }

    /// Register an interceptor and reconcile.
    pub fn add_interceptor(
        &self,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.upsert(ProviderKind::Interceptor, payload, properties)
    }

    /// Replace an interceptor and reconcile.
    pub fn update_interceptor(
        &self,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.upsert(ProviderKind::Interceptor, payload, properties)
    }

    /// Remove the interceptor named by the `service.id` property.
    pub fn remove_interceptor(&self, properties: &Properties) -> Result<bool, DispatchError> {
        self.remove_kind(ProviderKind::Interceptor, properties)
    }

    /// Remove whichever provider has this id.
    pub fn remove(&self, service_id: ServiceId) -> Result<bool, DispatchError> {
        self.ensure_open()?;
        let removed = self.registry.remove_any(service_id).is_some();
        if removed {
            self.trigger();
        }
        Ok(removed)
    }

    fn upsert(
        &self,
        kind: ProviderKind,
        payload: Payload,
        properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        self.ensure_open()?;
        let service_id = self.registry.upsert(kind, payload, properties)?;
        // A close that finished meanwhile may have cleared the registry first.
        if self.status.load(Ordering::Acquire) == CLOSED {
            self.registry.clear();
            return Err(DispatchError::Closed);
        }
        tracing::debug!(%kind, %service_id, "provider upserted");
        self.trigger();
        Ok(service_id)
    }

    fn remove_kind(&self, kind: ProviderKind, properties: &Properties) -> Result<bool, DispatchError> {
        self.ensure_open()?;
        let Some(service_id) = service_id_of(properties) else {
            tracing::warn!(%kind, "remove event without a service id ignored");
            return Ok(false);
        };
        let removed = self.registry.remove(kind, service_id);
        if removed {
            tracing::debug!(%kind, %service_id, "provider removed");
            self.trigger();
        }
        Ok(removed)
    }

    fn ensure_open(&self) -> Result<(), DispatchError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DispatchError::Closed)
        }
    }

    fn is_open(&self) -> bool {
        self.status.load(Ordering::Acquire) == OPEN
    }

    // ------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------

    /// Request a reconciliation pass.
    ///
    /// Never blocks on a running pass: if one is in progress it will pick up
    /// the request before it releases the lock.
    pub fn trigger(&self) {
        if !self.is_open() {
            return;
        }
        self.dirty.store(true, Ordering::Release);
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            return;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let Some(mut state) = self.state.try_lock() else {
                return;
            };
            while self.is_open()
                && self.batch_depth.load(Ordering::Acquire) == 0
                && self.dirty.swap(false, Ordering::AcqRel)
            {
                self.run_pass(&mut state);
            }
            drop(state);

            // A trigger may have lost the lock race after the last check.
            if !self.dirty.load(Ordering::Acquire)
                || self.batch_depth.load(Ordering::Acquire) > 0
                || !self.is_open()
            {
                return;
            }
        }
    }

    fn run_pass(&self, state: &mut PassState) {
        let number = self.passes.load(Ordering::Relaxed) + 1;
        let span = tracing::info_span!("reconcile", pass = number);
        let _enter = span.enter();

        let ctx = PassContext {
            registry: &self.registry,
            runtime: self.runtime.as_ref(),
            diagnostics: &self.diagnostics,
            trackers: &self.trackers,
            implicit_default: self.implicit_default.as_ref(),
        };
        let report = pass::reconcile(&ctx, state);
        state.last_report = report;
        self.passes.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(?report, "pass finished");
    }

    /// Suppress passes until the returned guard is dropped.
    ///
    /// Batches nest; only the outermost one triggers a pass on exit, and only
    /// if an event arrived meanwhile.
    pub fn batch(&self) -> Batch<'_> {
        self.batch_depth.fetch_add(1, Ordering::AcqRel);
        Batch { dispatcher: self }
    }

    /// Unregister every group and refuse further events.
    ///
    /// Waits up to the configured shutdown timeout for a running pass. On
    /// timeout the dispatcher stays open and the call may be retried.
    /// Concurrent calls each wait; whichever gets the lock first does the
    /// work, and a call returns `Ok` only once the dispatcher is closed.
    pub fn close(&self) -> Result<(), DispatchError> {
        if let Err(CLOSED) = self
            .status
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
        {
            return Ok(());
        }
        let Some(mut state) = self.state.try_lock_for(self.config.shutdown_timeout) else {
            // Another close may still finish; only undo a plain `Closing`.
            let _ = self
                .status
                .compare_exchange(CLOSING, OPEN, Ordering::AcqRel, Ordering::Acquire);
            tracing::warn!(timeout = ?self.config.shutdown_timeout, "close timed out");
            if self.dirty.load(Ordering::Acquire) {
                self.drain();
            }
            return Err(DispatchError::ShutdownTimeout(self.config.shutdown_timeout));
        };
        if self.status.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return Ok(());
        }

        let report = pass::unregister_all(self.runtime.as_ref(), &mut state);
        state.last_report = report;
        self.registry.clear();
        self.dirty.store(false, Ordering::Release);
        self.diagnostics.reset();
        for tracker in &self.trackers {
            tracker.publish_failures(FailureSnapshot::default());
        }
        tracing::info!(unregistered = report.unregistered, "dispatcher closed");
        Ok(())
    }

    /// Whether [`close`](Self::close) has completed or is in progress.
    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Failures published by the last pass.
    pub fn failures(&self) -> Arc<FailureSnapshot> {
        self.diagnostics.failures()
    }

    /// Failure of one provider in the last pass.
    pub fn status_of(&self, service_id: ServiceId) -> Option<FailureReason> {
        self.diagnostics.status_of(service_id)
    }

    /// Groups the runtime serves after the last pass.
    pub fn active_groups(&self) -> Arc<Vec<ActiveGroup>> {
        self.diagnostics.active()
    }

    /// Shared diagnostics store.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Number of completed passes.
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Report of the most recent pass. Waits for a running pass.
    pub fn last_report(&self) -> PassReport {
        self.state.lock().last_report
    }

    /// Service id of the effective default group, if any.
    pub fn default_group(&self) -> Option<ServiceId> {
        self.state.lock().default
    }

    /// The provider caches.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("passes", &self.pass_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`Dispatcher::batch`].
#[must_use = "passes resume when the batch is dropped"]
pub struct Batch<'a> {
    dispatcher: &'a Dispatcher,
}

impl Batch<'_> {
    /// End the batch now.
    pub fn flush(self) {}
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        let d = self.dispatcher;
        if d.batch_depth.fetch_sub(1, Ordering::AcqRel) == 1 && d.dirty.load(Ordering::Acquire) {
            d.drain();
        }
    }
}
