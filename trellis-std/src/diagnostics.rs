//! # Diagnostics Tracker
//!
//! Keeps the latest failure snapshot and a summary of what each pass left
//! registered. Both are replaced wholesale at the end of every pass, so readers
//! never see a mix of two passes.

use parking_lot::RwLock;
use std::sync::Arc;
use trellis_core::{
    DiagnosticsTracker, FailureReason, FailureSnapshot, ProviderKind, RouteGroup, ServiceId,
};

/// What the runtime serves for one group after a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGroup {
    /// Group identity.
    pub service_id: ServiceId,
    /// Declared or generated name.
    pub name: String,
    /// Normalized path.
    pub path: String,
    /// Whether this is the effective default group.
    pub is_default: bool,
    /// Names of attached interceptors, by service id.
    pub interceptors: Vec<String>,
    /// Names of attached handlers, by service id.
    pub handlers: Vec<String>,
}

impl ActiveGroup {
    /// Summarize a registered group.
    pub fn from_group(group: &RouteGroup) -> Self {
        let names = |kind: ProviderKind| -> Vec<String> {
            group
                .attached()
                .iter()
                .filter(|c| c.kind() == kind)
                .map(|c| c.provider().name().to_owned())
                .collect()
        };
        Self {
            service_id: group.provider().service_id(),
            name: group.provider().name().to_owned(),
            path: group.path().to_owned(),
            is_default: group.is_default(),
            interceptors: names(ProviderKind::Interceptor),
            handlers: names(ProviderKind::Handler),
        }
    }
}

/// Latest published state of the dispatcher.
#[derive(Default)]
pub struct Diagnostics {
    failures: RwLock<Arc<FailureSnapshot>>,
    active: RwLock<Arc<Vec<ActiveGroup>>>,
}

impl Diagnostics {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures of the last pass.
    pub fn failures(&self) -> Arc<FailureSnapshot> {
        Arc::clone(&self.failures.read())
    }

    /// Groups registered after the last pass, by service id.
    pub fn active(&self) -> Arc<Vec<ActiveGroup>> {
        Arc::clone(&self.active.read())
    }

    /// Failure recorded for a provider by the last pass.
    pub fn status_of(&self, service_id: ServiceId) -> Option<FailureReason> {
        self.failures.read().reason_of(service_id)
    }

    /// The active group with this name.
    pub fn group(&self, name: &str) -> Option<ActiveGroup> {
        self.active.read().iter().find(|g| g.name == name).cloned()
    }

    pub(crate) fn publish_active(&self, mut groups: Vec<ActiveGroup>) {
        groups.sort_by_key(|g| g.service_id);
        *self.active.write() = Arc::new(groups);
    }

    pub(crate) fn reset(&self) {
        *self.failures.write() = Arc::new(FailureSnapshot::default());
        *self.active.write() = Arc::new(Vec::new());
    }
}

impl DiagnosticsTracker for Diagnostics {
    fn publish_failures(&self, snapshot: FailureSnapshot) {
        *self.failures.write() = Arc::new(snapshot);
    }
}
