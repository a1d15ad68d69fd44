//! Failure reporting types.
//!
//! Every pass publishes one [`FailureSnapshot`] describing the providers it
//! excluded. The snapshot replaces the previous one wholesale, so a provider
//! that recovers simply stops appearing.

use crate::provider::{FailureReason, ProviderKind, ServiceId};

/// One excluded provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedProvider {
    /// Registry identity.
    pub service_id: ServiceId,
    /// Declared or generated name.
    pub name: String,
    /// Provider kind.
    pub kind: ProviderKind,
    /// Why it was excluded.
    pub reason: FailureReason,
}

/// Point-in-time set of excluded providers, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSnapshot {
    /// Excluded route groups.
    pub groups: Vec<FailedProvider>,
    /// Excluded handlers.
    pub handlers: Vec<FailedProvider>,
    /// Excluded interceptors.
    pub interceptors: Vec<FailedProvider>,
}

impl FailureSnapshot {
    /// Sort each list by service id.
    pub fn from_unsorted(
        mut groups: Vec<FailedProvider>,
        mut handlers: Vec<FailedProvider>,
        mut interceptors: Vec<FailedProvider>,
    ) -> Self {
        groups.sort_by_key(|f| f.service_id);
        handlers.sort_by_key(|f| f.service_id);
        interceptors.sort_by_key(|f| f.service_id);
        Self {
            groups,
            handlers,
            interceptors,
        }
    }

    /// Iterate over every failure.
    pub fn iter(&self) -> impl Iterator<Item = &FailedProvider> {
        self.groups
            .iter()
            .chain(&self.handlers)
            .chain(&self.interceptors)
    }

    /// Failure recorded for a service, if any.
    pub fn reason_of(&self, service_id: ServiceId) -> Option<FailureReason> {
        self.iter()
            .find(|f| f.service_id == service_id)
            .map(|f| f.reason)
    }

    /// Total number of failures.
    pub fn len(&self) -> usize {
        self.groups.len() + self.handlers.len() + self.interceptors.len()
    }

    /// Whether nothing was excluded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives the failure snapshot of each pass.
pub trait DiagnosticsTracker: Send + Sync {
    /// Replace the published failures with `snapshot`.
    fn publish_failures(&self, snapshot: FailureSnapshot);
}
