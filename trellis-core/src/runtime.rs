//! # Runtime Adapter
//!
//! The outbound interface implemented by the hosting server. The dispatcher
//! calls it only from inside a reconciliation pass, one group at a time.
//!
//! Errors returned here are logged by the dispatcher and confined to the
//! single call that raised them; the rest of the pass continues.

use crate::{error::RuntimeError, properties::Properties, provider::RouteGroup};

/// A hosting runtime that serves route groups.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a `RuntimeAdapter`",
    label = "missing `RuntimeAdapter` implementation",
    note = "Implement register/unregister/reload so the dispatcher can sync route groups."
)]
pub trait RuntimeAdapter: Send + Sync {
    /// Start serving a group with its attached content.
    fn register_group(&self, group: &RouteGroup) -> Result<(), RuntimeError>;

    /// Stop serving a group.
    fn unregister_group(&self, group: &RouteGroup) -> Result<(), RuntimeError>;

    /// Replace the served content of an already registered group.
    fn reload_group(&self, group: &RouteGroup) -> Result<(), RuntimeError>;

    /// Whether the runtime currently serves this group.
    fn is_registered(&self, group: &RouteGroup) -> bool;

    /// Properties describing this runtime instance, matched by target filters.
    fn properties(&self) -> Properties;
}

impl<T: RuntimeAdapter + ?Sized> RuntimeAdapter for std::sync::Arc<T> {
    fn register_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        (**self).register_group(group)
    }

    fn unregister_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        (**self).unregister_group(group)
    }

    fn reload_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        (**self).reload_group(group)
    }

    fn is_registered(&self, group: &RouteGroup) -> bool {
        (**self).is_registered(group)
    }

    fn properties(&self) -> Properties {
        (**self).properties()
    }
}
