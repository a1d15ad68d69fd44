//! # trellis - Route Group Reconciliation
//!
//! `trellis` keeps a hosting runtime's route groups in sync with a dynamic
//! set of providers. Route groups, handlers and interceptors come and go at
//! any time; after each change the [`Dispatcher`] recomputes which content
//! belongs to which group and issues the minimal register, reload and
//! unregister calls.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! let dispatcher = Dispatcher::new(MemoryRuntime::new());
//!
//! dispatcher.add_route_group(
//!     Payload::singleton(Marker(Contracts::empty())),
//!     Properties::new()
//!         .with(keys::ROUTE_GROUP, true)
//!         .with(keys::NAME, "api")
//!         .with(keys::PATH, "/api"),
//! )?;
//!
//! dispatcher.add_handler(
//!     Payload::singleton(Marker(Contracts::empty())),
//!     Properties::new()
//!         .with(keys::ROUTE_HANDLER, true)
//!         .with(keys::SELECT, "(name=api)")
//!         .with(keys::ROUTE, "/users/{id}"),
//! )?;
//! ```
//!
//! Providers that cannot be served are never an error: they show up in
//! [`Dispatcher::failures`] with a [`FailureReason`].

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use trellis_core::{
    // Payloads
    Acquired,
    // Errors
    BoxError,
    Component,
    ComponentFactory,
    // Providers
    ContentProvider,
    Contracts,
    DEFAULT_GROUP_NAME,
    // Diagnostics
    DiagnosticsTracker,
    DispatchError,
    FailedProvider,
    FailureReason,
    FailureSnapshot,
    // Filters
    Filter,
    FilterError,
    Marker,
    Payload,
    // Properties
    Properties,
    PropertyValue,
    Provider,
    ProviderKind,
    RESERVED_PREFIXES,
    RouteGroup,
    // Runtime
    RuntimeAdapter,
    RuntimeError,
    ServiceId,
    TrellisError,
    keys,
};

pub use trellis_std::{
    ActiveGroup, Batch, ConfigError, Diagnostics, Dispatcher, DispatcherBuilder, DispatcherConfig,
    MemoryRuntime, PassReport, ProviderRegistry, RegistrySnapshot, Resolved,
};

/// Conflict resolution rules.
pub mod resolve {
    pub use trellis_std::resolve::{precedence, resolve_names, resolve_paths};
}

/// Dependency validation.
pub mod validate {
    pub use trellis_std::validate::{
        GroupValidation, requirements_met, validate_group, validate_handlers,
    };
}

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use trellis_std::testing::*;
}

/// Prelude module - common imports for Trellis.
///
/// # Usage
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Component, Contracts, DispatchError, Dispatcher, DispatcherConfig, FailureReason, Filter,
        Marker, MemoryRuntime, Payload, Properties, PropertyValue, RuntimeAdapter, ServiceId,
        keys,
    };
}
