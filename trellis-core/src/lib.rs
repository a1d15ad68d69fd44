//! # trellis-core
//!
//! Core model for the Trellis route-group reconciliation engine.
//!
//! This crate has minimal dependencies and is what runtime adapters and
//! content authors import. The reconciliation engine itself lives in
//! `trellis-std`.
//!
//! # Building Blocks
//!
//! ## Filters ([`Filter`])
//!
//! Small boolean predicates over [`Properties`]. Providers use them to say
//! which runtime they apply to, which route groups they attach to, and which
//! interceptors they depend on.
//!
//! ## Providers ([`Provider`], [`RouteGroup`], [`ContentProvider`])
//!
//! Typed records built from a `(payload, properties)` pair. Building one never
//! fails; a malformed property map yields a provider carrying a
//! [`FailureReason`].
//!
//! ## Payloads ([`Payload`])
//!
//! Handles to the content itself, shared or produced per consumer.
//!
//! ## Seams ([`RuntimeAdapter`], [`DiagnosticsTracker`])
//!
//! What the hosting server implements, and where failure snapshots go.
//!
//! # Error Types
//!
//! - [`TrellisError`] - Top-level error type
//! - [`FilterError`] - Filter parse errors
//! - [`RuntimeError`] - Runtime adapter failures
//! - [`DispatchError`] - Dispatcher lifecycle errors

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod diagnostics;
mod error;
mod filter;
mod payload;
mod properties;
mod provider;
mod runtime;

// Re-exports
pub use diagnostics::{DiagnosticsTracker, FailedProvider, FailureSnapshot};
pub use error::{BoxError, DispatchError, FilterError, RuntimeError, TrellisError};
pub use filter::Filter;
pub use payload::{Acquired, Component, ComponentFactory, Contracts, Marker, Payload};
pub use properties::{Properties, PropertyValue, keys};
pub use provider::{
    ContentProvider, DEFAULT_GROUP_NAME, FailureReason, Provider, ProviderKind, RESERVED_PREFIXES,
    RouteGroup, ServiceId,
};
pub use runtime::RuntimeAdapter;
