//! Error types for Trellis.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`TrellisError`] - Top-level error type
//! - [`FilterError`] - Malformed filter expressions
//! - [`RuntimeError`] - Failures reported by a runtime adapter
//! - [`DispatchError`] - Errors from the dispatcher lifecycle
//!
//! Provider exclusion is not an error: it is recorded as a
//! [`FailureReason`](crate::FailureReason) on the excluded provider.

use std::time::Duration;
use thiserror::Error;

use crate::{ProviderKind, ServiceId};

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all Trellis operations.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// A filter expression could not be parsed.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// The runtime adapter rejected an operation.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The dispatcher could not perform the request.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A custom error occurred.
    #[error(transparent)]
    Custom(BoxError),
}

/// A filter expression failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid filter `{expression}` at offset {offset}: {message}")]
pub struct FilterError {
    /// The expression that was being parsed.
    pub expression: String,
    /// Byte offset where parsing stopped.
    pub offset: usize,
    /// What was expected at that offset.
    pub message: String,
}

impl FilterError {
    pub(crate) fn new(expression: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_owned(),
            offset,
            message: message.into(),
        }
    }
}

/// Errors raised by a [`RuntimeAdapter`](crate::RuntimeAdapter) call.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The runtime refused the group.
    #[error("runtime rejected group `{group}`: {reason}")]
    Rejected {
        /// Name of the group.
        group: String,
        /// Why the runtime refused it.
        reason: String,
    },

    /// The group is not registered with the runtime.
    #[error("group `{0}` is not registered")]
    NotRegistered(String),

    /// The adapter panicked during the call.
    #[error("runtime adapter panicked: {0}")]
    Panic(String),

    /// A custom runtime error.
    #[error(transparent)]
    Custom(BoxError),
}

/// Errors from the dispatcher lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher has been closed.
    #[error("dispatcher has been closed")]
    Closed,

    /// A running pass did not finish within the shutdown timeout.
    #[error("reconciliation pass still running after {0:?}")]
    ShutdownTimeout(Duration),

    /// A declared service id already belongs to a provider of another kind.
    #[error("service id {service_id} is already held by a {owner}")]
    ServiceIdInUse {
        /// The contested id.
        service_id: ServiceId,
        /// Kind of the provider holding it.
        owner: ProviderKind,
    },
}

impl From<BoxError> for TrellisError {
    fn from(err: BoxError) -> Self {
        TrellisError::Custom(err)
    }
}

impl From<BoxError> for RuntimeError {
    fn from(err: BoxError) -> Self {
        RuntimeError::Custom(err)
    }
}
