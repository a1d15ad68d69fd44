//! # trellis-std
//!
//! The reconciliation engine and standard runtimes for Trellis.
//!
//! This crate provides:
//! - **Registry**: [`ProviderRegistry`], the concurrent provider caches
//! - **Resolution**: path and name conflict rules ([`resolve`])
//! - **Validation**: `requires` checking with cascading detachment ([`validate`])
//! - **Dispatch**: [`Dispatcher`], which turns provider events into runtime calls
//! - **Diagnostics**: [`Diagnostics`], the latest failures and active groups
//! - **Runtimes**: [`MemoryRuntime`], an in-process adapter
//! - **Testing**: [`testing`] helpers and a recording runtime

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core model
pub use trellis_core;

// Modules
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod registry;
pub mod resolve;
pub mod runtime;
pub mod testing;
pub mod validate;

pub use config::{ConfigError, DispatcherConfig};
pub use diagnostics::{ActiveGroup, Diagnostics};
pub use dispatcher::{Batch, Dispatcher, DispatcherBuilder, PassReport};
pub use registry::{ProviderRegistry, RegistrySnapshot};
pub use runtime::{MemoryRuntime, Resolved};
