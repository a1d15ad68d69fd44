//! Payload handles for provider content.
//!
//! A provider's content is either a shared singleton or a factory that hands
//! out a fresh instance per consumer. Both are reached through [`Payload`];
//! [`Payload::acquire`] returns an [`Acquired`] guard that gives the instance
//! back to its factory when dropped, so a consumer never holds more than one
//! outstanding acquisition.

use crate::error::BoxError;
use bitflags::bitflags;
use std::{any::Any, fmt, ops::Deref, sync::Arc};

bitflags! {
    /// Interceptor contracts a component can fulfil.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Contracts: u16 {
        /// Runs before request dispatch.
        const REQUEST_FILTER = 1 << 0;
        /// Runs after the handler produced a response.
        const RESPONSE_FILTER = 1 << 1;
        /// Decodes request bodies.
        const READER = 1 << 2;
        /// Encodes response bodies.
        const WRITER = 1 << 3;
        /// Turns errors into responses.
        const EXCEPTION_MAPPER = 1 << 4;
        /// Supplies shared context objects.
        const CONTEXT_RESOLVER = 1 << 5;
        /// Configures the group it is attached to.
        const FEATURE = 1 << 6;
    }
}

/// A unit of content carried by a provider.
///
/// Handlers and route groups may leave [`contracts`](Component::contracts)
/// empty; interceptors must advertise at least one contract.
pub trait Component: Any + Send + Sync {
    /// Interceptor contracts this component fulfils.
    fn contracts(&self) -> Contracts {
        Contracts::empty()
    }

    /// Upcast for downcasting by the runtime.
    fn as_any(&self) -> &dyn Any;
}

/// A source of per-consumer component instances.
pub trait ComponentFactory: Send + Sync + 'static {
    /// Produce an instance for one consumer.
    fn acquire(&self) -> Result<Arc<dyn Component>, BoxError>;

    /// Take back an instance produced by [`acquire`](ComponentFactory::acquire).
    fn release(&self, component: Arc<dyn Component>) {
        drop(component);
    }
}

#[derive(Clone)]
enum Source {
    Singleton(Arc<dyn Component>),
    Factory(Arc<dyn ComponentFactory>),
}

/// Cloneable handle to a provider's content.
#[derive(Clone)]
pub struct Payload {
    source: Source,
}

impl Payload {
    /// Content shared by every consumer.
    pub fn singleton<C: Component>(component: C) -> Self {
        Self {
            source: Source::Singleton(Arc::new(component)),
        }
    }

    /// Content produced once per consumer.
    pub fn factory<F: ComponentFactory>(factory: F) -> Self {
        Self {
            source: Source::Factory(Arc::new(factory)),
        }
    }

    /// Whether every consumer shares one instance.
    pub fn is_singleton(&self) -> bool {
        matches!(self.source, Source::Singleton(_))
    }

    /// Acquire an instance; it is released when the guard drops.
    pub fn acquire(&self) -> Result<Acquired, BoxError> {
        match &self.source {
            Source::Singleton(component) => Ok(Acquired {
                component: Arc::clone(component),
                factory: None,
            }),
            Source::Factory(factory) => Ok(Acquired {
                component: factory.acquire()?,
                factory: Some(Arc::clone(factory)),
            }),
        }
    }

    /// Whether two handles point at the same content source.
    pub fn same_source(&self, other: &Payload) -> bool {
        match (&self.source, &other.source) {
            (Source::Singleton(a), Source::Singleton(b)) => Arc::ptr_eq(a, b),
            (Source::Factory(a), Source::Factory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_singleton() {
            "singleton"
        } else {
            "factory"
        };
        f.debug_struct("Payload").field("kind", &kind).finish()
    }
}

/// An acquired component; returned to its factory on drop.
pub struct Acquired {
    component: Arc<dyn Component>,
    factory: Option<Arc<dyn ComponentFactory>>,
}

impl Deref for Acquired {
    type Target = dyn Component;

    fn deref(&self) -> &Self::Target {
        self.component.as_ref()
    }
}

impl Drop for Acquired {
    fn drop(&mut self) {
        if let Some(factory) = self.factory.take() {
            factory.release(Arc::clone(&self.component));
        }
    }
}

/// A plain component with fixed contracts.
///
/// Useful for providers whose content is only a marker, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Marker(pub Contracts);

impl Component for Marker {
    fn contracts(&self) -> Contracts {
        self.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
