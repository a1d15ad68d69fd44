//! # Provider Registry
//!
//! Concurrent caches of the route groups, handlers and interceptors currently
//! known, plus the providers removed since the last pass.
//!
//! Mutations take a short write lock on one map and never wait for a
//! reconciliation pass. A pass reads the caches through [`ProviderRegistry::snapshot`],
//! which drains the pending-removal sets and clones the live entries, so the
//! pipeline always works on immutable values.
//!
//! A service id names one provider across all three kinds: upserting a
//! provider under an id another kind already holds is rejected.

use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};
use trellis_core::{
    ContentProvider, DispatchError, Payload, Properties, PropertyValue, ProviderKind, RouteGroup, ServiceId,
    keys,
};

/// Immutable view of the registry taken at the start of a pass.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Live route groups, ordered by service id.
    pub groups: Vec<RouteGroup>,
    /// Live handlers, ordered by service id.
    pub handlers: Vec<ContentProvider>,
    /// Live interceptors, ordered by service id.
    pub interceptors: Vec<ContentProvider>,
    /// Groups removed since the previous snapshot.
    pub removed_groups: Vec<RouteGroup>,
    /// Handlers and interceptors removed since the previous snapshot.
    pub removed_content: Vec<ContentProvider>,
}

/// Keyed caches of live providers.
pub struct ProviderRegistry {
    next_id: AtomicU64,
    next_revision: AtomicU64,
    groups: RwLock<HashMap<ServiceId, RouteGroup>>,
    handlers: RwLock<HashMap<ServiceId, ContentProvider>>,
    interceptors: RwLock<HashMap<ServiceId, ContentProvider>>,
    owners: Mutex<HashMap<ServiceId, ProviderKind>>,
    removed_groups: Mutex<Vec<RouteGroup>>,
    removed_content: Mutex<Vec<ContentProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            // 0 is the implicit default group.
            next_id: AtomicU64::new(1),
            next_revision: AtomicU64::new(1),
            groups: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            interceptors: RwLock::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
            removed_groups: Mutex::new(Vec::new()),
            removed_content: Mutex::new(Vec::new()),
        }
    }

    /// Insert or replace a provider of the given kind.
    ///
    /// The service id is taken from the `service.id` property when present and
    /// assigned otherwise; the returned id is the cache key either way.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ServiceIdInUse`] when a provider of another kind
    /// holds the declared id.
    pub fn upsert(
        &self,
        kind: ProviderKind,
        payload: Payload,
        mut properties: Properties,
    ) -> Result<ServiceId, DispatchError> {
        let service_id = self.service_id_for(&mut properties);
        let mut owners = self.owners.lock();
        if let Some(&owner) = owners.get(&service_id).filter(|owner| **owner != kind) {
            return Err(DispatchError::ServiceIdInUse { service_id, owner });
        }
        owners.insert(service_id, kind);

        let revision = self.next_revision.fetch_add(1, Ordering::Relaxed);
        match kind {
            ProviderKind::RouteGroup => {
                let group = RouteGroup::new(service_id, revision, payload, properties);
                self.groups.write().insert(service_id, group);
            }
            ProviderKind::Handler => {
                let handler = ContentProvider::handler(service_id, revision, payload, properties);
                self.handlers.write().insert(service_id, handler);
            }
            ProviderKind::Interceptor => {
                let interceptor =
                    ContentProvider::interceptor(service_id, revision, payload, properties);
                self.interceptors.write().insert(service_id, interceptor);
            }
        }
        Ok(service_id)
    }

    /// Move a provider to the pending-removal set.
    ///
    /// Returns `false` when no provider of that kind has this id.
    pub fn remove(&self, kind: ProviderKind, service_id: ServiceId) -> bool {
        let mut owners = self.owners.lock();
        if owners.get(&service_id) != Some(&kind) {
            return false;
        }
        owners.remove(&service_id);
        match kind {
            ProviderKind::RouteGroup => match self.groups.write().remove(&service_id) {
                Some(group) => {
                    self.removed_groups.lock().push(group);
                    true
                }
                None => false,
            },
            ProviderKind::Handler => self.remove_content(&self.handlers, service_id),
            ProviderKind::Interceptor => self.remove_content(&self.interceptors, service_id),
        }
    }

    /// Remove whichever provider has this id.
    pub fn remove_any(&self, service_id: ServiceId) -> Option<ProviderKind> {
        [
            ProviderKind::RouteGroup,
            ProviderKind::Handler,
            ProviderKind::Interceptor,
        ]
        .into_iter()
        .find(|kind| self.remove(*kind, service_id))
    }

    fn remove_content(
        &self,
        map: &RwLock<HashMap<ServiceId, ContentProvider>>,
        service_id: ServiceId,
    ) -> bool {
        match map.write().remove(&service_id) {
            Some(content) => {
                self.removed_content.lock().push(content);
                true
            }
            None => false,
        }
    }

    /// Drain pending removals, then clone the live caches.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let removed_groups = std::mem::take(&mut *self.removed_groups.lock());
        let removed_content = std::mem::take(&mut *self.removed_content.lock());

        let mut groups: Vec<_> = self.groups.read().values().cloned().collect();
        let mut handlers: Vec<_> = self.handlers.read().values().cloned().collect();
        let mut interceptors: Vec<_> = self.interceptors.read().values().cloned().collect();
        groups.sort_by_key(|g| g.provider().service_id());
        handlers.sort_by_key(|h| h.provider().service_id());
        interceptors.sort_by_key(|i| i.provider().service_id());

        RegistrySnapshot {
            groups,
            handlers,
            interceptors,
            removed_groups,
            removed_content,
        }
    }

    /// Drop every cached and pending provider.
    pub fn clear(&self) {
        self.groups.write().clear();
        self.handlers.write().clear();
        self.interceptors.write().clear();
        self.owners.lock().clear();
        self.removed_groups.lock().clear();
        self.removed_content.lock().clear();
    }

    /// Number of live providers of a kind.
    pub fn len(&self, kind: ProviderKind) -> usize {
        match kind {
            ProviderKind::RouteGroup => self.groups.read().len(),
            ProviderKind::Handler => self.handlers.read().len(),
            ProviderKind::Interceptor => self.interceptors.read().len(),
        }
    }

    /// Whether no provider of any kind is cached.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
            && self.handlers.read().is_empty()
            && self.interceptors.read().is_empty()
    }

    fn service_id_for(&self, properties: &mut Properties) -> ServiceId {
        let declared = properties
            .get(keys::SERVICE_ID)
            .and_then(PropertyValue::as_int)
            .and_then(|id| u64::try_from(id).ok())
            .filter(|id| *id != ServiceId::IMPLICIT_DEFAULT.0);
        match declared {
            Some(id) => {
                self.next_id.fetch_max(id + 1, Ordering::Relaxed);
                ServiceId(id)
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                properties.insert(keys::SERVICE_ID, id);
                ServiceId(id)
            }
        }
    }
}

/// Read the service id carried by a property map.
pub fn service_id_of(properties: &Properties) -> Option<ServiceId> {
    properties
        .get(keys::SERVICE_ID)
        .and_then(PropertyValue::as_int)
        .and_then(|id| u64::try_from(id).ok())
        .map(ServiceId)
}
