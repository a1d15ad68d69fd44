//! In-process runtime adapter.
//!
//! [`MemoryRuntime`] serves route groups from memory. Requests resolve to the
//! group with the longest matching path, then to a handler through a
//! `matchit` router built from the handlers' `route` templates.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use trellis_core::{Properties, RouteGroup, RuntimeAdapter, RuntimeError, ServiceId, keys};

/// Where a request path lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Name of the serving group.
    pub group: String,
    /// Name of the matched handler, if a route matched.
    pub handler: Option<String>,
    /// Captured route parameters.
    pub params: Vec<(String, String)>,
}

struct Mounted {
    group: RouteGroup,
    routes: matchit::Router<String>,
}

impl Mounted {
    fn build(group: &RouteGroup) -> Result<Self, RuntimeError> {
        let mut routes = matchit::Router::new();
        for handler in group.handlers() {
            let Some(template) = handler.provider().properties().get_str(keys::ROUTE) else {
                continue;
            };
            let template = if template.starts_with('/') {
                template.to_owned()
            } else {
                format!("/{template}")
            };
            routes
                .insert(template.clone(), handler.provider().name().to_owned())
                .map_err(|e| RuntimeError::Rejected {
                    group: group.provider().name().to_owned(),
                    reason: format!("route `{template}`: {e}"),
                })?;
        }
        Ok(Self {
            group: group.clone(),
            routes,
        })
    }
}

/// A runtime that keeps registered groups in memory.
#[derive(Default)]
pub struct MemoryRuntime {
    properties: RwLock<Properties>,
    groups: RwLock<BTreeMap<ServiceId, Mounted>>,
}

impl MemoryRuntime {
    /// An empty runtime without properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty runtime advertising `properties` to target filters.
    pub fn with_properties(properties: Properties) -> Self {
        Self {
            properties: RwLock::new(properties),
            groups: RwLock::default(),
        }
    }

    /// Replace the advertised properties. Takes effect on the next pass.
    pub fn set_properties(&self, properties: Properties) {
        *self.properties.write() = properties;
    }

    /// The registered group with this name.
    pub fn group(&self, name: &str) -> Option<RouteGroup> {
        self.groups
            .read()
            .values()
            .find(|m| m.group.provider().name() == name)
            .map(|m| m.group.clone())
    }

    /// Names of registered groups, by service id.
    pub fn group_names(&self) -> Vec<String> {
        self.groups
            .read()
            .values()
            .map(|m| m.group.provider().name().to_owned())
            .collect()
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Whether no group is registered.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Resolve a request path.
    pub fn resolve(&self, path: &str) -> Option<Resolved> {
        let groups = self.groups.read();
        let (mounted, rest) = groups
            .values()
            .filter_map(|m| strip_base(m.group.path(), path).map(|rest| (m, rest)))
            .max_by_key(|(m, _)| m.group.path().len())?;

        let (handler, params) = match mounted.routes.at(rest) {
            Ok(found) => (
                Some(found.value.clone()),
                found
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect(),
            ),
            Err(_) => (None, Vec::new()),
        };
        Some(Resolved {
            group: mounted.group.provider().name().to_owned(),
            handler,
            params,
        })
    }
}

/// The part of `path` below `base`, if `base` is a whole-segment prefix.
fn strip_base<'a>(base: &str, path: &'a str) -> Option<&'a str> {
    if base == "/" {
        return path.starts_with('/').then_some(path);
    }
    if path == base {
        return Some("/");
    }
    path.strip_prefix(base).filter(|rest| rest.starts_with('/'))
}

impl RuntimeAdapter for MemoryRuntime {
    fn register_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        let id = group.provider().service_id();
        if self.groups.read().contains_key(&id) {
            return Err(RuntimeError::Rejected {
                group: group.provider().name().to_owned(),
                reason: "already registered".to_owned(),
            });
        }
        let mounted = Mounted::build(group)?;
        self.groups.write().insert(id, mounted);
        Ok(())
    }

    fn unregister_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        self.groups
            .write()
            .remove(&group.provider().service_id())
            .map(drop)
            .ok_or_else(|| RuntimeError::NotRegistered(group.provider().name().to_owned()))
    }

    fn reload_group(&self, group: &RouteGroup) -> Result<(), RuntimeError> {
        let id = group.provider().service_id();
        if !self.groups.read().contains_key(&id) {
            return Err(RuntimeError::NotRegistered(group.provider().name().to_owned()));
        }
        let mounted = Mounted::build(group)?;
        self.groups.write().insert(id, mounted);
        Ok(())
    }

    fn is_registered(&self, group: &RouteGroup) -> bool {
        self.groups
            .read()
            .contains_key(&group.provider().service_id())
    }

    fn properties(&self) -> Properties {
        self.properties.read().clone()
    }
}
