//! # Provider Model
//!
//! Normalizes a raw `(payload, properties)` pair into a typed record.
//!
//! Construction is pure: it never touches the payload and never fails. Problems
//! with the property map are recorded as a [`FailureReason`] on the resulting
//! provider, which the dispatcher then reports and excludes.
//!
//! - [`Provider`] holds what every kind shares (identity, rank, filters)
//! - [`RouteGroup`] adds a path and the content attached by the last pass
//! - [`ContentProvider`] is a handler or an interceptor with its group selector

use crate::{
    filter::Filter,
    payload::Payload,
    properties::{Properties, PropertyValue, keys},
};
use std::{fmt, sync::Arc};

/// Prefixes reserved for generated names.
pub const RESERVED_PREFIXES: [&str; 2] = [".", "trellis."];

/// Name of the implicit default route group.
pub const DEFAULT_GROUP_NAME: &str = ".default";

/// Monotonic identity of a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u64);

impl ServiceId {
    /// Identity of the implicit default group.
    pub const IMPLICIT_DEFAULT: ServiceId = ServiceId(0);
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// A path-scoped container registered with the runtime.
    RouteGroup,
    /// Request-serving logic attached to groups.
    Handler,
    /// Cross-cutting component attached to groups.
    Interceptor,
}

impl ProviderKind {
    /// The property that must be truthy for this kind.
    pub fn discriminator(self) -> &'static str {
        match self {
            ProviderKind::RouteGroup => keys::ROUTE_GROUP,
            ProviderKind::Handler => keys::ROUTE_HANDLER,
            ProviderKind::Interceptor => keys::ROUTE_INTERCEPTOR,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ProviderKind::RouteGroup => "group",
            ProviderKind::Handler => "handler",
            ProviderKind::Interceptor => "interceptor",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a provider was excluded from the active assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The type discriminator is missing or false, or a required key is absent.
    Invalid,
    /// A filter does not parse, or the declared name or rank is not allowed.
    ValidationFailed,
    /// Lost a path or default-group conflict.
    ShadowedByOtherService,
    /// Lost a name conflict.
    DuplicateName,
    /// Matched no route group and could not fall back to the default.
    RequiredApplicationUnavailable,
    /// A declared requirement could not be satisfied.
    RequiredExtensionsUnavailable,
    /// The content fulfils no interceptor contract.
    NotAnExtensionType,
    /// The content could not be acquired.
    ServiceNotGettable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Invalid => "invalid",
            FailureReason::ValidationFailed => "validation failed",
            FailureReason::ShadowedByOtherService => "shadowed by other service",
            FailureReason::DuplicateName => "duplicate name",
            FailureReason::RequiredApplicationUnavailable => "required application unavailable",
            FailureReason::RequiredExtensionsUnavailable => "required extensions unavailable",
            FailureReason::NotAnExtensionType => "not an extension type",
            FailureReason::ServiceNotGettable => "service not gettable",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Metadata and status shared by every provider kind.
#[derive(Debug, Clone)]
pub struct Provider {
    service_id: ServiceId,
    kind: ProviderKind,
    name: String,
    generated_name: bool,
    rank: i32,
    revision: u64,
    failure: Option<FailureReason>,
    target: Option<Filter>,
    requires: Vec<Filter>,
    properties: Arc<Properties>,
    payload: Payload,
}

impl Provider {
    /// Build a provider record of the given kind.
    pub fn new(
        kind: ProviderKind,
        service_id: ServiceId,
        revision: u64,
        payload: Payload,
        properties: Properties,
    ) -> Self {
        let mut failure = None;
        let mut note = |reason: FailureReason| {
            failure.get_or_insert(reason);
        };

        if !properties.is_truthy(kind.discriminator()) {
            note(FailureReason::Invalid);
        }

        let target = match properties.get_str(keys::TARGET) {
            Some(expr) => Filter::parse(expr).ok().or_else(|| {
                note(FailureReason::ValidationFailed);
                None
            }),
            None if properties.contains(keys::TARGET) => {
                note(FailureReason::ValidationFailed);
                None
            }
            None => None,
        };

        let requires = match properties.get(keys::REQUIRES) {
            None => Vec::new(),
            Some(value) => match parse_filters(value) {
                Some(filters) => filters,
                None => {
                    note(FailureReason::ValidationFailed);
                    Vec::new()
                }
            },
        };

        let rank = match properties.get(keys::RANK) {
            None => 0,
            Some(value) => match value.as_int().and_then(|r| i32::try_from(r).ok()) {
                Some(rank) => rank,
                None => {
                    note(FailureReason::ValidationFailed);
                    0
                }
            },
        };

        let (name, generated_name) = match properties.get_str(keys::NAME) {
            Some(declared) => {
                if declared.is_empty() || RESERVED_PREFIXES.iter().any(|p| declared.starts_with(p))
                {
                    note(FailureReason::ValidationFailed);
                }
                (declared.to_owned(), false)
            }
            None => (format!(".generated.{}.{}", kind, service_id.0), true),
        };

        Self {
            service_id,
            kind,
            name,
            generated_name,
            rank,
            revision,
            failure,
            target,
            requires,
            properties: Arc::new(properties),
            payload,
        }
    }

    /// Registry identity.
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Provider kind.
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Unique identifier; the declared or generated name.
    pub fn id(&self) -> &str {
        &self.name
    }

    /// Declared name, or a generated one.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name was generated rather than declared.
    pub fn has_generated_name(&self) -> bool {
        self.generated_name
    }

    /// Rank; higher wins conflicts.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Bumped on every update of the same service.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Failure found while building the record.
    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Whether the record itself is well formed.
    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }

    /// Filter over runtime properties.
    pub fn target(&self) -> Option<&Filter> {
        self.target.as_ref()
    }

    /// Filters over interceptor properties.
    pub fn requires(&self) -> &[Filter] {
        &self.requires
    }

    /// The registered property map.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Content handle.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Whether this provider applies to a runtime with the given properties.
    pub fn applies_to(&self, runtime: &Properties) -> bool {
        self.target.as_ref().is_none_or(|f| f.matches(runtime))
    }

    fn fail(&mut self, reason: FailureReason) {
        self.failure.get_or_insert(reason);
    }
}

impl PartialEq for Provider {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id && self.kind == other.kind
    }
}

impl Eq for Provider {}

fn parse_filters(value: &PropertyValue) -> Option<Vec<Filter>> {
    match value {
        PropertyValue::Str(expr) => Filter::parse(expr).ok().map(|f| vec![f]),
        PropertyValue::List(items) => items
            .iter()
            .map(|item| item.as_str().and_then(|expr| Filter::parse(expr).ok()))
            .collect(),
        PropertyValue::Bool(_) | PropertyValue::Int(_) => None,
    }
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

// ============================================================================
// RouteGroup
// ============================================================================

/// A path-scoped container of handlers and interceptors.
#[derive(Debug, Clone)]
pub struct RouteGroup {
    provider: Provider,
    path: String,
    is_default: bool,
    is_legacy: bool,
    selection: Arc<Properties>,
    attached: Vec<ContentProvider>,
    changed: bool,
}

impl RouteGroup {
    /// Build a route-group record from registry input.
    pub fn new(service_id: ServiceId, revision: u64, payload: Payload, properties: Properties) -> Self {
        let raw_path = properties
            .get_str(keys::PATH)
            .or_else(|| properties.get_str(keys::BASE))
            .map(str::to_owned);
        let is_default = properties.is_truthy(keys::DEFAULT);
        let is_legacy = properties.is_truthy(keys::LEGACY);
        let mut provider = Provider::new(
            ProviderKind::RouteGroup,
            service_id,
            revision,
            payload,
            properties,
        );
        if raw_path.is_none() {
            provider.fail(FailureReason::Invalid);
        }
        let path = normalize_path(raw_path.as_deref().unwrap_or("/"));
        Self::assemble(provider, path, is_default, is_legacy)
    }

    /// The built-in default group used when no explicit default exists.
    pub fn implicit_default(path: &str, payload: Payload) -> Self {
        let properties = Properties::new()
            .with(keys::ROUTE_GROUP, true)
            .with(keys::DEFAULT, true);
        let mut provider = Provider::new(
            ProviderKind::RouteGroup,
            ServiceId::IMPLICIT_DEFAULT,
            0,
            payload,
            properties,
        );
        provider.name = DEFAULT_GROUP_NAME.to_owned();
        provider.rank = i32::MIN;
        Self::assemble(provider, normalize_path(path), true, false)
    }

    fn assemble(provider: Provider, path: String, is_default: bool, is_legacy: bool) -> Self {
        let mut selection = Properties::clone(provider.properties());
        selection.insert(keys::NAME, provider.name());
        selection.insert(keys::PATH, path.as_str());
        Self {
            provider,
            path,
            is_default,
            is_legacy,
            selection: Arc::new(selection),
            attached: Vec::new(),
            changed: false,
        }
    }

    /// Common provider data.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Normalized path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this group declares itself the default.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Whether this is the built-in default group.
    pub fn is_implicit_default(&self) -> bool {
        self.provider.service_id == ServiceId::IMPLICIT_DEFAULT
    }

    /// Whether the group wraps externally authored content.
    pub fn is_legacy(&self) -> bool {
        self.is_legacy
    }

    /// Properties group-select filters are evaluated against.
    ///
    /// The registered map plus the effective `name` and normalized `path`.
    pub fn selection_properties(&self) -> &Properties {
        &self.selection
    }

    /// Content bound by the last reconciliation pass.
    pub fn attached(&self) -> &[ContentProvider] {
        &self.attached
    }

    /// Attached interceptors.
    pub fn interceptors(&self) -> impl Iterator<Item = &ContentProvider> {
        self.attached
            .iter()
            .filter(|c| c.kind() == ProviderKind::Interceptor)
    }

    /// Attached handlers.
    pub fn handlers(&self) -> impl Iterator<Item = &ContentProvider> {
        self.attached
            .iter()
            .filter(|c| c.kind() == ProviderKind::Handler)
    }

    /// Whether the group differs from what the runtime last saw.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// A copy of this group with a freshly computed attachment set.
    pub fn with_attached(mut self, attached: Vec<ContentProvider>) -> Self {
        self.attached = attached;
        self
    }

    /// A copy of this group with the dirty bit set or cleared.
    pub fn with_changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }
}

// ============================================================================
// ContentProvider
// ============================================================================

/// A handler or interceptor.
#[derive(Debug, Clone)]
pub struct ContentProvider {
    provider: Provider,
    select: Option<Filter>,
}

impl ContentProvider {
    /// Build a handler record from registry input.
    pub fn handler(service_id: ServiceId, revision: u64, payload: Payload, properties: Properties) -> Self {
        Self::new(ProviderKind::Handler, service_id, revision, payload, properties)
    }

    /// Build an interceptor record from registry input.
    pub fn interceptor(
        service_id: ServiceId,
        revision: u64,
        payload: Payload,
        properties: Properties,
    ) -> Self {
        Self::new(ProviderKind::Interceptor, service_id, revision, payload, properties)
    }

    fn new(
        kind: ProviderKind,
        service_id: ServiceId,
        revision: u64,
        payload: Payload,
        properties: Properties,
    ) -> Self {
        let select_expr = properties.get(keys::SELECT).cloned();
        let mut provider = Provider::new(kind, service_id, revision, payload, properties);
        let select = match select_expr {
            None => None,
            Some(PropertyValue::Str(expr)) => match Filter::parse(&expr) {
                Ok(filter) => Some(filter),
                Err(_) => {
                    provider.fail(FailureReason::ValidationFailed);
                    None
                }
            },
            Some(_) => {
                provider.fail(FailureReason::ValidationFailed);
                None
            }
        };
        Self { provider, select }
    }

    /// Common provider data.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Handler or interceptor.
    pub fn kind(&self) -> ProviderKind {
        self.provider.kind
    }

    /// Filter over route-group properties.
    pub fn select(&self) -> Option<&Filter> {
        self.select.as_ref()
    }

    /// Whether all groups share one instance of the content.
    pub fn is_singleton(&self) -> bool {
        self.provider.payload.is_singleton()
    }

    /// Whether this content may be attached to `group`.
    ///
    /// With a selector the group's selection properties must match; without
    /// one only default groups qualify. Legacy groups take no handlers.
    pub fn selects(&self, group: &RouteGroup) -> bool {
        if group.is_legacy() && self.kind() == ProviderKind::Handler {
            return false;
        }
        match &self.select {
            Some(filter) => filter.matches(group.selection_properties()),
            None => group.is_default(),
        }
    }
}
