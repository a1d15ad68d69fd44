//! # Dependency Validator
//!
//! Checks `requires` filters against what a route group actually offers.
//!
//! A requirement is met when it matches, in order:
//!
//! 1. the properties of another interceptor attached to the same group,
//! 2. the group's own selection properties,
//! 3. the runtime's properties.
//!
//! Interceptor requirements cascade: detaching one interceptor can break the
//! requirements of others, so [`validate_group`] iterates to a fixpoint before
//! it checks the group's own requirements. Handler requirements never cascade.

use std::collections::HashSet;
use trellis_core::{ContentProvider, Filter, Properties, Provider, RouteGroup, ServiceId};

/// Outcome of [`validate_group`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GroupValidation {
    /// Interceptors detached because their requirements failed.
    pub detached: Vec<ServiceId>,
    /// Whether the group's own requirements are met by what is left.
    pub group_satisfied: bool,
}

/// Whether every requirement of `provider` is met in the context of a group.
pub fn requirements_met(
    provider: &Provider,
    interceptors: &[ContentProvider],
    group: &RouteGroup,
    runtime: &Properties,
) -> bool {
    provider
        .requires()
        .iter()
        .all(|filter| requirement_met(filter, provider.service_id(), interceptors, group, runtime))
}

fn requirement_met(
    filter: &Filter,
    requester: ServiceId,
    interceptors: &[ContentProvider],
    group: &RouteGroup,
    runtime: &Properties,
) -> bool {
    interceptors.iter().any(|peer| {
        peer.provider().service_id() != requester && filter.matches(peer.provider().properties())
    }) || filter.matches(group.selection_properties())
        || filter.matches(runtime)
}

/// Detaches interceptors with unmet requirements until stable, then checks the
/// group's own requirements against the remaining set.
pub fn validate_group(
    group: &RouteGroup,
    interceptors: &mut Vec<ContentProvider>,
    runtime: &Properties,
) -> GroupValidation {
    let mut detached = Vec::new();
    loop {
        let current: &[ContentProvider] = interceptors.as_slice();
        let failing: HashSet<ServiceId> = current
            .iter()
            .filter(|i| !requirements_met(i.provider(), current, group, runtime))
            .map(|i| i.provider().service_id())
            .collect();
        if failing.is_empty() {
            break;
        }
        interceptors.retain(|i| !failing.contains(&i.provider().service_id()));
        let mut round: Vec<_> = failing.into_iter().collect();
        round.sort();
        detached.extend(round);
    }

    let group_satisfied = requirements_met(group.provider(), interceptors, group, runtime);
    GroupValidation {
        detached,
        group_satisfied,
    }
}

/// Detaches handlers whose requirements the group's final interceptor set does
/// not meet. Returns the detached handler ids.
pub fn validate_handlers(
    group: &RouteGroup,
    interceptors: &[ContentProvider],
    handlers: &mut Vec<ContentProvider>,
    runtime: &Properties,
) -> Vec<ServiceId> {
    let mut detached = Vec::new();
    handlers.retain(|h| {
        let ok = requirements_met(h.provider(), interceptors, group, runtime);
        if !ok {
            detached.push(h.provider().service_id());
        }
        ok
    });
    detached
}
