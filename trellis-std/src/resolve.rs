//! # Conflict Resolver
//!
//! Collision rules for route-group paths and provider names.
//!
//! Both rules walk candidates in precedence order and keep the first claimant
//! of each key:
//!
//! 1. Rank (higher wins)
//! 2. Service id (lower, i.e. older, wins)
//!
//! Paths are resolved first, over route groups only. Names are resolved next,
//! over every surviving provider regardless of kind. Generated names never
//! collide.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};
use trellis_core::{ContentProvider, Provider, ProviderKind, RouteGroup, ServiceId};

/// Compares two providers by precedence; `Less` means `a` wins.
pub fn precedence(a: &Provider, b: &Provider) -> Ordering {
    b.rank()
        .cmp(&a.rank())
        .then_with(|| a.service_id().cmp(&b.service_id()))
}

/// Keeps the highest-precedence group for each path.
///
/// Returns the shadowed groups; `groups` is left holding the winners in their
/// original order. The implicit default always loses a path collision.
pub fn resolve_paths(groups: &mut Vec<RouteGroup>) -> Vec<RouteGroup> {
    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (&groups[a], &groups[b]);
        a.is_implicit_default()
            .cmp(&b.is_implicit_default())
            .then_with(|| precedence(a.provider(), b.provider()))
    });

    let mut claimed = HashSet::new();
    let mut losers = HashSet::new();
    for index in order {
        if !claimed.insert(groups[index].path().to_owned()) {
            losers.insert(index);
        }
    }

    let mut shadowed = Vec::new();
    let mut index = 0;
    groups.retain(|group| {
        let keep = !losers.contains(&index);
        if !keep {
            shadowed.push(group.clone());
        }
        index += 1;
        keep
    });
    shadowed
}

/// Keeps the highest-precedence provider for each declared name.
///
/// Considers groups, handlers and interceptors together and removes the
/// losers from their lists, returning them.
pub fn resolve_names(
    groups: &mut Vec<RouteGroup>,
    handlers: &mut Vec<ContentProvider>,
    interceptors: &mut Vec<ContentProvider>,
) -> Vec<Provider> {
    let mut named: Vec<&Provider> = groups
        .iter()
        .map(RouteGroup::provider)
        .chain(handlers.iter().map(ContentProvider::provider))
        .chain(interceptors.iter().map(ContentProvider::provider))
        .filter(|p| !p.has_generated_name())
        .collect();
    named.sort_by(|a, b| precedence(a, b));

    let mut winners: HashMap<&str, (ProviderKind, ServiceId)> = HashMap::new();
    let mut losers: HashSet<(ProviderKind, ServiceId)> = HashSet::new();
    let mut duplicates = Vec::new();
    for provider in named {
        let key = (provider.kind(), provider.service_id());
        if winners.contains_key(provider.name()) {
            losers.insert(key);
            duplicates.push(provider.clone());
        } else {
            winners.insert(provider.name(), key);
        }
    }
    drop(winners);

    if !losers.is_empty() {
        let lost = |p: &Provider| losers.contains(&(p.kind(), p.service_id()));
        groups.retain(|g| !lost(g.provider()));
        handlers.retain(|h| !lost(h.provider()));
        interceptors.retain(|i| !lost(i.provider()));
    }
    duplicates
}
