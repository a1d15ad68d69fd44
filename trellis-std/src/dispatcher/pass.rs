//! A single reconciliation pass.
//!
//! The pass is a pure function of the registry snapshot, the runtime's
//! properties and what the previous pass left registered. It runs these steps
//! in order:
//!
//! 1. Retract groups removed since the last pass.
//! 2. Exclude malformed providers and skip those targeting another runtime.
//! 3. Resolve path conflicts, then name conflicts.
//! 4. Attach interceptors to the groups they select.
//! 5. Detach interceptors with unmet requirements, then drop unsatisfied groups.
//! 6. Pick the effective default group.
//! 7. Attach handlers.
//! 8. Detach handlers with unmet requirements.
//! 9. Register, reload or unregister groups whose content changed.
//! 10. Publish failures and the active group list.

use std::{
    collections::{BTreeMap, HashSet},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use trellis_core::{
    ContentProvider, DiagnosticsTracker, FailedProvider, FailureReason, FailureSnapshot,
    Properties, Provider, ProviderKind, RouteGroup, RuntimeAdapter, RuntimeError, ServiceId,
};

use crate::{
    diagnostics::{ActiveGroup, Diagnostics},
    registry::ProviderRegistry,
    resolve::{precedence, resolve_names, resolve_paths},
    validate::{validate_group, validate_handlers},
};

/// Runtime calls issued by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Groups newly registered.
    pub registered: usize,
    /// Groups reloaded in place.
    pub reloaded: usize,
    /// Groups unregistered.
    pub unregistered: usize,
    /// Runtime calls that returned an error or panicked.
    pub failed_calls: usize,
    /// Providers excluded by the pass.
    pub failures: usize,
}

impl PassReport {
    /// Total runtime calls that succeeded.
    pub fn operations(&self) -> usize {
        self.registered + self.reloaded + self.unregistered
    }
}

/// What the runtime was last told about a group.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    revision: u64,
    path: String,
    content: Vec<(ProviderKind, ServiceId, u64)>,
}

impl Fingerprint {
    fn of(group: &RouteGroup) -> Self {
        Self {
            revision: group.provider().revision(),
            path: group.path().to_owned(),
            content: group
                .attached()
                .iter()
                .map(|c| {
                    let p = c.provider();
                    (p.kind(), p.service_id(), p.revision())
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Applied {
    pub(crate) group: RouteGroup,
    fingerprint: Fingerprint,
}

/// State carried from one pass to the next. Guarded by the dispatcher lock.
#[derive(Debug, Default)]
pub(crate) struct PassState {
    pub(crate) registered: BTreeMap<ServiceId, Applied>,
    pub(crate) default: Option<ServiceId>,
    pub(crate) last_report: PassReport,
}

/// Borrowed collaborators of a pass.
pub(crate) struct PassContext<'a> {
    pub(crate) registry: &'a ProviderRegistry,
    pub(crate) runtime: &'a dyn RuntimeAdapter,
    pub(crate) diagnostics: &'a Diagnostics,
    pub(crate) trackers: &'a [Arc<dyn DiagnosticsTracker>],
    pub(crate) implicit_default: Option<&'a RouteGroup>,
}

/// A group that survived conflict resolution, with its tentative content.
struct Candidate {
    group: RouteGroup,
    interceptors: Vec<ContentProvider>,
    handlers: Vec<ContentProvider>,
}

impl Candidate {
    fn new(group: RouteGroup) -> Self {
        Self {
            group,
            interceptors: Vec::new(),
            handlers: Vec::new(),
        }
    }

    fn id(&self) -> ServiceId {
        self.group.provider().service_id()
    }

    fn content(&self, kind: ProviderKind) -> &[ContentProvider] {
        match kind {
            ProviderKind::Interceptor => &self.interceptors,
            _ => &self.handlers,
        }
    }

    fn content_mut(&mut self, kind: ProviderKind) -> &mut Vec<ContentProvider> {
        match kind {
            ProviderKind::Interceptor => &mut self.interceptors,
            _ => &mut self.handlers,
        }
    }

    fn into_group(self) -> RouteGroup {
        let mut attached = self.interceptors;
        attached.extend(self.handlers);
        self.group.with_attached(attached)
    }
}

/// Failures found so far, compared against the previous pass for logging.
struct Failures {
    previous: Arc<FailureSnapshot>,
    groups: Vec<FailedProvider>,
    handlers: Vec<FailedProvider>,
    interceptors: Vec<FailedProvider>,
}

impl Failures {
    fn new(previous: Arc<FailureSnapshot>) -> Self {
        Self {
            previous,
            groups: Vec::new(),
            handlers: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    fn record(&mut self, provider: &Provider, reason: FailureReason) {
        if self.previous.reason_of(provider.service_id()) == Some(reason) {
            tracing::debug!(
                kind = %provider.kind(),
                name = provider.name(),
                service_id = %provider.service_id(),
                %reason,
                "provider still excluded"
            );
        } else {
            tracing::warn!(
                kind = %provider.kind(),
                name = provider.name(),
                service_id = %provider.service_id(),
                %reason,
                "provider excluded"
            );
        }

        let failed = FailedProvider {
            service_id: provider.service_id(),
            name: provider.name().to_owned(),
            kind: provider.kind(),
            reason,
        };
        match provider.kind() {
            ProviderKind::RouteGroup => self.groups.push(failed),
            ProviderKind::Handler => self.handlers.push(failed),
            ProviderKind::Interceptor => self.interceptors.push(failed),
        }
    }

    fn finish(self) -> FailureSnapshot {
        let current: HashSet<ServiceId> = self
            .groups
            .iter()
            .chain(&self.handlers)
            .chain(&self.interceptors)
            .map(|f| f.service_id)
            .collect();
        for gone in self.previous.iter().filter(|f| !current.contains(&f.service_id)) {
            tracing::info!(
                kind = %gone.kind,
                name = %gone.name,
                service_id = %gone.service_id,
                "provider no longer excluded"
            );
        }
        FailureSnapshot::from_unsorted(self.groups, self.handlers, self.interceptors)
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Register,
    Reload,
    Unregister,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Register => "register",
            Op::Reload => "reload",
            Op::Unregister => "unregister",
        }
    }
}

/// Run one pass against `state`.
pub(crate) fn reconcile(ctx: &PassContext<'_>, state: &mut PassState) -> PassReport {
    let mut report = PassReport::default();
    let snapshot = ctx.registry.snapshot();
    let runtime_props = ctx.runtime.properties();
    let mut failures = Failures::new(ctx.diagnostics.failures());

    let retracted = retract(ctx, state, &snapshot.removed_groups, &mut report);
    for content in &snapshot.removed_content {
        tracing::debug!(
            kind = %content.kind(),
            name = content.provider().name(),
            "content removed"
        );
    }

    let mut groups = applicable(snapshot.groups, RouteGroup::provider, &runtime_props, &mut failures);
    let mut handlers = applicable(
        snapshot.handlers,
        ContentProvider::provider,
        &runtime_props,
        &mut failures,
    );
    let mut interceptors = applicable(
        snapshot.interceptors,
        ContentProvider::provider,
        &runtime_props,
        &mut failures,
    );
    if let Some(default) = ctx.implicit_default {
        groups.push(default.clone());
    }

    for shadowed in resolve_paths(&mut groups) {
        if shadowed.is_implicit_default() {
            tracing::debug!(path = shadowed.path(), "implicit default shadowed by explicit group");
        } else {
            failures.record(shadowed.provider(), FailureReason::ShadowedByOtherService);
        }
    }
    for duplicate in resolve_names(&mut groups, &mut handlers, &mut interceptors) {
        failures.record(&duplicate, FailureReason::DuplicateName);
    }

    let mut candidates: Vec<Candidate> = groups.into_iter().map(Candidate::new).collect();

    let attached_interceptors = attach(&mut candidates, interceptors, &mut failures);

    let mut dependency_detached = HashSet::new();
    candidates.retain_mut(|candidate| {
        let result = validate_group(&candidate.group, &mut candidate.interceptors, &runtime_props);
        dependency_detached.extend(result.detached);
        if !result.group_satisfied {
            failures.record(
                candidate.group.provider(),
                FailureReason::RequiredExtensionsUnavailable,
            );
        }
        result.group_satisfied
    });

    select_default(&mut candidates, state, &mut failures);
    settle_orphans(
        &candidates,
        ProviderKind::Interceptor,
        &attached_interceptors,
        &dependency_detached,
        &mut failures,
    );

    let attached_handlers = attach(&mut candidates, handlers, &mut failures);
    let mut handler_detached = HashSet::new();
    for candidate in &mut candidates {
        handler_detached.extend(validate_handlers(
            &candidate.group,
            &candidate.interceptors,
            &mut candidate.handlers,
            &runtime_props,
        ));
    }
    settle_orphans(
        &candidates,
        ProviderKind::Handler,
        &attached_handlers,
        &handler_detached,
        &mut failures,
    );

    apply(ctx.runtime, state, candidates, &retracted, &mut report);

    let snapshot = failures.finish();
    report.failures = snapshot.len();
    ctx.diagnostics.publish_active(
        state
            .registered
            .values()
            .map(|applied| ActiveGroup::from_group(&applied.group))
            .collect(),
    );
    for tracker in ctx.trackers {
        tracker.publish_failures(snapshot.clone());
    }
    ctx.diagnostics.publish_failures(snapshot);
    report
}

/// Unregister every group the runtime still serves. Used on shutdown.
pub(crate) fn unregister_all(runtime: &dyn RuntimeAdapter, state: &mut PassState) -> PassReport {
    let mut report = PassReport::default();
    let registered = std::mem::take(&mut state.registered);
    for applied in registered.into_values() {
        call(runtime, Op::Unregister, &applied.group, &mut report);
    }
    state.default = None;
    report
}

/// Unregister removed groups. A group whose unregister fails stays in `state`
/// so later passes retry it; the ids tried here are returned.
fn retract(
    ctx: &PassContext<'_>,
    state: &mut PassState,
    removed: &[RouteGroup],
    report: &mut PassReport,
) -> HashSet<ServiceId> {
    let mut tried = HashSet::new();
    for group in removed {
        let id = group.provider().service_id();
        tried.insert(id);
        unregister(ctx.runtime, state, id, report);
    }
    tried
}

/// Unregister the group `state` holds under `id`, forgetting it on success.
fn unregister(
    runtime: &dyn RuntimeAdapter,
    state: &mut PassState,
    id: ServiceId,
    report: &mut PassReport,
) {
    let Some(applied) = state.registered.get(&id) else {
        return;
    };
    if call(runtime, Op::Unregister, &applied.group, report) {
        state.registered.remove(&id);
    }
}

fn applicable<T>(
    items: Vec<T>,
    provider: fn(&T) -> &Provider,
    runtime: &Properties,
    failures: &mut Failures,
) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| {
            let p = provider(item);
            if let Some(reason) = p.failure() {
                failures.record(p, reason);
                return false;
            }
            if !p.applies_to(runtime) {
                tracing::trace!(name = p.name(), "provider targets another runtime");
                return false;
            }
            true
        })
        .collect()
}

/// Check that the content can be instantiated and is of a usable type.
fn probe(content: &ContentProvider) -> Result<(), FailureReason> {
    let acquired = content.provider().payload().acquire().map_err(|err| {
        tracing::debug!(name = content.provider().name(), %err, "payload acquire failed");
        FailureReason::ServiceNotGettable
    })?;
    if content.kind() == ProviderKind::Interceptor && acquired.contracts().is_empty() {
        return Err(FailureReason::NotAnExtensionType);
    }
    Ok(())
}

/// Attach each content provider to every candidate it selects.
///
/// Returns the providers attached to at least one group.
fn attach(
    candidates: &mut [Candidate],
    content: Vec<ContentProvider>,
    failures: &mut Failures,
) -> BTreeMap<ServiceId, ContentProvider> {
    let mut attached = BTreeMap::new();
    for item in content {
        if let Err(reason) = probe(&item) {
            failures.record(item.provider(), reason);
            continue;
        }

        let mut matched = 0;
        for candidate in candidates.iter_mut() {
            if item.selects(&candidate.group) {
                candidate.content_mut(item.kind()).push(item.clone());
                matched += 1;
            }
        }

        if matched == 0 {
            failures.record(item.provider(), FailureReason::RequiredApplicationUnavailable);
        } else {
            tracing::trace!(name = item.provider().name(), groups = matched, "content attached");
            attached.insert(item.provider().service_id(), item);
        }
    }
    attached
}

/// Record a failure for attached content that no group holds any more.
fn settle_orphans(
    candidates: &[Candidate],
    kind: ProviderKind,
    attached: &BTreeMap<ServiceId, ContentProvider>,
    detached: &HashSet<ServiceId>,
    failures: &mut Failures,
) {
    let held: HashSet<ServiceId> = candidates
        .iter()
        .flat_map(|c| c.content(kind).iter().map(|i| i.provider().service_id()))
        .collect();
    for (id, item) in attached {
        if held.contains(id) {
            continue;
        }
        let reason = if detached.contains(id) {
            FailureReason::RequiredExtensionsUnavailable
        } else {
            FailureReason::RequiredApplicationUnavailable
        };
        failures.record(item.provider(), reason);
    }
}

/// Keep exactly one default group: the best explicit one, else the implicit one.
fn select_default(candidates: &mut Vec<Candidate>, state: &mut PassState, failures: &mut Failures) {
    let explicit = candidates
        .iter()
        .filter(|c| c.group.is_default() && !c.group.is_implicit_default())
        .min_by(|a, b| precedence(a.group.provider(), b.group.provider()))
        .map(Candidate::id);
    let effective = explicit.or_else(|| {
        candidates
            .iter()
            .find(|c| c.group.is_implicit_default())
            .map(Candidate::id)
    });

    candidates.retain(|c| {
        if !c.group.is_default() || Some(c.id()) == effective {
            return true;
        }
        if !c.group.is_implicit_default() {
            failures.record(c.group.provider(), FailureReason::ShadowedByOtherService);
        }
        false
    });

    if state.default != effective {
        tracing::info!(
            from = ?state.default,
            to = ?effective,
            "effective default group changed"
        );
        state.default = effective;
    }
}

fn apply(
    runtime: &dyn RuntimeAdapter,
    state: &mut PassState,
    candidates: Vec<Candidate>,
    retracted: &HashSet<ServiceId>,
    report: &mut PassReport,
) {
    let desired: BTreeMap<ServiceId, RouteGroup> = candidates
        .into_iter()
        .map(|c| (c.id(), c.into_group()))
        .collect();

    let stale: Vec<ServiceId> = state
        .registered
        .keys()
        .filter(|id| !desired.contains_key(id) && !retracted.contains(id))
        .copied()
        .collect();
    for id in stale {
        unregister(runtime, state, id, report);
    }

    for (id, group) in desired {
        let fingerprint = Fingerprint::of(&group);
        let op = match state.registered.get(&id) {
            Some(applied) if applied.fingerprint == fingerprint => continue,
            Some(_) => Op::Reload,
            None if runtime.is_registered(&group) => Op::Reload,
            None => Op::Register,
        };

        // On failure the previous entry stays, so the next pass retries.
        let group = group.with_changed(true);
        if call(runtime, op, &group, report) {
            state.registered.insert(
                id,
                Applied {
                    group: group.with_changed(false),
                    fingerprint,
                },
            );
        }
    }
}

/// Issue one runtime call; errors and panics are logged, never propagated.
fn call(runtime: &dyn RuntimeAdapter, op: Op, group: &RouteGroup, report: &mut PassReport) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match op {
        Op::Register => runtime.register_group(group),
        Op::Reload => runtime.reload_group(group),
        Op::Unregister => runtime.unregister_group(group),
    }))
    .unwrap_or_else(|payload| Err(RuntimeError::Panic(panic_message(payload.as_ref()))));

    match outcome {
        Ok(()) => {
            match op {
                Op::Register => report.registered += 1,
                Op::Reload => report.reloaded += 1,
                Op::Unregister => report.unregistered += 1,
            }
            tracing::info!(
                op = op.as_str(),
                group = group.provider().name(),
                path = group.path(),
                "runtime updated"
            );
            true
        }
        Err(err) => {
            report.failed_calls += 1;
            tracing::warn!(
                op = op.as_str(),
                group = group.provider().name(),
                path = group.path(),
                %err,
                "runtime call failed"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
