// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use spackle_foundation::depflag::DepFlag;
use spackle_foundation::flags::FlagMergePolicy;
use spackle_foundation::variant::{Variant, VariantValue};
use spackle_foundation::version_range::VersionList;
use spackle_spec::hash::DAG_HASH;
use spackle_spec::{Context, EdgeAttributes, NodeId, Spec, SpecNode};

use crate::validation::{Compatibility, ValidatorT, Validators, default_validators};
use crate::{
    ConcretizationError,
    Error,
    PackageRecipe,
    Result,
    RuleSet,
    VersionDecl,
    check_invariants,
};

#[cfg(test)]
#[path = "./concretizer_test.rs"]
mod concretizer_test;

/// Turns abstract specs into concrete ones.
///
/// Implementations must be deterministic: the same requests under the
/// same rules always produce the same concrete graphs.
pub trait Concretizer {
    /// Concretize a single abstract spec.
    fn concretize(&self, request: &Spec) -> Result<Spec> {
        self.concretize_together(std::slice::from_ref(request))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ConcretizationError::InvariantViolated {
                    pkg: request.root_node().display_name().to_owned(),
                    reason: "no result was produced".into(),
                }
                .into()
            })
    }

    /// Concretize several specs so that they share their dependencies.
    ///
    /// One result is returned per request, in the same order.
    fn concretize_together(&self, requests: &[Spec]) -> Result<Vec<Spec>>;
}

impl<T> Concretizer for &T
where
    T: Concretizer + ?Sized,
{
    fn concretize(&self, request: &Spec) -> Result<Spec> {
        (**self).concretize(request)
    }

    fn concretize_together(&self, requests: &[Spec]) -> Result<Vec<Spec>> {
        (**self).concretize_together(requests)
    }
}

impl<T> Concretizer for Arc<T>
where
    T: Concretizer + ?Sized,
{
    fn concretize(&self, request: &Spec) -> Result<Spec> {
        (**self).concretize(request)
    }

    fn concretize_together(&self, requests: &[Spec]) -> Result<Vec<Spec>> {
        (**self).concretize_together(requests)
    }
}

/// One way to resolve a node
#[derive(Clone, Debug)]
enum Candidate {
    /// Stand in for a virtual package with this recipe
    Provider(Arc<PackageRecipe>),
    External(SpecNode),
    /// An installed spec, taken with all of its dependencies, and its
    /// hash shortened for messages
    Reuse(Spec, String),
    Build(Arc<PackageRecipe>, VersionDecl),
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(recipe) => write!(f, "provider {}", recipe.name),
            Self::External(node) => write!(f, "external {node}"),
            Self::Reuse(spec, short_hash) => {
                write!(f, "installed {} /{short_hash}", spec.root_node())
            }
            Self::Build(recipe, version) => write!(f, "{}@={}", recipe.name, version.version),
        }
    }
}

/// A virtual package that must be provided at the given versions
#[derive(Clone, Debug)]
struct VirtualConstraint {
    provider: NodeId,
    name: String,
    versions: VersionList,
}

/// A partially concrete graph and what is left to decide in it.
#[derive(Clone, Debug)]
struct State {
    spec: Spec,
    /// Nodes in the order they should be considered
    queue: VecDeque<NodeId>,
    decided: BTreeSet<NodeId>,
    virtuals: Vec<VirtualConstraint>,
}

/// Take the compiler flags that parents push down with `==`.
///
/// A flag type the node sets itself is left alone. Inherited lists keep
/// propagating, so they reach every dependency built from source.
fn inherit_flags(state: &State, id: NodeId, node: &mut SpecNode) {
    let mut parents: Vec<_> = state.spec.edges_to(id).map(|(_, e)| e.parent).collect();
    parents.sort_by_key(|p| state.spec.node(*p).display_name().to_owned());
    for parent in parents {
        for (flag_type, list) in state.spec.node(parent).flags.iter() {
            if list.propagate && !node.flags.contains_key(flag_type) {
                tracing::trace!(pkg = %node.display_name(), %flag_type, "inheriting flags");
                node.flags.insert(*flag_type, list.clone());
            }
        }
    }
}

impl State {
    fn new(spec: Spec) -> Self {
        let queue: VecDeque<_> = spec.traverse().map(|item| item.node).collect();
        let decided = queue
            .iter()
            .copied()
            .filter(|id| spec.node(*id).is_concrete())
            .collect();
        Self {
            spec,
            queue,
            decided,
            virtuals: Vec::new(),
        }
    }

    /// True if a decided parent depends on the node, or it is a root.
    ///
    /// Nodes that are only named by untyped constraints wait until
    /// some package actually depends on them.
    fn is_ready(&self, id: NodeId) -> bool {
        self.spec.roots().contains(&id)
            || self
                .spec
                .edges_to(id)
                .any(|(_, e)| !e.depflag().is_empty() && self.decided.contains(&e.parent))
    }

    fn next_pending(&mut self) -> Option<NodeId> {
        let reachable = self.spec.reachable(self.spec.roots());
        let pending = |state: &Self, id: NodeId| {
            reachable.contains(&id) && !state.decided.contains(&id) && state.is_ready(id)
        };
        if let Some(index) = self.queue.iter().position(|id| pending(self, *id)) {
            return self.queue.remove(index);
        }
        reachable.iter().copied().find(|id| pending(self, *id))
    }

    fn push_children(&mut self, id: NodeId) {
        for child in self.spec.dependencies(id, DepFlag::ALL) {
            if !self.decided.contains(&child) && !self.queue.contains(&child) {
                self.queue.push_back(child);
            }
        }
    }

    /// Remove edges that only constrain, checking that each is honored
    /// by the typed edges that replaced it.
    fn drop_constraint_edges(&mut self) -> std::result::Result<(), ConcretizationError> {
        let reachable = self.spec.reachable(self.spec.roots());
        let untyped: Vec<_> = self
            .spec
            .edges()
            .iter()
            .filter(|e| e.depflag().is_empty() && reachable.contains(&e.parent))
            .map(|e| (e.parent, e.child))
            .collect();
        for (parent, child) in untyped {
            let Some(attributes) = self.spec.remove_edge(parent, child) else {
                continue;
            };
            let missing = || ConcretizationError::MissingDependency {
                pkg: self.spec.node(parent).display_name().to_owned(),
                dependency: self.spec.node(child).to_string(),
            };
            if !self.spec.reaches(parent, child) {
                return Err(missing());
            }
            if !attributes.virtuals.is_empty()
                && !self
                    .spec
                    .edges_to(child)
                    .any(|(_, e)| attributes.virtuals.is_subset(e.virtuals()))
            {
                return Err(missing());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Progress {
    /// Candidates that were valid on their own but led nowhere
    steps_back: usize,
}

/// Concretizes by trying candidates in order of preference and
/// stepping back to the most recent decision whenever one fails.
///
/// For each node the candidates are, in order: providers for virtual
/// packages, configured externals, installed specs when reusing, and
/// finally new builds of each version the recipe declares. Variant
/// values are chosen without backtracking.
#[derive(Clone, Debug)]
pub struct BacktrackingConcretizer {
    context: Context,
    rules: Arc<RuleSet>,
    validators: Cow<'static, [Validators]>,
    reuse: bool,
    verify_determinism: bool,
    max_attempts: usize,
}

impl BacktrackingConcretizer {
    /// A concretizer configured from the given context.
    pub fn new(context: Context, rules: Arc<RuleSet>) -> Self {
        let settings = &context.config.concretizer;
        Self {
            reuse: settings.reuse,
            verify_determinism: settings.verify_determinism,
            max_attempts: settings.max_attempts,
            context,
            rules,
            validators: Cow::from(default_validators()),
        }
    }

    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn with_verify_determinism(mut self, verify: bool) -> Self {
        self.verify_determinism = verify;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_validators<V>(mut self, validators: V) -> Self
    where
        V: Into<Cow<'static, [Validators]>>,
    {
        self.validators = validators.into();
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn policy(&self) -> FlagMergePolicy {
        self.context.flag_merge()
    }

    /// Concretize all requests into one graph with a root per request.
    ///
    /// There must be at least one request.
    fn concretize_graph(&self, requests: &[Spec]) -> Result<(Spec, Vec<NodeId>)> {
        for request in requests.iter() {
            if request.root_node().name.is_none() {
                return Err(ConcretizationError::Anonymous(request.to_string()).into());
            }
            if let Some(conflict) = request.deferred_conflicts().first() {
                return Err(conflict.clone().into());
            }
        }
        let mut combined = requests[0].clone();
        let mut roots = vec![combined.root()];
        for request in requests.iter().skip(1) {
            roots.push(combined.add_spec_root(request, self.policy())?);
        }

        let mut progress = Progress::default();
        let spec = self.search(State::new(combined), &mut progress)?;
        tracing::debug!(
            roots = %spec,
            steps_back = progress.steps_back,
            "concretized"
        );

        for (request, root) in requests.iter().zip(roots.iter()) {
            if !spec.extract(*root).satisfies(request) {
                return Err(ConcretizationError::InvariantViolated {
                    pkg: request.root_node().display_name().to_owned(),
                    reason: format!("the result does not satisfy '{request}'"),
                }
                .into());
            }
        }
        check_invariants(&spec, &self.rules)?;
        Ok((spec, roots))
    }

    fn search(&self, mut state: State, progress: &mut Progress) -> Result<Spec> {
        let id = match state.next_pending() {
            Some(id) => id,
            None => {
                state.drop_constraint_edges()?;
                match state.next_pending() {
                    Some(id) => id,
                    None => return self.finish(state),
                }
            }
        };
        let node = state.spec.node(id).clone();
        let pkg = node.display_name().to_owned();
        let candidates = self.candidates(&state, id)?;
        let mut notes = Vec::new();
        if candidates.is_empty() {
            notes.push(format!(
                "there is no recipe, external or installed spec for {pkg}"
            ));
        }

        for candidate in candidates {
            let mut next = state.clone();
            let compat = self.apply(&mut next, id, &candidate)?;
            if !&compat {
                tracing::trace!(%pkg, %candidate, reason = %compat, "skipping candidate");
                notes.push(format!("{candidate}: {compat}"));
                continue;
            }
            tracing::debug!(%pkg, %candidate, "trying");
            match self.search(next, progress) {
                Ok(spec) => return Ok(spec),
                Err(Error::Concretization(err)) if !err.is_fatal() => {
                    tracing::debug!(%pkg, %candidate, reason = %err.summary(), "stepping back");
                    notes.push(format!("{candidate}: {}", err.summary()));
                    progress.steps_back += 1;
                    if progress.steps_back >= self.max_attempts {
                        return Err(ConcretizationError::TooManyAttempts {
                            attempts: progress.steps_back,
                            pkg,
                        }
                        .into());
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(ConcretizationError::OutOfOptions {
            pkg,
            request: node.to_string(),
            notes,
        }
        .into())
    }

    fn candidates(&self, state: &State, id: NodeId) -> Result<Vec<Candidate>> {
        let spec = &state.spec;
        let node = spec.node(id);
        let name = node.display_name();

        if self.rules.is_virtual(name) {
            let present: BTreeSet<String> = spec
                .reachable(spec.roots())
                .into_iter()
                .map(|n| spec.node(n).display_name().to_owned())
                .collect();
            let mut providers = self.rules.providers(name);
            // providers already in the graph come first
            providers.sort_by_key(|r| !present.contains(r.name.as_str()));
            return Ok(providers
                .into_iter()
                .map(|r| Candidate::Provider(Arc::clone(r)))
                .collect());
        }

        let mut candidates = Vec::new();
        if node.abstract_hash.is_none() {
            for external in self.rules.externals(name)? {
                if external.intersects(node, self.policy()) {
                    candidates.push(Candidate::External(external));
                }
            }
        }
        if self.reuse || node.abstract_hash.is_some() {
            let wanted = spec.extract(id);
            let mut reusable: Vec<_> = self
                .rules
                .reusable(name)
                .into_iter()
                .filter(|installed| installed.satisfies(&wanted))
                .collect();
            reusable.sort_by_cached_key(|installed| {
                let version = installed
                    .root_node()
                    .versions
                    .concrete()
                    .and_then(|v| v.standard().cloned());
                let rank = version
                    .as_ref()
                    .map(|v| self.rules.version_rank(name, v))
                    .unwrap_or(usize::MAX);
                (rank, Reverse(version), installed.dag_hash())
            });
            candidates.extend(reusable.into_iter().map(|installed| {
                let short_hash = self.context.short_hash(&installed.dag_hash()).to_owned();
                Candidate::Reuse(installed, short_hash)
            }));
        }
        if node.abstract_hash.is_none() {
            if let Some(recipe) = self.rules.recipe(name) {
                let mut versions: Vec<_> = recipe.versions.iter().collect();
                versions.sort_by_key(|v| {
                    (
                        self.rules.version_rank(name, &v.version),
                        !v.preferred,
                        v.deprecated,
                        Reverse(v.version.clone()),
                    )
                });
                candidates.extend(
                    versions
                        .into_iter()
                        .map(|v| Candidate::Build(Arc::clone(recipe), v.clone())),
                );
            }
        }
        Ok(candidates)
    }

    fn apply(&self, state: &mut State, id: NodeId, candidate: &Candidate) -> Result<Compatibility> {
        match candidate {
            Candidate::Provider(recipe) => self.apply_provider(state, id, recipe),
            Candidate::External(external) => self.apply_external(state, id, external),
            Candidate::Reuse(installed, _) => self.apply_reuse(state, id, installed),
            Candidate::Build(recipe, version) => self.apply_build(state, id, recipe, version),
        }
    }

    /// Replace a virtual node by a node of the providing package.
    fn apply_provider(
        &self,
        state: &mut State,
        id: NodeId,
        recipe: &PackageRecipe,
    ) -> Result<Compatibility> {
        let virtual_node = state.spec.node(id).clone();
        let virtual_name = virtual_node.display_name().to_owned();
        let target = match state.spec.find(recipe.name.as_str()) {
            Some(existing) => existing,
            None => {
                let mut node = SpecNode::new(recipe.name.clone());
                node.flags = virtual_node.flags.clone();
                node.arch = virtual_node.arch.clone();
                *state.spec.node_mut(id) = node;
                id
            }
        };

        let incoming: Vec<_> = state
            .spec
            .edges_to(id)
            .map(|(_, e)| (e.parent, e.attributes.clone()))
            .collect();
        let outgoing: Vec<_> = state
            .spec
            .edges_from(id)
            .map(|(_, e)| (e.child, e.attributes.clone()))
            .collect();
        for (parent, attributes) in incoming {
            let attributes = if target == id {
                EdgeAttributes::default()
            } else {
                state.spec.remove_edge(parent, id);
                attributes
            };
            let attributes = attributes.with_virtuals([virtual_name.as_str()]);
            if let Err(err) = state.spec.add_edge(parent, target, attributes) {
                return Ok(Compatibility::incompatible(err.to_string()));
            }
        }
        if target != id {
            for (child, attributes) in outgoing {
                state.spec.remove_edge(id, child);
                if let Err(err) = state.spec.add_edge(target, child, attributes) {
                    return Ok(Compatibility::incompatible(err.to_string()));
                }
            }
        }

        if !virtual_node.versions.is_any() {
            let constraint = VirtualConstraint {
                provider: target,
                name: virtual_name,
                versions: virtual_node.versions.clone(),
            };
            if state.decided.contains(&target) {
                let compat = self.check_provided(state.spec.node(target), &constraint)?;
                if !&compat {
                    return Ok(compat);
                }
            }
            state.virtuals.push(constraint);
        }
        if !state.decided.contains(&target) {
            state.queue.retain(|n| *n != target);
            state.queue.push_front(target);
        }
        Ok(Compatibility::Compatible)
    }

    fn apply_external(
        &self,
        state: &mut State,
        id: NodeId,
        external: &SpecNode,
    ) -> Result<Compatibility> {
        if state.spec.edges_from(id).next().is_some() {
            return Ok(Compatibility::incompatible(
                "externals can not be given dependencies",
            ));
        }
        let mut node = state.spec.node(id).clone();
        if let Err(err) = node.constrain(external, self.policy()) {
            return Ok(Compatibility::incompatible(err.to_string()));
        }
        self.fill_arch(&mut node);
        match self.rules.recipe(node.display_name()) {
            Some(recipe) => {
                let compat = self.resolve_variants(state, id, &mut node, recipe)?;
                if !&compat {
                    return Ok(compat);
                }
                node.package_hash = Some(recipe.package_hash()?);
            }
            None => {
                for variant in node.variants.values_mut() {
                    if let VariantValue::Abstract(values) = &variant.value {
                        variant.value = match values.len() {
                            1 => VariantValue::Single(
                                values.iter().next().cloned().unwrap_or_default(),
                            ),
                            _ => VariantValue::Multi(values.clone()),
                        };
                    }
                }
            }
        }
        *state.spec.node_mut(id) = node;
        state.decided.insert(id);
        Ok(Compatibility::Compatible)
    }

    /// Graft an installed spec, and all of its dependencies, onto a node.
    fn apply_reuse(
        &self,
        state: &mut State,
        id: NodeId,
        installed: &Spec,
    ) -> Result<Compatibility> {
        let mut mapping = HashMap::from([(installed.root(), id)]);
        let mut overwritten = vec![(id, installed.root())];
        for theirs in installed.reachable(&[installed.root()]) {
            if theirs == installed.root() {
                continue;
            }
            let node = installed.node(theirs);
            let name = node.display_name();
            let ours = match state.spec.find(name) {
                Some(ours) if state.decided.contains(&ours) => {
                    let installed_hash = installed.node_hash(theirs, &DAG_HASH);
                    if state.spec.node_hash(ours, &DAG_HASH) != installed_hash {
                        return Ok(Compatibility::incompatible(format!(
                            "it uses a different {name} than {}",
                            state.spec.node(ours)
                        )));
                    }
                    ours
                }
                Some(ours) => {
                    if !installed.extract(theirs).satisfies(&state.spec.extract(ours)) {
                        return Ok(Compatibility::incompatible(format!(
                            "its {node} does not satisfy {}",
                            state.spec.node(ours)
                        )));
                    }
                    overwritten.push((ours, theirs));
                    ours
                }
                None => state.spec.add_node(node.clone()),
            };
            mapping.insert(theirs, ours);
        }

        for (ours, theirs) in overwritten {
            let children: Vec<_> = state.spec.edges_from(ours).map(|(_, e)| e.child).collect();
            for child in children {
                state.spec.remove_edge(ours, child);
            }
            *state.spec.node_mut(ours) = installed.node(theirs).clone();
        }
        for edge in installed.edges() {
            let (Some(parent), Some(child)) = (mapping.get(&edge.parent), mapping.get(&edge.child))
            else {
                continue;
            };
            if let Err(err) = state.spec.add_edge(*parent, *child, edge.attributes.clone()) {
                return Ok(Compatibility::incompatible(err.to_string()));
            }
        }
        state.decided.extend(mapping.into_values());
        Ok(Compatibility::Compatible)
    }

    fn apply_build(
        &self,
        state: &mut State,
        id: NodeId,
        recipe: &PackageRecipe,
        version: &VersionDecl,
    ) -> Result<Compatibility> {
        let requested = state.spec.node(id).clone();
        for validator in self.validators.iter() {
            let compat = validator.validate_version(&self.rules, &requested, recipe, version)?;
            if !&compat {
                return Ok(compat);
            }
        }

        let mut node = requested.clone();
        node.versions = VersionList::exact(version.version.clone());
        match (&node.namespace, &recipe.namespace) {
            (Some(ours), Some(theirs)) if ours != theirs => {
                return Ok(Compatibility::incompatible(format!(
                    "the recipe is in namespace {theirs}, not {ours}"
                )));
            }
            (None, Some(theirs)) => node.namespace = Some(theirs.clone()),
            _ => {}
        }
        self.fill_arch(&mut node);
        let compat = self.resolve_variants(state, id, &mut node, recipe)?;
        if !&compat {
            return Ok(compat);
        }
        inherit_flags(state, id, &mut node);
        for constraint in state.virtuals.iter().filter(|c| c.provider == id) {
            let compat = self.check_provided(&node, constraint)?;
            if !&compat {
                return Ok(compat);
            }
        }
        node.package_hash = Some(recipe.package_hash()?);
        for validator in self.validators.iter() {
            let compat = validator.validate_node(recipe, &node)?;
            if !&compat {
                return Ok(compat);
            }
        }

        *state.spec.node_mut(id) = node.clone();
        state.decided.insert(id);
        for (dependency, decl) in recipe.active_dependencies(&node)? {
            let attributes = EdgeAttributes {
                depflag: decl.deptypes,
                when: decl.when.clone(),
                ..Default::default()
            };
            let compat = self.depend(state, id, dependency, attributes)?;
            if !&compat {
                return Ok(compat);
            }
        }
        state.push_children(id);
        Ok(Compatibility::Compatible)
    }

    /// Add a declared dependency, merging with any node of the same name.
    fn depend(
        &self,
        state: &mut State,
        parent: NodeId,
        dependency: SpecNode,
        attributes: EdgeAttributes,
    ) -> Result<Compatibility> {
        let name = dependency.display_name().to_owned();
        let mut attributes = attributes;
        let existing = if self.rules.is_virtual(&name) {
            match state.spec.find_provider(&name) {
                Some(provider) => {
                    attributes = attributes.with_virtuals([name.as_str()]);
                    if !dependency.versions.is_any() {
                        let constraint = VirtualConstraint {
                            provider,
                            name: name.clone(),
                            versions: dependency.versions.clone(),
                        };
                        if state.decided.contains(&provider) {
                            let compat =
                                self.check_provided(state.spec.node(provider), &constraint)?;
                            if !&compat {
                                return Ok(compat);
                            }
                        }
                        state.virtuals.push(constraint);
                    }
                    Some(provider)
                }
                None => state.spec.find(&name),
            }
        } else {
            state.spec.find(&name)
        };

        let child = match existing {
            Some(child) if attributes.virtuals.contains(&name) => child,
            Some(child) if state.decided.contains(&child) => {
                if !state.spec.node(child).satisfies(&dependency) {
                    return Ok(Compatibility::incompatible(format!(
                        "it needs {dependency}, but {} was already chosen",
                        state.spec.node(child)
                    )));
                }
                child
            }
            Some(child) => {
                if let Err(err) = state.spec.constrain_node(child, &dependency, self.policy()) {
                    return Ok(Compatibility::incompatible(err.to_string()));
                }
                child
            }
            None => state.spec.add_node(dependency),
        };
        if let Err(err) = state.spec.add_edge(parent, child, attributes) {
            return Ok(Compatibility::incompatible(err.to_string()));
        }
        Ok(Compatibility::Compatible)
    }

    /// Decide the value of every variant the recipe declares for the node.
    ///
    /// A requested value wins, then a value propagated from a parent,
    /// then a configured preference, then the recipe default.
    fn resolve_variants(
        &self,
        state: &State,
        id: NodeId,
        node: &mut SpecNode,
        recipe: &PackageRecipe,
    ) -> Result<Compatibility> {
        let preferences = self.rules.variant_preferences(recipe.name.as_str())?;
        let requested = std::mem::take(&mut node.variants);
        let mut used = BTreeSet::new();
        for decl in recipe.variants.iter() {
            if !recipe.condition_holds(decl.when.as_deref(), node)? {
                continue;
            }
            let variant = if let Some(variant) = requested.get(&decl.name) {
                used.insert(decl.name.as_str());
                match decl.coerce(&variant.value) {
                    Ok(value) => Variant {
                        value,
                        propagate: variant.propagate,
                    },
                    Err(reason) => return Ok(Compatibility::incompatible(reason)),
                }
            } else if let Some(value) = self
                .propagated(state, id, &decl.name)
                .and_then(|v| decl.coerce(&v).ok())
            {
                Variant::propagated(value)
            } else if let Some(value) = preferences
                .iter()
                .find_map(|p| p.variants.get(&decl.name))
                .and_then(|v| decl.coerce(&v.value).ok())
            {
                Variant::new(value)
            } else {
                Variant::new(decl.default_value())
            };
            node.variants.insert(decl.name.clone(), variant);
        }
        if let Some(name) = requested.keys().find(|n| !used.contains(n.as_str())) {
            return Ok(Compatibility::incompatible(format!(
                "{}@{} has no variant '{name}'",
                recipe.name, node.versions
            )));
        }
        Ok(Compatibility::Compatible)
    }

    /// A value for the variant pushed down by a parent with `++` or `name==`
    fn propagated(&self, state: &State, id: NodeId, name: &str) -> Option<VariantValue> {
        let mut parents: Vec<_> = state.spec.edges_to(id).map(|(_, e)| e.parent).collect();
        parents.sort_by_key(|p| state.spec.node(*p).display_name().to_owned());
        parents.into_iter().find_map(|parent| {
            state
                .spec
                .node(parent)
                .variants
                .get(name)
                .filter(|v| v.propagate)
                .map(|v| v.value.clone())
        })
    }

    /// Check that a provider node offers the versions asked of a virtual
    fn check_provided(
        &self,
        node: &SpecNode,
        constraint: &VirtualConstraint,
    ) -> Result<Compatibility> {
        let Some(recipe) = self.rules.recipe(node.display_name()) else {
            return Ok(Compatibility::Compatible);
        };
        let provided = recipe.provided_versions(&constraint.name, node)?;
        if provided.is_some_and(|p| p.intersects(&constraint.versions)) {
            return Ok(Compatibility::Compatible);
        }
        Ok(Compatibility::incompatible(format!(
            "{node} does not provide {}@{}",
            constraint.name, constraint.versions
        )))
    }

    /// Fill any part of the architecture that was not requested from the host
    fn fill_arch(&self, node: &mut SpecNode) {
        let host = &self.context.host;
        if node.arch.platform.is_none() {
            node.arch.platform.clone_from(&host.platform);
        }
        if node.arch.os.is_none() {
            node.arch.os.clone_from(&host.os);
        }
        if node.arch.target.is_none() {
            node.arch.target.clone_from(&host.target);
        }
    }

    /// Check what can only be checked on the complete graph.
    fn finish(&self, state: State) -> Result<Spec> {
        let State {
            mut spec, virtuals, ..
        } = state;

        for constraint in virtuals {
            let node = spec.node(constraint.provider);
            let compat = self.check_provided(node, &constraint)?;
            if !&compat {
                return Err(ConcretizationError::Conflict {
                    pkg: node.to_string(),
                    conflict: format!("{}@{}", constraint.name, constraint.versions),
                    message: compat.to_string(),
                }
                .into());
            }
        }

        for id in spec.reachable(spec.roots()) {
            let node = spec.node(id);
            let Some(recipe) = self.rules.recipe(node.display_name()) else {
                continue;
            };
            if node.is_external() {
                continue;
            }
            for (conflict, decl) in recipe.active_conflicts(node)? {
                if conflict.len() < 2 {
                    continue;
                }
                if spec.extract(id).satisfies(&conflict) {
                    return Err(ConcretizationError::Conflict {
                        pkg: node.to_string(),
                        conflict: decl.spec.clone(),
                        message: decl
                            .msg
                            .clone()
                            .unwrap_or_else(|| "declared as a conflict".into()),
                    }
                    .into());
                }
            }
        }

        if let Err(err) = spec.mark_concrete() {
            return Err(ConcretizationError::InvariantViolated {
                pkg: spec.root_node().display_name().to_owned(),
                reason: err.to_string(),
            }
            .into());
        }
        Ok(spec)
    }
}

impl Concretizer for BacktrackingConcretizer {
    fn concretize_together(&self, requests: &[Spec]) -> Result<Vec<Spec>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let (spec, roots) = self.concretize_graph(requests)?;
        if self.verify_determinism {
            let (again, again_roots) = self.concretize_graph(requests)?;
            for (first, second) in roots.iter().zip(again_roots.iter()) {
                let first = spec.node_hash(*first, &DAG_HASH);
                let second = again.node_hash(*second, &DAG_HASH);
                if first != second {
                    return Err(ConcretizationError::NonDeterministic {
                        request: requests
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(" "),
                        first: first.to_string(),
                        second: second.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(roots.into_iter().map(|root| spec.extract(root)).collect())
    }
}
