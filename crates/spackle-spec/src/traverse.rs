// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Walking the dependency graph of a [`Spec`].
//!
//! Depth first walks are available through [`Spec::traverse_with`],
//! breadth first walks are driven by a [`Visitor`] which decides which
//! items are reported and which edges are followed from them.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use spackle_foundation::depflag::DepFlag;

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::spec::Spec;

#[cfg(test)]
#[path = "./traverse_test.rs"]
mod traverse_test;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Parents before their dependencies
    #[default]
    Pre,
    /// Dependencies before their parents
    Post,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Children,
    Parents,
}

/// Which repeated visits of a node are reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cover {
    /// Each node once, through the first edge that reaches it
    #[default]
    Nodes,
    /// Each node once per incoming edge, expanding it only once
    Edges,
}

#[derive(Clone, Debug)]
pub struct TraverseOptions {
    /// Start from these nodes instead of the roots of the spec
    pub roots: Option<Vec<NodeId>>,
    pub order: Order,
    pub direction: Direction,
    pub cover: Cover,
    /// Only follow edges of these types
    pub depflag: DepFlag,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            roots: None,
            order: Order::default(),
            direction: Direction::default(),
            cover: Cover::default(),
            depflag: DepFlag::ALL,
        }
    }
}

/// One step of a walk: the node reached, the edge used to reach it
/// and how far it is from the starting node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeAndDepth {
    /// Index into [`Spec::edges`], none for the starting nodes
    pub edge: Option<usize>,
    /// The node this one was reached from
    pub parent: Option<NodeId>,
    pub node: NodeId,
    pub depth: usize,
}

impl EdgeAndDepth {
    pub fn root(node: NodeId) -> Self {
        Self {
            edge: None,
            parent: None,
            node,
            depth: 0,
        }
    }
}

/// The items one step away from the given one.
///
/// Neighbors are ordered by name so that every walk is deterministic.
pub fn neighbors(
    spec: &Spec,
    item: &EdgeAndDepth,
    direction: Direction,
    depflag: DepFlag,
) -> Vec<EdgeAndDepth> {
    let mut found: Vec<_> = match direction {
        Direction::Children => spec
            .edges_from(item.node)
            .filter(|(_, e)| e.matches(depflag))
            .map(|(i, e)| (i, e.child))
            .collect(),
        Direction::Parents => spec
            .edges_to(item.node)
            .filter(|(_, e)| e.matches(depflag))
            .map(|(i, e)| (i, e.parent))
            .collect(),
    };
    found.sort_by(|(ia, a), (ib, b)| {
        spec.node(*a)
            .display_name()
            .cmp(spec.node(*b).display_name())
            .then(ia.cmp(ib))
    });
    found
        .into_iter()
        .map(|(edge, node)| EdgeAndDepth {
            edge: Some(edge),
            parent: Some(item.node),
            node,
            depth: item.depth + 1,
        })
        .collect()
}

/// A lazy depth first walk over a spec.
///
/// Nodes are deduplicated by identity, so diamonds and shared
/// subgraphs of several roots are expanded only once.
pub struct Traverse<'a> {
    spec: &'a Spec,
    options: TraverseOptions,
    stack: Vec<(EdgeAndDepth, bool)>,
    visited: HashSet<NodeId>,
}

impl<'a> Traverse<'a> {
    pub fn new(spec: &'a Spec, options: TraverseOptions) -> Self {
        let roots = options
            .roots
            .clone()
            .unwrap_or_else(|| spec.roots().to_vec());
        let stack = roots
            .into_iter()
            .rev()
            .map(|id| (EdgeAndDepth::root(id), false))
            .collect();
        Self {
            spec,
            options,
            stack,
            visited: HashSet::new(),
        }
    }

    fn push_neighbors(&mut self, item: &EdgeAndDepth) {
        let next = neighbors(
            self.spec,
            item,
            self.options.direction,
            self.options.depflag,
        );
        self.stack
            .extend(next.into_iter().rev().map(|item| (item, false)));
    }
}

impl Iterator for Traverse<'_> {
    type Item = EdgeAndDepth;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (item, expanded) = self.stack.pop()?;
            if expanded {
                return Some(item);
            }
            if !self.visited.insert(item.node) {
                if self.options.cover == Cover::Edges && item.edge.is_some() {
                    return Some(item);
                }
                continue;
            }
            match self.options.order {
                Order::Pre => {
                    self.push_neighbors(&item);
                    return Some(item);
                }
                Order::Post => {
                    self.stack.push((item, true));
                    self.push_neighbors(&item);
                }
            }
        }
    }
}

impl Spec {
    /// Walk every node below the roots once, parents first.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse::new(self, TraverseOptions::default())
    }

    /// Walk every node below one node once, parents first.
    pub fn traverse_from(&self, root: NodeId) -> Traverse<'_> {
        Traverse::new(
            self,
            TraverseOptions {
                roots: Some(vec![root]),
                ..Default::default()
            },
        )
    }

    pub fn traverse_with(&self, options: TraverseOptions) -> Traverse<'_> {
        Traverse::new(self, options)
    }
}

/// Decides what a breadth first walk reports and where it goes next.
pub trait Visitor {
    /// Return true to report this item and explore its neighbors
    fn accept(&mut self, spec: &Spec, item: &EdgeAndDepth) -> bool;

    /// The items to explore after an accepted one
    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth>;
}

impl<V: Visitor + ?Sized> Visitor for &mut V {
    fn accept(&mut self, spec: &Spec, item: &EdgeAndDepth) -> bool {
        (**self).accept(spec, item)
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        (**self).neighbors(spec, item)
    }
}

/// Follows every edge of the given types.
#[derive(Clone, Debug)]
pub struct BaseVisitor {
    pub depflag: DepFlag,
}

impl BaseVisitor {
    pub fn new(depflag: DepFlag) -> Self {
        Self { depflag }
    }
}

impl Visitor for BaseVisitor {
    fn accept(&mut self, _spec: &Spec, _item: &EdgeAndDepth) -> bool {
        true
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        neighbors(spec, item, Direction::Children, self.depflag)
    }
}

/// Follows one set of edge types from the starting nodes and another
/// from everything below them.
///
/// Building a package needs all of its own dependencies, but only the
/// link and run dependencies of those.
#[derive(Clone, Debug)]
pub struct MixedDepthVisitor {
    pub direct: DepFlag,
    pub transitive: DepFlag,
}

impl MixedDepthVisitor {
    pub fn new(direct: DepFlag, transitive: DepFlag) -> Self {
        Self { direct, transitive }
    }
}

impl Visitor for MixedDepthVisitor {
    fn accept(&mut self, _spec: &Spec, _item: &EdgeAndDepth) -> bool {
        true
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        let depflag = if item.depth == 0 {
            self.direct
        } else {
            self.transitive
        };
        neighbors(spec, item, Direction::Children, depflag)
    }
}

/// Follows edges towards dependents instead of dependencies.
#[derive(Clone, Debug)]
pub struct ReverseVisitor {
    pub depflag: DepFlag,
}

impl ReverseVisitor {
    pub fn new(depflag: DepFlag) -> Self {
        Self { depflag }
    }
}

impl Visitor for ReverseVisitor {
    fn accept(&mut self, _spec: &Spec, _item: &EdgeAndDepth) -> bool {
        true
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        neighbors(spec, item, Direction::Parents, self.depflag)
    }
}

/// Reports each node once, through the first edge that reaches it.
#[derive(Clone, Debug)]
pub struct CoverNodesVisitor<V> {
    inner: V,
    visited: HashSet<NodeId>,
}

impl<V: Visitor> CoverNodesVisitor<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            visited: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: Visitor> Visitor for CoverNodesVisitor<V> {
    fn accept(&mut self, spec: &Spec, item: &EdgeAndDepth) -> bool {
        if self.visited.contains(&item.node) {
            return false;
        }
        let accepted = self.inner.accept(spec, item);
        if accepted {
            self.visited.insert(item.node);
        }
        accepted
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        self.inner.neighbors(spec, item)
    }
}

/// Reports each node once per incoming edge, expanding it only once.
#[derive(Clone, Debug)]
pub struct CoverEdgesVisitor<V> {
    inner: V,
    expanded: HashSet<NodeId>,
}

impl<V: Visitor> CoverEdgesVisitor<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            expanded: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: Visitor> Visitor for CoverEdgesVisitor<V> {
    fn accept(&mut self, spec: &Spec, item: &EdgeAndDepth) -> bool {
        self.inner.accept(spec, item)
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        if !self.expanded.insert(item.node) {
            return Vec::new();
        }
        self.inner.neighbors(spec, item)
    }
}

/// Looks for a dependency that still needs to be installed.
///
/// The starting node is always accepted, whether or not it is
/// installed itself. Its own build, link and run dependencies are
/// checked, below them only link and run dependencies. External nodes
/// are never expanded, their dependencies are not ours to install.
/// The walk stops descending at the first missing dependency.
pub struct UninstalledDepsVisitor<F> {
    is_installed: F,
    direct: DepFlag,
    pub has_uninstalled_deps: bool,
}

impl<F> UninstalledDepsVisitor<F>
where
    F: FnMut(&Spec, NodeId) -> bool,
{
    pub fn new(is_installed: F, with_tests: bool) -> Self {
        let direct = if with_tests {
            DepFlag::ALL
        } else {
            DepFlag::BUILD_LINK_RUN
        };
        Self {
            is_installed,
            direct,
            has_uninstalled_deps: false,
        }
    }
}

impl<F> Visitor for UninstalledDepsVisitor<F>
where
    F: FnMut(&Spec, NodeId) -> bool,
{
    fn accept(&mut self, spec: &Spec, item: &EdgeAndDepth) -> bool {
        if item.depth == 0 {
            return true;
        }
        if self.has_uninstalled_deps {
            return false;
        }
        if !spec.node(item.node).is_external() && !(self.is_installed)(spec, item.node) {
            self.has_uninstalled_deps = true;
            return false;
        }
        true
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        if spec.node(item.node).is_external() {
            return Vec::new();
        }
        let depflag = if item.depth == 0 {
            self.direct
        } else {
            DepFlag::LINK_RUN
        };
        neighbors(spec, item, Direction::Children, depflag)
    }
}

/// A lazy breadth first walk driven by a [`Visitor`].
pub struct BreadthFirst<'a, V> {
    spec: &'a Spec,
    visitor: V,
    queue: VecDeque<EdgeAndDepth>,
}

impl<V> BreadthFirst<'_, V> {
    pub fn into_visitor(self) -> V {
        self.visitor
    }
}

impl<V: Visitor> Iterator for BreadthFirst<'_, V> {
    type Item = EdgeAndDepth;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.queue.pop_front()?;
            if !self.visitor.accept(self.spec, &item) {
                continue;
            }
            let next = self.visitor.neighbors(self.spec, &item);
            self.queue.extend(next);
            return Some(item);
        }
    }
}

/// Walk breadth first from several roots with one visitor.
///
/// Cover visitors keep their state across all the roots, so a subgraph
/// shared between roots is reported once rather than once per root.
pub fn traverse_breadth_first_with_visitor<'a, V: Visitor>(
    spec: &'a Spec,
    roots: &[NodeId],
    visitor: V,
) -> BreadthFirst<'a, V> {
    BreadthFirst {
        spec,
        visitor,
        queue: roots.iter().copied().map(EdgeAndDepth::root).collect(),
    }
}

/// Order the nodes below the given roots so that every node comes
/// after all of its dependencies along edges of the given types.
///
/// Ties are broken by name, so the order is stable for a given graph.
pub fn topological_order(spec: &Spec, roots: &[NodeId], depflag: DepFlag) -> Result<Vec<NodeId>> {
    let nodes: BTreeSet<NodeId> = traverse_breadth_first_with_visitor(
        spec,
        roots,
        CoverNodesVisitor::new(BaseVisitor::new(depflag)),
    )
    .map(|item| item.node)
    .collect();

    let mut pending: HashMap<NodeId, usize> = nodes
        .iter()
        .map(|id| {
            let count = spec
                .dependencies(*id, depflag)
                .into_iter()
                .filter(|d| nodes.contains(d))
                .count();
            (*id, count)
        })
        .collect();
    let key = |id: &NodeId| (spec.node(*id).display_name().to_owned(), *id);
    let mut ready: BTreeSet<(String, NodeId)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| key(id))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        let id = next.1;
        order.push(id);
        for parent in spec.dependents(id, depflag) {
            let Some(count) = pending.get_mut(&parent) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                ready.insert(key(&parent));
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = nodes
            .iter()
            .filter(|id| !order.contains(id))
            .map(|id| spec.node(*id).display_name().to_owned())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::Cycle(stuck));
    }
    Ok(order)
}
