// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;

use dashmap::DashMap;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::digest::SpecHash;
use spackle_foundation::flags::FlagMergePolicy;
use spackle_foundation::name::PkgName;

use crate::edge::{DependencySpec, EdgeAttributes};
use crate::error::{Error, Result, UnsatisfiableSpecError};
use crate::hash;
use crate::node::{NodeId, SpecNode};
use crate::traverse::{Cover, TraverseOptions};

#[cfg(test)]
#[path = "./spec_test.rs"]
mod spec_test;

/// How much of the dependency graph [`Spec::copy`] brings along.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CopyDeps {
    /// Only the root node
    None,
    /// The root and its immediate dependencies
    Direct,
    /// The whole graph
    #[default]
    All,
}

/// A graph of package nodes joined by typed dependency edges.
///
/// Nodes live in an arena and are addressed by [`NodeId`]. They are
/// reference counted, so copies of a spec share every node until one
/// side modifies it. The first root is the primary one, further roots
/// appear when several requests are concretized together.
#[derive(Clone, Debug)]
pub struct Spec {
    pub(crate) nodes: Vec<Arc<SpecNode>>,
    pub(crate) edges: Vec<DependencySpec>,
    pub(crate) roots: Vec<NodeId>,
    /// Conflicts found while parsing, reported on concretization
    pub(crate) deferred: Vec<UnsatisfiableSpecError>,
    pub(crate) hashes: DashMap<(NodeId, &'static str), SpecHash>,
}

impl Spec {
    /// A spec holding one node
    pub fn new(root: SpecNode) -> Self {
        Self {
            nodes: vec![Arc::new(root)],
            edges: Vec::new(),
            roots: vec![NodeId(0)],
            deferred: Vec::new(),
            hashes: DashMap::new(),
        }
    }

    /// A spec of one node with only a name
    pub fn named<S: Into<String>>(name: S) -> Result<Self> {
        Ok(Self::new(SpecNode::new(PkgName::new(name)?)))
    }

    /// An arena with no nodes yet, filled in by deserialization
    pub(crate) fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            roots: Vec::new(),
            deferred: Vec::new(),
            hashes: DashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.roots.first().copied().unwrap_or(NodeId(0))
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Mark an existing node as an additional root.
    pub fn add_root(&mut self, id: NodeId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    pub fn node(&self, id: NodeId) -> &SpecNode {
        &self.nodes[id.0]
    }

    pub fn root_node(&self) -> &SpecNode {
        self.node(self.root())
    }

    /// Get a node for modification.
    ///
    /// Cached hashes of the node and everything that depends on it are
    /// dropped, and the node is unshared from any copies of this spec.
    pub fn node_mut(&mut self, id: NodeId) -> &mut SpecNode {
        self.invalidate(id);
        Arc::make_mut(&mut self.nodes[id.0])
    }

    pub fn name(&self) -> Option<&PkgName> {
        self.root_node().name.as_ref()
    }

    /// Number of nodes in the arena, including unreachable ones
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn edges(&self) -> &[DependencySpec] {
        &self.edges
    }

    pub fn edges_from(&self, id: NodeId) -> impl Iterator<Item = (usize, &DependencySpec)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.parent == id)
    }

    pub fn edges_to(&self, id: NodeId) -> impl Iterator<Item = (usize, &DependencySpec)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.child == id)
    }

    /// The edge between two nodes, if any
    pub fn edge_between(&self, parent: NodeId, child: NodeId) -> Option<&DependencySpec> {
        self.edges
            .iter()
            .find(|e| e.parent == parent && e.child == child)
    }

    /// Direct dependencies of a node along edges of the given types,
    /// ordered by name.
    pub fn dependencies(&self, id: NodeId, depflag: DepFlag) -> Vec<NodeId> {
        let mut deps: Vec<_> = self
            .edges_from(id)
            .filter(|(_, e)| e.matches(depflag))
            .map(|(_, e)| e.child)
            .collect();
        self.sort_by_name(&mut deps);
        deps.dedup();
        deps
    }

    /// Nodes that directly depend on the given one along edges of the
    /// given types, ordered by name.
    pub fn dependents(&self, id: NodeId, depflag: DepFlag) -> Vec<NodeId> {
        let mut parents: Vec<_> = self
            .edges_to(id)
            .filter(|(_, e)| e.matches(depflag))
            .map(|(_, e)| e.parent)
            .collect();
        self.sort_by_name(&mut parents);
        parents.dedup();
        parents
    }

    pub(crate) fn sort_by_name(&self, ids: &mut [NodeId]) {
        ids.sort_by(|a, b| {
            self.node(*a)
                .display_name()
                .cmp(self.node(*b).display_name())
                .then(a.cmp(b))
        });
    }

    /// Every node reachable from the given nodes along any edge,
    /// including the given nodes.
    pub fn reachable(&self, from: &[NodeId]) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<_> = from.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.edges_from(id).map(|(_, e)| e.child));
        }
        seen
    }

    /// True if there is a path of edges from one node to another
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        self.reachable(&[from]).contains(&to)
    }

    /// Find the first node with the given name in the graph below the roots.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.traverse()
            .map(|item| item.node)
            .find(|id| self.node(*id).name.as_ref().is_some_and(|n| n == name))
    }

    /// Find the node providing the given virtual package to any parent.
    pub fn find_provider(&self, virtual_name: &str) -> Option<NodeId> {
        let reachable = self.reachable(&self.roots);
        self.edges
            .iter()
            .filter(|e| reachable.contains(&e.parent))
            .find(|e| e.virtuals().contains(virtual_name))
            .map(|e| e.child)
    }

    /// Add a node to the arena without connecting it.
    pub fn add_node(&mut self, node: SpecNode) -> NodeId {
        self.nodes.push(Arc::new(node));
        NodeId(self.nodes.len() - 1)
    }

    /// Connect two nodes, merging with any edge already between them.
    ///
    /// Returns true if the graph changed.
    pub fn add_edge(
        &mut self,
        parent: NodeId,
        child: NodeId,
        attributes: EdgeAttributes,
    ) -> Result<bool> {
        if parent == child || self.reaches(child, parent) {
            return Err(Error::Cycle(format!(
                "{} and {}",
                self.node(parent).display_name(),
                self.node(child).display_name()
            )));
        }
        if let Some(index) = self
            .edges
            .iter()
            .position(|e| e.parent == parent && e.child == child)
        {
            let mut merged = self.edges[index].attributes.clone();
            if !merged.merge(&attributes) {
                return Ok(false);
            }
            self.invalidate(parent);
            self.edges[index].attributes = merged;
            return Ok(true);
        }
        self.invalidate(parent);
        self.edges
            .push(DependencySpec::new(parent, child, attributes));
        Ok(true)
    }

    /// Remove every edge between two nodes, returning the removed attributes
    pub fn remove_edge(&mut self, parent: NodeId, child: NodeId) -> Option<EdgeAttributes> {
        let index = self
            .edges
            .iter()
            .position(|e| e.parent == parent && e.child == child)?;
        self.invalidate(parent);
        Some(self.edges.remove(index).attributes)
    }

    /// Narrow one node by the attributes of another.
    ///
    /// The node is only touched (and its hashes dropped) when it changes.
    pub fn constrain_node(
        &mut self,
        id: NodeId,
        other: &SpecNode,
        policy: FlagMergePolicy,
    ) -> std::result::Result<bool, UnsatisfiableSpecError> {
        let mut node = self.node(id).clone();
        if !node.constrain(other, policy)? {
            return Ok(false);
        }
        *self.node_mut(id) = node;
        Ok(true)
    }

    /// Attach a named node below parent.
    ///
    /// If a node of the same name is already part of the graph, the
    /// two are merged instead of adding a second one.
    pub fn add_dependency(
        &mut self,
        parent: NodeId,
        node: SpecNode,
        attributes: EdgeAttributes,
        policy: FlagMergePolicy,
    ) -> Result<NodeId> {
        let existing = node.name.as_ref().and_then(|n| self.find(n));
        let id = match existing {
            Some(id) => {
                self.constrain_node(id, &node, policy)?;
                id
            }
            None => self.add_node(node),
        };
        self.add_edge(parent, id, attributes)?;
        Ok(id)
    }

    /// Conflicts within the text this spec was parsed from.
    ///
    /// The parser does not fail on these, they make the spec
    /// unsatisfiable and are reported when it is concretized.
    pub fn deferred_conflicts(&self) -> &[UnsatisfiableSpecError] {
        &self.deferred
    }

    pub(crate) fn defer(&mut self, err: UnsatisfiableSpecError) {
        if !self.deferred.contains(&err) {
            tracing::debug!(%err, "deferring conflict");
            self.deferred.push(err);
        }
    }

    /// Drop cached hashes of a node and of everything depending on it.
    pub(crate) fn invalidate(&mut self, id: NodeId) {
        if self.hashes.is_empty() {
            return;
        }
        let mut affected = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !affected.insert(current) {
                continue;
            }
            stack.extend(self.edges_to(current).map(|(_, e)| e.parent));
            stack.extend(
                self.node_ids()
                    .filter(|n| self.node(*n).build_spec == Some(current)),
            );
        }
        self.hashes.retain(|(node, _), _| !affected.contains(node));
    }

    /// True if every node below the roots is concrete
    pub fn is_concrete(&self) -> bool {
        !self.nodes.is_empty()
            && self
                .reachable(&self.roots)
                .into_iter()
                .all(|id| self.node(id).is_concrete())
    }

    /// Check that every node below the roots is fully determined and
    /// flag them all as concrete.
    pub fn mark_concrete(&mut self) -> Result<()> {
        if let Some(err) = self.deferred.first() {
            return Err(err.clone().into());
        }
        let mut ids: Vec<_> = self.reachable(&self.roots).into_iter().collect();
        let originals: Vec<_> = ids
            .iter()
            .filter_map(|id| self.node(*id).build_spec)
            .collect();
        ids.extend(self.reachable(&originals));
        for id in ids.iter() {
            let node = self.node(*id);
            if let Some(reason) = node.unresolved() {
                return Err(Error::NotConcrete {
                    pkg: node.display_name().to_owned(),
                    reason,
                });
            }
            if let Some((_, edge)) = self.edges_from(*id).find(|(_, e)| e.depflag().is_empty()) {
                return Err(Error::NotConcrete {
                    pkg: node.display_name().to_owned(),
                    reason: format!(
                        "dependency on {} has no type",
                        self.node(edge.child).display_name()
                    ),
                });
            }
        }
        for id in ids {
            if !self.node(id).concrete {
                self.node_mut(id).concrete = true;
            }
        }
        Ok(())
    }

    /// Narrow this spec by the constraints of other.
    ///
    /// Flags that differ are a conflict, see [`Self::constrain_with`].
    pub fn constrain(&mut self, other: &Spec) -> std::result::Result<bool, UnsatisfiableSpecError> {
        self.constrain_with(other, FlagMergePolicy::default())
    }

    /// Narrow this spec by the constraints of other.
    ///
    /// The roots are merged with each other and dependencies are merged
    /// by name, anything other adds that self lacks is grafted in. On
    /// error self is left untouched. A concrete spec can not be changed,
    /// it either already satisfies other or this fails.
    ///
    /// Returns true if self was changed.
    pub fn constrain_with(
        &mut self,
        other: &Spec,
        policy: FlagMergePolicy,
    ) -> std::result::Result<bool, UnsatisfiableSpecError> {
        if other.is_empty() {
            return Ok(false);
        }
        if self.is_concrete() {
            if self.satisfies(other) {
                return Ok(false);
            }
            return Err(UnsatisfiableSpecError::new(
                self.root_node().display_name(),
                "concrete spec",
                &*self,
                other,
            ));
        }
        let mut candidate = self.clone();
        let changed = candidate.graft(other, self.root(), policy)?;
        *self = candidate;
        Ok(changed)
    }

    /// Add the graph of other to self under an additional root.
    ///
    /// A node of self with the same name as the root of other becomes
    /// a root and is merged with it instead, and the other nodes are
    /// merged by name as in [`Self::constrain_with`]. Returns the root
    /// other was placed on.
    pub fn add_spec_root(
        &mut self,
        other: &Spec,
        policy: FlagMergePolicy,
    ) -> std::result::Result<NodeId, UnsatisfiableSpecError> {
        let existing = other
            .root_node()
            .name
            .as_ref()
            .and_then(|name| self.find(name));
        let mut candidate = self.clone();
        let onto = match existing {
            Some(id) => {
                candidate.add_root(id);
                id
            }
            None => {
                let id = candidate.add_node(SpecNode::default());
                candidate.roots.push(id);
                id
            }
        };
        candidate.graft(other, onto, policy)?;
        *self = candidate;
        Ok(onto)
    }

    /// Copy the nodes of other into self, its root onto the given node.
    fn graft(
        &mut self,
        other: &Spec,
        onto: NodeId,
        policy: FlagMergePolicy,
    ) -> std::result::Result<bool, UnsatisfiableSpecError> {
        let pkg = self.node(onto).display_name().to_owned();
        let mut mapping = HashMap::new();
        let mut changed = false;
        let mut names: HashMap<String, NodeId> = self
            .reachable(&self.roots)
            .into_iter()
            .filter_map(|id| self.node(id).name.as_ref().map(|n| (n.to_string(), id)))
            .collect();
        for item in other.traverse_from(other.root()) {
            let theirs = other.node(item.node);
            let target = if item.node == other.root() {
                Some(onto)
            } else {
                theirs.name.as_ref().and_then(|n| names.get(n.as_str()).copied())
            };
            let id = match target {
                Some(id) => {
                    changed |= self.constrain_node(id, theirs, policy)?;
                    id
                }
                None => {
                    let mut node = theirs.clone();
                    node.build_spec = None;
                    let id = self.add_node(node);
                    if let Some(name) = &theirs.name {
                        names.insert(name.to_string(), id);
                    }
                    changed = true;
                    id
                }
            };
            mapping.insert(item.node, id);
        }
        for edge in other.edges.iter() {
            let (Some(parent), Some(child)) = (mapping.get(&edge.parent), mapping.get(&edge.child))
            else {
                continue;
            };
            changed |= self
                .add_edge(*parent, *child, edge.attributes.clone())
                .map_err(|err| UnsatisfiableSpecError::new(&pkg, "dependencies", err, other))?;
        }
        for err in other.deferred.iter() {
            self.defer(err.clone());
        }
        Ok(changed)
    }

    /// True if self is at least as constrained as other.
    ///
    /// Dependencies of other are matched by name, or by a dependency
    /// edge of self that provides a virtual package of that name.
    pub fn satisfies(&self, other: &Spec) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        let root = self.root();
        let theirs = other.root_node();
        let root_name_ok = match &theirs.name {
            None => true,
            Some(name) => {
                self.root_node().name.as_ref() == Some(name)
                    || self.edges_to(root).any(|(_, e)| e.virtuals().contains(name.as_str()))
            }
        };
        if !root_name_ok || !self.node_satisfies(root, theirs) {
            return false;
        }

        let mut mapping = HashMap::from([(other.root(), root)]);
        for item in other.traverse_from(other.root()).skip(1) {
            let wanted = other.node(item.node);
            let Some(name) = &wanted.name else {
                return false;
            };
            if let Some(id) = self.find_below(root, name) {
                if !self.node_satisfies(id, wanted) {
                    return false;
                }
                mapping.insert(item.node, id);
            } else if let Some(id) = self.find_provider_below(root, name) {
                mapping.insert(item.node, id);
            } else {
                return false;
            }
        }

        for edge in other.edges.iter() {
            let (Some(parent), Some(child)) = (mapping.get(&edge.parent), mapping.get(&edge.child))
            else {
                continue;
            };
            if edge.direct() && self.edge_between(*parent, *child).is_none() {
                return false;
            }
            let incoming: Vec<_> = self.edges_to(*child).map(|(_, e)| e).collect();
            let depflag = incoming
                .iter()
                .fold(DepFlag::NONE, |acc, e| acc | e.depflag());
            if !depflag.contains(edge.depflag()) {
                return false;
            }
            if !edge.virtuals().is_empty()
                && !incoming
                    .iter()
                    .any(|e| edge.virtuals().is_subset(e.virtuals()))
            {
                return false;
            }
        }
        true
    }

    fn node_satisfies(&self, id: NodeId, other: &SpecNode) -> bool {
        let node = self.node(id);
        if !node.satisfies_attributes(other) {
            return false;
        }
        match &other.abstract_hash {
            None => true,
            Some(prefix) if node.is_concrete() => {
                self.node_hash(id, &hash::DAG_HASH).matches_prefix(prefix)
            }
            Some(prefix) => node
                .abstract_hash
                .as_deref()
                .is_some_and(|h| h.starts_with(prefix.as_str())),
        }
    }

    fn find_below(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.reachable(&[root])
            .into_iter()
            .filter(|id| *id != root)
            .find(|id| self.node(*id).name.as_ref().is_some_and(|n| n == name))
    }

    fn find_provider_below(&self, root: NodeId, virtual_name: &str) -> Option<NodeId> {
        let reachable = self.reachable(&[root]);
        self.edges
            .iter()
            .filter(|e| reachable.contains(&e.parent))
            .find(|e| e.virtuals().contains(virtual_name))
            .map(|e| e.child)
    }

    /// True if some spec could satisfy both self and other
    pub fn intersects(&self, other: &Spec) -> bool {
        if self.is_concrete() {
            return self.satisfies(other);
        }
        if other.is_concrete() {
            return other.satisfies(self);
        }
        self.clone().constrain(other).is_ok()
    }

    /// Copy this spec, keeping as much of the graph as requested.
    ///
    /// Copying the whole graph shares every node with self until either
    /// side is modified, so it is cheap even for large graphs.
    pub fn copy(&self, deps: CopyDeps) -> Spec {
        match deps {
            CopyDeps::All => self.clone(),
            CopyDeps::None => {
                let mut node = self.root_node().clone();
                node.build_spec = None;
                Spec::new(node)
            }
            CopyDeps::Direct => {
                let mut node = self.root_node().clone();
                node.build_spec = None;
                let mut copy = Spec::new(node);
                let root = copy.root();
                for (_, edge) in self.edges_from(self.root()) {
                    let mut child = self.node(edge.child).clone();
                    child.build_spec = None;
                    let id = copy.add_node(child);
                    copy.edges
                        .push(DependencySpec::new(root, id, edge.attributes.clone()));
                }
                copy
            }
        }
    }

    /// A new spec rooted at the given node, holding the graph below it.
    ///
    /// Nodes are shared with self, and so are any cached hashes.
    pub fn extract(&self, id: NodeId) -> Spec {
        let mut ids: Vec<_> = vec![id];
        let mut mapping = HashMap::new();
        let mut spec = Spec::empty();
        while let Some(current) = ids.pop() {
            if mapping.contains_key(&current) {
                continue;
            }
            mapping.insert(current, NodeId(spec.nodes.len()));
            spec.nodes.push(Arc::clone(&self.nodes[current.0]));
            ids.extend(self.edges_from(current).map(|(_, e)| e.child));
            ids.extend(self.node(current).build_spec);
        }
        for edge in self.edges.iter() {
            let ends = (mapping.get(&edge.parent), mapping.get(&edge.child));
            if let (Some(parent), Some(child)) = ends {
                spec.edges
                    .push(DependencySpec::new(*parent, *child, edge.attributes.clone()));
            }
        }
        for (old, new) in mapping.iter() {
            if let Some(original) = self.node(*old).build_spec {
                Arc::make_mut(&mut spec.nodes[new.0]).build_spec = mapping.get(&original).copied();
            }
            for entry in self.hashes.iter() {
                let (node, name) = entry.key();
                if node == old {
                    spec.hashes.insert((*new, *name), entry.value().clone());
                }
            }
        }
        spec.roots.push(NodeId(0));
        spec
    }

    /// Render the graph below the roots as an indented tree.
    pub fn tree(&self) -> String {
        self.tree_with(spackle_foundation::digest::DEFAULT_DISPLAY_LENGTH)
    }

    /// Render an indented tree, showing hashes of the given length for
    /// concrete nodes.
    pub fn tree_with(&self, hash_length: usize) -> String {
        let mut out = String::new();
        for item in self.traverse_with(TraverseOptions {
            cover: Cover::Nodes,
            ..Default::default()
        }) {
            let node = self.node(item.node);
            if node.is_concrete() {
                let hash = self.node_hash(item.node, &hash::DAG_HASH);
                let _ = write!(out, "{}  ", hash.short(hash_length));
            }
            out.push_str(&"    ".repeat(item.depth));
            if let Some(edge) = item.edge.map(|i| &self.edges[i]) {
                let _ = write!(out, "{}", if edge.direct() { "%" } else { "^" });
                let types = edge
                    .depflag()
                    .names()
                    .into_iter()
                    .map(|n| &n[..1])
                    .collect::<String>();
                if !types.is_empty() {
                    let _ = write!(out, "[{types}] ");
                }
            }
            let _ = writeln!(out, "{node}");
        }
        out
    }

    /// Write the spec string of the graph below one root.
    fn format_root(&self, root: NodeId, out: &mut String) -> std::fmt::Result {
        let reachable: Vec<_> = self
            .traverse_from(root)
            .map(|item| item.node)
            .collect();
        let in_graph: HashSet<_> = reachable.iter().copied().collect();

        // nodes written with `^` at the top level, everything else is
        // written with `%` below each of its parents
        let mut top: HashSet<NodeId> = HashSet::from([root]);
        for id in reachable.iter() {
            if self
                .edges_to(*id)
                .any(|(_, e)| in_graph.contains(&e.parent) && !e.direct())
            {
                top.insert(*id);
            }
        }
        loop {
            let mut grew = false;
            for id in reachable.iter() {
                if top.contains(id) {
                    continue;
                }
                if self
                    .edges_to(*id)
                    .any(|(_, e)| in_graph.contains(&e.parent) && !top.contains(&e.parent))
                {
                    top.insert(*id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        write!(out, "{}", self.node(root))?;
        self.format_direct(root, out)?;
        for id in reachable.iter() {
            if *id == root || !top.contains(id) {
                continue;
            }
            let sigil = match self.edge_between(root, *id) {
                Some(edge) if !edge.direct() => edge.attributes.bracket('^'),
                _ => "^".to_owned(),
            };
            write!(out, " {sigil}{}", self.node(*id))?;
            self.format_direct(*id, out)?;
        }
        Ok(())
    }

    fn format_direct(&self, parent: NodeId, out: &mut String) -> std::fmt::Result {
        let mut direct: Vec<_> = self
            .edges_from(parent)
            .filter(|(_, e)| e.direct())
            .map(|(_, e)| e)
            .collect();
        direct.sort_by(|a, b| {
            self.node(a.child)
                .display_name()
                .cmp(self.node(b.child).display_name())
        });
        for edge in direct {
            write!(out, " {}{}", edge.attributes.bracket('%'), self.node(edge.child))?;
        }
        Ok(())
    }

    /// Compare the graph below two nodes of two arenas.
    fn same_graph(
        &self,
        mine: NodeId,
        other: &Spec,
        theirs: NodeId,
        seen: &mut HashMap<NodeId, NodeId>,
    ) -> bool {
        if let Some(previous) = seen.get(&mine) {
            return *previous == theirs;
        }
        seen.insert(mine, theirs);
        let (a, b) = (self.node(mine), other.node(theirs));
        if !a.same_attributes(b) {
            return false;
        }
        match (a.build_spec, b.build_spec) {
            (None, None) => {}
            (Some(x), Some(y)) => {
                if !self.same_graph(x, other, y, seen) {
                    return false;
                }
            }
            _ => return false,
        }
        fn sorted<'a>(spec: &'a Spec, id: NodeId) -> Vec<(String, &'a DependencySpec)> {
            let mut edges: Vec<_> = spec
                .edges_from(id)
                .map(|(_, e)| (spec.node(e.child).display_name().to_owned(), e))
                .collect();
            edges.sort_by(|x, y| (&x.0, &x.1.attributes).cmp(&(&y.0, &y.1.attributes)));
            edges
        }
        let (left, right) = (sorted(self, mine), sorted(other, theirs));
        if left.len() != right.len() {
            return false;
        }
        left.into_iter().zip(right).all(|((_, x), (_, y))| {
            x.attributes == y.attributes && self.same_graph(x.child, other, y.child, seen)
        })
    }
}

impl PartialEq for Spec {
    /// Structural equality, independent of arena layout and edge order.
    fn eq(&self, other: &Self) -> bool {
        if self.roots.len() != other.roots.len() {
            return false;
        }
        let mut seen = HashMap::new();
        self.roots
            .iter()
            .zip(other.roots.iter())
            .all(|(a, b)| self.same_graph(*a, other, *b, &mut seen))
    }
}

impl Eq for Spec {}

impl std::fmt::Display for Spec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        for (i, root) in self.roots.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            self.format_root(*root, &mut out)?;
        }
        f.write_str(&out)
    }
}

impl std::str::FromStr for Spec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::parse_one_or_raise(s)
    }
}
