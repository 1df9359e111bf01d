// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Substitution of one concrete dependency for another.
//!
//! Splicing never changes an existing node. Every node whose
//! dependencies change is copied, and the copy points back at the node
//! it was made from through [`SpecNode::build_spec`], so that the
//! binary built for the original can be found and rewired.

use std::collections::{HashMap, HashSet};

use spackle_foundation::name::PkgName;

use crate::error::{Error, Result};
use crate::hash::DAG_HASH;
use crate::node::NodeId;
use crate::spec::Spec;

#[cfg(test)]
#[path = "./splice_test.rs"]
mod splice_test;

/// A node that was rewired from an already built original.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplicedNode {
    pub node: NodeId,
    /// The node as it was built
    pub original: NodeId,
}

/// Which nodes of a spec were produced by splicing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpliceReport {
    pub spliced: Vec<SplicedNode>,
    /// Nodes that are used exactly as they were built
    pub original: Vec<NodeId>,
}

impl SpliceReport {
    pub fn is_spliced(&self, id: NodeId) -> bool {
        self.spliced.iter().any(|s| s.node == id)
    }
}

struct Rewiring {
    /// Nodes to be replaced by others wherever they are used
    substitute: HashMap<NodeId, NodeId>,
    done: HashMap<NodeId, NodeId>,
    visiting: HashSet<NodeId>,
}

fn names(spec: &Spec, ids: impl IntoIterator<Item = NodeId>) -> HashMap<PkgName, NodeId> {
    ids.into_iter()
        .filter_map(|id| spec.node(id).name.clone().map(|n| (n, id)))
        .collect()
}

impl Spec {
    /// Replace the dependency sharing a name with the root of replacement.
    ///
    /// With `transitive`, dependencies of replacement also replace the
    /// nodes of the same name in self. Otherwise the dependencies of
    /// self are kept and replacement is rewired onto them.
    pub fn splice(&self, replacement: &Spec, transitive: bool) -> Result<Spec> {
        let name = replacement
            .name()
            .map(|n| n.to_string())
            .ok_or_else(|| self.splice_error(replacement, "the replacement has no name"))?;
        let target = self
            .reachable(&[self.root()])
            .into_iter()
            .find(|id| self.node(*id).name.as_ref().is_some_and(|n| n == name.as_str()))
            .ok_or_else(|| {
                self.splice_error(replacement, format!("there is no {name} to replace"))
            })?;
        self.splice_node(target, replacement, transitive)
    }

    /// Replace the provider of a virtual package with the root of replacement.
    pub fn splice_virtual(
        &self,
        virtual_name: &str,
        replacement: &Spec,
        transitive: bool,
    ) -> Result<Spec> {
        let reachable = self.reachable(&[self.root()]);
        let target = self
            .edges()
            .iter()
            .filter(|e| reachable.contains(&e.parent))
            .find(|e| e.virtuals().contains(virtual_name))
            .map(|e| e.child)
            .ok_or_else(|| {
                self.splice_error(replacement, format!("nothing provides {virtual_name}"))
            })?;
        self.splice_node(target, replacement, transitive)
    }

    fn splice_error(&self, replacement: &Spec, reason: impl Into<String>) -> Error {
        Error::Splice {
            spec: self.to_string(),
            replacement: replacement.to_string(),
            reason: reason.into(),
        }
    }

    fn splice_node(&self, target: NodeId, replacement: &Spec, transitive: bool) -> Result<Spec> {
        if !self.is_concrete() || !replacement.is_concrete() {
            return Err(self.splice_error(replacement, "both specs must be concrete"));
        }
        if target == self.root() {
            return Err(self.splice_error(replacement, "the root can not be replaced"));
        }
        if self.node_hash(target, &DAG_HASH) == replacement.dag_hash() {
            return Ok(self.clone());
        }

        let mut result = self.clone();
        // identical subgraphs are shared rather than imported twice
        let existing: HashMap<_, _> = self
            .reachable(&[self.root()])
            .into_iter()
            .map(|id| (self.node_hash(id, &DAG_HASH), id))
            .collect();
        let mut imported = HashMap::new();
        let mut added = HashSet::new();
        for item in replacement.traverse_from(replacement.root()) {
            let hash = replacement.node_hash(item.node, &DAG_HASH);
            let id = match existing.get(&hash) {
                Some(id) if item.node != replacement.root() => *id,
                _ => {
                    let id = result.add_node(replacement.node(item.node).clone());
                    added.insert(id);
                    id
                }
            };
            imported.insert(item.node, id);
        }
        for edge in replacement.edges() {
            let ends = (imported.get(&edge.parent), imported.get(&edge.child));
            if let (Some(parent), Some(child)) = ends {
                if added.contains(parent) {
                    result.add_edge(*parent, *child, edge.attributes.clone())?;
                }
            }
        }
        let Some(new_root) = imported.get(&replacement.root()).copied() else {
            return Err(self.splice_error(replacement, "the replacement is empty"));
        };

        // which node stands in for which
        let mut substitute = HashMap::from([(target, new_root)]);
        let own = names(
            &result,
            self.reachable(&[self.root()])
                .into_iter()
                .filter(|id| *id != target && *id != self.root()),
        );
        let theirs = names(
            &result,
            imported.values().copied().filter(|id| *id != new_root),
        );
        for (name, their_id) in theirs.iter() {
            if let Some(own_id) = own.get(name).filter(|id| *id != their_id) {
                if transitive {
                    substitute.insert(*own_id, *their_id);
                } else {
                    substitute.insert(*their_id, *own_id);
                }
            }
        }

        let mut rewiring = Rewiring {
            substitute,
            done: HashMap::new(),
            visiting: HashSet::new(),
        };
        let root = result.rewire(self.root(), &mut rewiring)?;
        if root == self.root() {
            return Err(self.splice_error(replacement, "nothing was changed"));
        }
        result.roots = vec![root];
        let spliced = result.extract(root);
        tracing::debug!(
            spec = %spliced,
            replaced = %self.node(target).display_name(),
            "spliced"
        );
        Ok(spliced)
    }

    /// The node standing for id after substitution, copied if any of its
    /// dependencies changed.
    fn rewire(&mut self, id: NodeId, state: &mut Rewiring) -> Result<NodeId> {
        if let Some(done) = state.done.get(&id) {
            return Ok(*done);
        }
        if !state.visiting.insert(id) {
            return Err(Error::Cycle(self.node(id).display_name().to_owned()));
        }
        if let Some(other) = state.substitute.get(&id).copied() {
            let other = self.rewire(other, state)?;
            state.done.insert(id, other);
            return Ok(other);
        }
        let edges: Vec<_> = self
            .edges_from(id)
            .map(|(_, e)| (e.child, e.attributes.clone()))
            .collect();
        let mut children = Vec::with_capacity(edges.len());
        for (child, attributes) in edges {
            children.push((child, self.rewire(child, state)?, attributes));
        }
        if children.iter().all(|(old, new, _)| old == new) {
            state.done.insert(id, id);
            return Ok(id);
        }
        let mut node = self.node(id).clone();
        node.build_spec = Some(node.build_spec.unwrap_or(id));
        let copy = self.add_node(node);
        for (_, child, attributes) in children {
            self.add_edge(copy, child, attributes)?;
        }
        state.done.insert(id, copy);
        Ok(copy)
    }

    /// Report which nodes below the roots were spliced.
    pub fn splice_report(&self) -> SpliceReport {
        let mut report = SpliceReport::default();
        for id in self.reachable(self.roots()) {
            match self.node(id).build_spec {
                Some(original) => report.spliced.push(SplicedNode { node: id, original }),
                None => report.original.push(id),
            }
        }
        report
    }

    /// True if any node below the roots was spliced
    pub fn is_spliced(&self) -> bool {
        self.reachable(self.roots())
            .into_iter()
            .any(|id| self.node(id).build_spec.is_some())
    }
}
