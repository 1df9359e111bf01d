// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use spackle_foundation::depflag::DepFlag;
use spackle_spec::traverse::{
    CoverNodesVisitor,
    Direction,
    EdgeAndDepth,
    UninstalledDepsVisitor,
    Visitor,
    neighbors,
    traverse_breadth_first_with_visitor,
};
use spackle_spec::{NodeId, Spec};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./state_test.rs"]
mod state_test;

/// Where one node is in the install process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum InstallState {
    Pending,
    Installing,
    Installed,
    Failed,
    /// External or already installed, nothing to do
    Skipped,
    /// A dependency failed, so this node can never be installed
    Blocked,
}

impl InstallState {
    /// True once nothing more will happen to the node
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Installing)
    }

    /// True if dependents may start installing
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Installed | Self::Skipped)
    }

    pub fn can_become(&self, next: InstallState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Installing | Self::Skipped | Self::Blocked)
                | (Self::Installing, Self::Installed | Self::Failed)
        )
    }
}

/// Walks the nodes that take part in an install, without looking
/// below nodes that will be skipped.
struct PlanVisitor<F> {
    depflag: DepFlag,
    is_skipped: F,
}

impl<F> Visitor for PlanVisitor<F>
where
    F: FnMut(&Spec, NodeId) -> bool,
{
    fn accept(&mut self, _spec: &Spec, _item: &EdgeAndDepth) -> bool {
        true
    }

    fn neighbors(&mut self, spec: &Spec, item: &EdgeAndDepth) -> Vec<EdgeAndDepth> {
        if (self.is_skipped)(spec, item.node) {
            return Vec::new();
        }
        neighbors(spec, item, Direction::Children, self.depflag)
    }
}

/// The state of every node in one install, and the rules for moving
/// between states.
///
/// A node may start installing only once every dependency along the
/// plan's edge types is installed or skipped. A failure blocks every
/// node that depends on it, directly or not, and nothing else.
#[derive(Clone, Debug)]
pub struct InstallPlan {
    depflag: DepFlag,
    states: BTreeMap<NodeId, InstallState>,
    /// Dependencies of each node that are part of the plan
    dependencies: BTreeMap<NodeId, Vec<NodeId>>,
    /// Dependents of each node that are part of the plan
    dependents: BTreeMap<NodeId, Vec<NodeId>>,
    names: BTreeMap<NodeId, String>,
    notes: BTreeMap<NodeId, String>,
}

impl InstallPlan {
    /// Plan the install of the given roots.
    ///
    /// External nodes and those for which `is_installed` is true are
    /// skipped, and their own dependencies are left out of the plan.
    pub fn new<F>(spec: &Spec, roots: &[NodeId], with_tests: bool, mut is_installed: F) -> Self
    where
        F: FnMut(&Spec, NodeId) -> bool,
    {
        let depflag = if with_tests {
            DepFlag::ALL
        } else {
            DepFlag::BUILD_LINK_RUN
        };
        let mut skipped = BTreeSet::new();
        let visitor = CoverNodesVisitor::new(PlanVisitor {
            depflag,
            is_skipped: |spec: &Spec, id: NodeId| {
                let skip = spec.node(id).is_external() || is_installed(spec, id);
                if skip {
                    skipped.insert(id);
                }
                skip
            },
        });
        let nodes: BTreeSet<NodeId> = traverse_breadth_first_with_visitor(spec, roots, visitor)
            .map(|item| item.node)
            .collect();

        let mut plan = Self {
            depflag,
            states: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            dependents: BTreeMap::new(),
            names: BTreeMap::new(),
            notes: BTreeMap::new(),
        };
        for id in nodes.iter().copied() {
            let state = if skipped.contains(&id) {
                InstallState::Skipped
            } else {
                InstallState::Pending
            };
            plan.states.insert(id, state);
            plan.names
                .insert(id, spec.node(id).display_name().to_owned());
            plan.dependents.entry(id).or_default();
            if state == InstallState::Skipped {
                plan.dependencies.insert(id, Vec::new());
                continue;
            }
            let deps: Vec<_> = spec
                .dependencies(id, depflag)
                .into_iter()
                .filter(|d| nodes.contains(d))
                .collect();
            for dep in deps.iter() {
                plan.dependents.entry(*dep).or_default().push(id);
            }
            plan.dependencies.insert(id, deps);
        }
        plan
    }

    /// Record why skipped, installed nodes may still be broken.
    ///
    /// An installed package whose link or run dependencies are gone
    /// is not reinstalled, but it is worth telling the user about.
    pub fn check_skipped<F>(&mut self, spec: &Spec, mut is_installed: F)
    where
        F: FnMut(&Spec, NodeId) -> bool,
    {
        let skipped: Vec<_> = self
            .states
            .iter()
            .filter(|(id, state)| {
                **state == InstallState::Skipped && !spec.node(**id).is_external()
            })
            .map(|(id, _)| *id)
            .collect();
        for id in skipped {
            let mut visitor = UninstalledDepsVisitor::new(&mut is_installed, false);
            traverse_breadth_first_with_visitor(spec, &[id], &mut visitor).for_each(drop);
            if visitor.has_uninstalled_deps {
                let note = "already installed, but some of its dependencies are missing";
                tracing::warn!(pkg = %spec.node(id).display_name(), "{note}");
                self.notes.insert(id, note.to_owned());
            }
        }
    }

    pub fn depflag(&self) -> DepFlag {
        self.depflag
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, id: NodeId) -> Option<InstallState> {
        self.states.get(&id).copied()
    }

    pub fn states(&self) -> impl Iterator<Item = (NodeId, InstallState)> + '_ {
        self.states.iter().map(|(id, state)| (*id, *state))
    }

    pub fn note(&self, id: NodeId) -> Option<&str> {
        self.notes.get(&id).map(String::as_str)
    }

    fn name(&self, id: NodeId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or_default()
    }

    /// Pending nodes whose dependencies are all available, by name.
    pub fn ready(&self) -> Vec<NodeId> {
        let mut ready: Vec<_> = self
            .states
            .iter()
            .filter(|(_, state)| **state == InstallState::Pending)
            .filter(|(id, _)| {
                self.dependencies[*id]
                    .iter()
                    .all(|dep| self.states[dep].is_available())
            })
            .map(|(id, _)| *id)
            .collect();
        ready.sort_by(|a, b| self.name(*a).cmp(self.name(*b)).then(a.cmp(b)));
        ready
    }

    /// True once every node has reached a final state
    pub fn is_complete(&self) -> bool {
        self.states.values().all(InstallState::is_final)
    }

    fn transition(&mut self, id: NodeId, next: InstallState) -> Result<()> {
        let current = self
            .states
            .get_mut(&id)
            .ok_or_else(|| Error::internal(format!("node {id:?} is not part of this install")))?;
        if !current.can_become(next) {
            return Err(Error::internal(format!(
                "{} cannot go from {current} to {next}",
                self.names.get(&id).map(String::as_str).unwrap_or_default()
            )));
        }
        *current = next;
        Ok(())
    }

    /// Mark a ready node as being installed.
    pub fn start(&mut self, id: NodeId) -> Result<()> {
        let waiting: Vec<_> = self
            .dependencies
            .get(&id)
            .map(|deps| {
                deps.iter()
                    .filter(|dep| !self.states[*dep].is_available())
                    .map(|dep| self.name(*dep).to_owned())
                    .collect()
            })
            .unwrap_or_default();
        if !waiting.is_empty() {
            return Err(Error::internal(format!(
                "{} cannot start before {}",
                self.name(id),
                waiting.join(", ")
            )));
        }
        self.transition(id, InstallState::Installing)
    }

    /// Record the end of an install.
    ///
    /// Returns the nodes that were blocked by a failure.
    pub fn finish(&mut self, id: NodeId, success: bool) -> Result<Vec<NodeId>> {
        if success {
            self.transition(id, InstallState::Installed)?;
            return Ok(Vec::new());
        }
        self.transition(id, InstallState::Failed)?;
        let mut blocked = Vec::new();
        let mut queue: VecDeque<NodeId> = self.dependents[&id].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if self.states[&next] != InstallState::Pending {
                continue;
            }
            self.transition(next, InstallState::Blocked)?;
            blocked.push(next);
            queue.extend(self.dependents[&next].iter().copied());
        }
        Ok(blocked)
    }

    /// The dependency path from a blocked node down to a failed one.
    ///
    /// The path starts with the blocked node and ends with the first
    /// failed node found breadth first.
    pub fn chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut parents: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut queue = VecDeque::from([id]);
        let mut seen = BTreeSet::from([id]);
        while let Some(current) = queue.pop_front() {
            if current != id && self.states[&current] == InstallState::Failed {
                let mut path = vec![current];
                let mut step = current;
                while let Some(parent) = parents.get(&step) {
                    path.push(*parent);
                    step = *parent;
                }
                path.reverse();
                return path;
            }
            for dep in self.dependencies[&current].iter() {
                if seen.insert(*dep) {
                    parents.insert(*dep, current);
                    queue.push_back(*dep);
                }
            }
        }
        Vec::new()
    }

    /// Run the plan one node at a time, assuming every build succeeds.
    ///
    /// This is the order a single job install would use.
    pub fn serial_order(&self) -> Result<Vec<NodeId>> {
        let mut plan = self.clone();
        let mut order = Vec::new();
        loop {
            let ready = plan.ready();
            let Some(next) = ready.first().copied() else {
                break;
            };
            plan.start(next)?;
            plan.finish(next, true)?;
            order.push(next);
        }
        if !plan.is_complete() {
            return Err(Error::internal("install plan has a dependency cycle"));
        }
        Ok(order)
    }
}
